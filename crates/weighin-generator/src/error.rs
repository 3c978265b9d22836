//! Error types for weighin-generator

use thiserror::Error;

/// Result type for weighin-generator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for weighin-generator
#[derive(Error, Debug)]
pub enum Error {
    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// The model answered without any parser code
    #[error("Model returned an empty parser")]
    EmptySource,

    /// The sample to send was empty
    #[error("Nothing to sample: the file has no non-empty lines")]
    EmptySample,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] weighin_core::Error),

    /// Agent error from llm-toolkit
    #[error("Agent error: {0}")]
    Agent(#[from] llm_toolkit::agent::AgentError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<Error> for weighin_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(inner) => inner,
            other => weighin_core::Error::Generator(other.to_string()),
        }
    }
}

//! Error types for weighin-core

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for weighin-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for weighin-core
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Import file has no content
    #[error("Import file is empty")]
    EmptyInput,

    /// No built-in handler recognized the file and no fallback could run
    #[error("No import format recognized this file")]
    NoMatchingFormat,

    /// The generated fallback parser failed
    #[error("Fallback parser failed: {0}")]
    Fallback(#[from] FallbackError),

    /// The parser source generator failed
    #[error("Parser generation failed: {0}")]
    Generator(String),

    /// A handler failed while detecting or parsing
    #[error("Handler {id} failed: {message}")]
    Handler { id: String, message: String },

    /// Invalid weight unit
    #[error("Invalid weight unit: {0}")]
    InvalidUnit(String),

    /// Import batch not found
    #[error("Import not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

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

/// Structural failures of the generated fallback parser.
///
/// Per-row problems never show up here; they are dropped during
/// normalization.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum FallbackError {
    /// Generated source exceeds the hard size cap
    #[error("Generated parser is {len} characters, refusing to run anything over {max}")]
    SourceTooLarge { len: usize, max: usize },

    /// Snippet evaluated but did not define the entry point
    #[error("Generated parser does not define a parseWeightLog function")]
    MissingEntryPoint,

    /// Snippet failed to evaluate
    #[error("Generated parser could not be evaluated: {0}")]
    Compile(String),

    /// parseWeightLog threw or exceeded a runtime limit
    #[error("Generated parser threw while running: {0}")]
    Execution(String),

    /// parseWeightLog returned something other than an array
    #[error("Generated parser returned {0} instead of an array")]
    NotAnArray(String),

    /// Wall-clock limit exceeded
    #[error("Generated parser did not finish within {0:?}")]
    Timeout(Duration),

    /// The sandbox worker itself failed
    #[error("Sandbox failure: {0}")]
    Sandbox(String),
}

//! # weighin-generator
//!
//! LLM-powered fallback parser generation for weighin.
//!
//! ## Features
//!
//! - Write a `parseWeightLog` function for weight logs no built-in handler recognizes
//! - Schema-based structured responses via llm-toolkit agents
//! - Plugs into the core importer as a `ParserSourceGenerator`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weighin_core::{ImportOptions, WeightLogImporter};
//! use weighin_generator::ParserGenerator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let generator = ParserGenerator::new().await?;
//!     let importer = WeightLogImporter::new(ImportOptions::default())
//!         .with_generator(Arc::new(generator));
//!
//!     let content = std::fs::read_to_string("notes.txt")?;
//!     let outcome = importer.import(&content).await?;
//!
//!     println!("Imported {} observations", outcome.observations.len());
//!
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod error;
pub mod generator;
pub mod prompts;

// Re-exports
pub use agents::{ParserSourceResponse, WeightLogParserAgent};
pub use error::{Error, Result};
pub use generator::{GenerationOptions, ParserGenerator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

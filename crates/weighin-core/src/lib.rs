//! # weighin-core
//!
//! Weight log import pipeline.
//!
//! ## Features
//!
//! - Heuristic format detection over an ordered handler registry
//! - Delimiter-sniffing CSV parsing for known fitness-tracker exports
//! - One date normalizer shared by every import path
//! - Sandboxed execution of generated parsers for unknown formats
//! - SQLite persistence of import batches
//!
//! ## Example
//!
//! ```no_run
//! use weighin_core::{Database, ImportOptions, ImportRecord, WeightLogImporter, WeightLogOperations};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Database::open("~/.weighin/weighin.db").await?;
//!     let importer = WeightLogImporter::new(ImportOptions::default());
//!
//!     let content = std::fs::read_to_string("fitbit_weight.csv")?;
//!     let outcome = importer.import(&content).await?;
//!
//!     let record = ImportRecord {
//!         source: outcome.source.describe(),
//!         file_hash: None,
//!     };
//!     db.store().insert_batch("me", &outcome.observations, record).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod delimited;
pub mod error;
pub mod fallback;
pub mod handlers;
pub mod importer;
pub mod normalize;
pub mod registry;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use db::Database;
pub use error::{Error, FallbackError, Result};
pub use fallback::{
    run_fallback_parser, serve_sandbox_worker, FallbackRun, SandboxIsolation, SandboxLimits,
    WorkerCommand, MAX_PARSER_SOURCE_LEN, SANDBOX_WORKER_ARG,
};
pub use handlers::{CsvFormat, CsvWeightHandler, ImportHandler};
pub use importer::{
    GeneratedParser, ImportOptions, ImportOutcome, ImportSource, ParserSourceGenerator,
    WeightLogImporter,
};
pub use normalize::normalize_date;
pub use registry::{detect_handler, DetectionScore, FormatRegistry};
pub use store::{ImportRecord, ListOptions, StoredObservation, WeightLogOperations, WeightLogStore};
pub use types::{observation_from_row, CandidateRow, WeightObservation, WeightUnit};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

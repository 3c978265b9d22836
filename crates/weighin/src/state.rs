//! Application state

use std::sync::Arc;
use weighin_core::{Database, ImportOptions, SandboxIsolation, WeightLogImporter, WorkerCommand};
use weighin_generator::ParserGenerator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection
    pub db: Arc<Database>,
    /// Importer with the LLM fallback configured
    pub importer: Arc<WeightLogImporter>,
    /// Importer restricted to the registered handlers (`--no-ai`)
    pub offline_importer: Arc<WeightLogImporter>,
}

impl AppState {
    /// Create a new AppState
    pub async fn new() -> anyhow::Result<Self> {
        // Open database
        let db = Database::open_default().await?;

        // Create generator
        let generator = ParserGenerator::new().await?;

        // Generated parsers run in a child copy of this binary
        let options = ImportOptions {
            isolation: SandboxIsolation::Process(WorkerCommand::current_exe()?),
            ..ImportOptions::default()
        };
        let importer = WeightLogImporter::new(options).with_generator(Arc::new(generator));
        let offline_importer = WeightLogImporter::new(ImportOptions {
            fallback_enabled: false,
            ..ImportOptions::default()
        });

        Ok(Self {
            db: Arc::new(db),
            importer: Arc::new(importer),
            offline_importer: Arc::new(offline_importer),
        })
    }

    /// Importer for a command, honoring `--no-ai`
    pub fn importer(&self, allow_ai: bool) -> &WeightLogImporter {
        if allow_ai {
            &self.importer
        } else {
            &self.offline_importer
        }
    }
}

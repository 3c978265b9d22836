//! Import pipeline: detection, parsing, fallback and normalization

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::fallback::{
    run_with_deadline, sample_lines, SandboxIsolation, SandboxLimits, DEFAULT_SAMPLE_LINES,
};
use crate::registry::FormatRegistry;
use crate::types::{observation_from_row, WeightObservation};
use crate::{Error, Result};

/// Source code produced for a file no built-in handler recognized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedParser {
    /// JavaScript defining `parseWeightLog(fileText)`
    pub parser_source: String,
    /// Short description of the format the generator saw
    pub summary: Option<String>,
}

/// Something that can write a fallback parser from a file sample
#[async_trait]
pub trait ParserSourceGenerator: Send + Sync {
    /// Produce parser source for a file whose first lines are `sample`
    async fn generate_parser_source(&self, sample: &str) -> Result<GeneratedParser>;
}

/// Import options
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Use the generated parser when no handler matches
    pub fallback_enabled: bool,
    /// Non-empty lines sent to the generator
    pub sample_lines: usize,
    /// Limits for the generated parser
    pub sandbox: SandboxLimits,
    /// Where the generated parser runs
    pub isolation: SandboxIsolation,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            sample_lines: DEFAULT_SAMPLE_LINES,
            sandbox: SandboxLimits::default(),
            isolation: SandboxIsolation::default(),
        }
    }
}

/// Which path produced the observations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImportSource {
    /// A registered handler recognized the file
    Handler { id: String, label: String },
    /// A generated parser read the file
    Fallback { summary: Option<String> },
}

impl ImportSource {
    /// Short name for storage and display
    pub fn describe(&self) -> String {
        match self {
            ImportSource::Handler { id, .. } => id.clone(),
            ImportSource::Fallback { .. } => "ai-fallback".to_string(),
        }
    }
}

/// Result of importing one file
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    /// Valid observations in file order
    pub observations: Vec<WeightObservation>,
    /// Path that produced them
    pub source: ImportSource,
    /// Rows the handler emitted before validation
    pub candidate_rows: usize,
}

impl ImportOutcome {
    /// Candidate rows that failed validation
    pub fn dropped_rows(&self) -> usize {
        self.candidate_rows.saturating_sub(self.observations.len())
    }
}

/// Weight log importer
///
/// Holds the handler registry and, optionally, a generator for the
/// fallback path. Holds no per-import state, so one importer can serve
/// concurrent imports.
pub struct WeightLogImporter {
    registry: Arc<FormatRegistry>,
    generator: Option<Arc<dyn ParserSourceGenerator>>,
    options: ImportOptions,
}

impl WeightLogImporter {
    /// Create an importer over the built-in registry
    pub fn new(options: ImportOptions) -> Self {
        Self {
            registry: FormatRegistry::builtin(),
            generator: None,
            options,
        }
    }

    /// Use a custom registry
    pub fn with_registry(mut self, registry: Arc<FormatRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Enable the fallback path with this generator
    pub fn with_generator(mut self, generator: Arc<dyn ParserSourceGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The registry used for detection
    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Options in effect
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Import a file's text content
    ///
    /// # Example
    ///
    /// ```no_run
    /// use weighin_core::{ImportOptions, WeightLogImporter};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let importer = WeightLogImporter::new(ImportOptions::default());
    ///     let content = std::fs::read_to_string("weight.csv")?;
    ///     let outcome = importer.import(&content).await?;
    ///     println!("{} observations", outcome.observations.len());
    ///     Ok(())
    /// }
    /// ```
    pub async fn import(&self, content: &str) -> Result<ImportOutcome> {
        if content.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        if let Some(handler) = self.registry.detect_handler(content) {
            info!("Importing with handler: {}", handler.id());
            let rows = handler.parse(content)?;
            let observations: Vec<WeightObservation> =
                rows.iter().filter_map(observation_from_row).collect();

            info!(
                "Handler {} produced {} observations from {} rows",
                handler.id(),
                observations.len(),
                rows.len()
            );

            return Ok(ImportOutcome {
                observations,
                source: ImportSource::Handler {
                    id: handler.id().to_string(),
                    label: handler.label().to_string(),
                },
                candidate_rows: rows.len(),
            });
        }

        let generator = match (&self.generator, self.options.fallback_enabled) {
            (Some(generator), true) => generator,
            _ => {
                info!("No handler matched and fallback is unavailable");
                return Err(Error::NoMatchingFormat);
            }
        };

        self.import_with_fallback(generator.as_ref(), content).await
    }

    async fn import_with_fallback(
        &self,
        generator: &dyn ParserSourceGenerator,
        content: &str,
    ) -> Result<ImportOutcome> {
        let sample = sample_lines(content, self.options.sample_lines);
        info!("No handler matched, requesting a fallback parser");
        debug!("Fallback sample:\n{}", sample);

        let generated = generator.generate_parser_source(&sample).await?;
        debug!(
            "Generated parser: {} chars, summary: {:?}",
            generated.parser_source.chars().count(),
            generated.summary
        );

        let run = run_with_deadline(
            generated.parser_source,
            content.to_string(),
            self.options.sandbox.clone(),
            &self.options.isolation,
        )
        .await
        .map_err(|e| {
            error!("Fallback parser failed: {}", e);
            Error::Fallback(e)
        })?;

        Ok(ImportOutcome {
            observations: run.observations,
            candidate_rows: run.candidate_rows,
            source: ImportSource::Fallback {
                summary: generated.summary,
            },
        })
    }
}

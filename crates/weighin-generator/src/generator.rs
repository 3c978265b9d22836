//! Fallback parser generator using LLM

use crate::agents::{ParserSourceResponse, WeightLogParserAgent};
use crate::prompts::{parser_generation_prompt, strip_code_fences};
use crate::{Error, Result};
use async_trait::async_trait;
use llm_toolkit::Agent;
use tracing::{debug, error, info, warn};
use weighin_core::fallback::MAX_PARSER_SOURCE_LEN;
use weighin_core::{GeneratedParser, ParserSourceGenerator};

/// Generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Model to use (default: claude-sonnet-4-5)
    pub model: String,
    /// Temperature (0.0-1.0)
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            temperature: 0.2,
        }
    }
}

/// Parser generator using LLM
///
/// Asks the model for a `parseWeightLog` function that reads a weight log
/// format none of the built-in handlers recognize. The returned source is
/// untrusted and only ever runs inside the core sandbox.
pub struct ParserGenerator {
    options: GenerationOptions,
}

impl ParserGenerator {
    /// Create a new ParserGenerator with default options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use weighin_generator::ParserGenerator;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let generator = ParserGenerator::new().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new() -> Result<Self> {
        Self::with_options(GenerationOptions::default()).await
    }

    /// Create a new ParserGenerator with custom options
    pub async fn with_options(options: GenerationOptions) -> Result<Self> {
        info!("Initializing ParserGenerator with model: {}", options.model);
        Ok(Self { options })
    }

    /// Current options
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Generate parser source from the first lines of a file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use weighin_generator::ParserGenerator;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let generator = ParserGenerator::new().await?;
    ///     let sample = "Jan 1 2024 - 180.4 lbs\nJan 2 2024 - 179.8 lbs";
    ///
    ///     let parser = generator.generate(sample).await?;
    ///     println!("{}", parser.parser_source);
    ///     Ok(())
    /// }
    /// ```
    pub async fn generate(&self, sample: &str) -> Result<GeneratedParser> {
        if sample.trim().is_empty() {
            return Err(Error::EmptySample);
        }

        info!(
            "Generating fallback parser from {} sample lines",
            sample.lines().count()
        );

        let prompt = parser_generation_prompt(sample);
        let agent = WeightLogParserAgent::default();

        match agent.execute(prompt.into()).await {
            Ok(response) => {
                let parser = into_generated_parser(response)?;
                info!(
                    "Generated parser: {} chars, summary: {}",
                    parser.parser_source.chars().count(),
                    parser.summary.as_deref().unwrap_or("-")
                );
                Ok(parser)
            }
            Err(e) => {
                error!("Failed to generate fallback parser: {}", e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ParserSourceGenerator for ParserGenerator {
    async fn generate_parser_source(&self, sample: &str) -> weighin_core::Result<GeneratedParser> {
        Ok(self.generate(sample).await?)
    }
}

fn into_generated_parser(response: ParserSourceResponse) -> Result<GeneratedParser> {
    let parser_source = strip_code_fences(&response.parser_source);
    if parser_source.is_empty() {
        return Err(Error::EmptySource);
    }

    let len = parser_source.chars().count();
    if len > MAX_PARSER_SOURCE_LEN {
        // The sandbox rejects it; surface the size here too.
        warn!(
            "Generated parser is {} chars, over the {} char limit",
            len, MAX_PARSER_SOURCE_LEN
        );
    }
    debug!("Generated parser source:\n{}", parser_source);

    let summary = response
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(GeneratedParser {
        parser_source,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(source: &str, summary: Option<&str>) -> ParserSourceResponse {
        // `#[type_marker]` adds a private `__type` field, so build via serde
        serde_json::from_value(serde_json::json!({
            "parser_source": source,
            "summary": summary,
        }))
        .unwrap()
    }

    #[test]
    fn test_into_generated_parser_strips_fences() {
        let parser = into_generated_parser(response(
            "```js\nfunction parseWeightLog(t) { return []; }\n```",
            Some("  Dash separated lines  "),
        ))
        .unwrap();

        assert_eq!(parser.parser_source, "function parseWeightLog(t) { return []; }");
        assert_eq!(parser.summary.as_deref(), Some("Dash separated lines"));
    }

    #[test]
    fn test_into_generated_parser_rejects_empty_source() {
        let result = into_generated_parser(response("```\n```", None));
        assert!(matches!(result, Err(Error::EmptySource)));
    }

    #[test]
    fn test_blank_summary_is_dropped() {
        let parser = into_generated_parser(response("function parseWeightLog(t) { return []; }", Some(" ")))
            .unwrap();
        assert_eq!(parser.summary, None);
    }

    #[test]
    fn test_response_accepts_camel_case() {
        let parsed: ParserSourceResponse =
            serde_json::from_str(r#"{"parserSource": "function parseWeightLog(t) { return []; }"}"#)
                .unwrap();
        assert!(parsed.parser_source.contains("parseWeightLog"));
        assert_eq!(parsed.summary, None);
    }

    #[tokio::test]
    async fn test_empty_sample_is_rejected() {
        let generator = ParserGenerator::new().await.unwrap();
        let result = generator.generate("   \n").await;
        assert!(matches!(result, Err(Error::EmptySample)));

        let core_result = generator.generate_parser_source("").await;
        assert!(matches!(core_result, Err(weighin_core::Error::Generator(_))));
    }

    #[test]
    fn test_default_options() {
        let options = GenerationOptions::default();
        assert_eq!(options.model, "claude-sonnet-4-5");
        assert!(options.temperature <= 1.0);
    }
}

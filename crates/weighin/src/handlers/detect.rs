//! Detect command

use crate::state::AppState;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use sen::{Args, CliError, CliResult, State};
use std::path::PathBuf;

/// Show how each registered handler scores a file
///
/// Usage:
///   weighin detect fitbit_weight.csv
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// File to inspect
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[sen::handler]
pub async fn detect(state: State<AppState>, Args(args): Args<DetectArgs>) -> CliResult<String> {
    let app = state.read().await;

    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| CliError::user(format!("Failed to read {}: {}", args.file.display(), e)))?;

    let registry = app.importer.registry();
    let scores = registry.score_all(&content);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Handler").fg(Color::Cyan),
            Cell::new("Label").fg(Color::Cyan),
            Cell::new("Confidence").fg(Color::Cyan),
        ]);

    for score in &scores {
        table.add_row(vec![
            score.id.clone(),
            score.label.clone(),
            format!("{:.2}", score.confidence),
        ]);
    }

    let chosen = match registry.detect_handler(&content) {
        Some(handler) => format!("Detected: {} ({})", handler.label(), handler.id()),
        None => "Detected: none (import would use the AI fallback)".to_string(),
    };

    Ok(format!("\n{}\n\n{}", table, chosen))
}

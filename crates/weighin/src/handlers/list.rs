//! List command

use super::DEFAULT_PROFILE;
use crate::state::AppState;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use sen::{Args, CliError, CliResult, State};
use weighin_core::normalize::normalize_instant;
use weighin_core::{ListOptions, WeightLogOperations};

/// List stored observations, newest first
///
/// Usage:
///   weighin list
///   weighin list --profile alice --limit 20
///   weighin list --since 2024-01-01
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Profile to list
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Maximum number of observations
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Only observations recorded on or after this date
    #[arg(short, long)]
    pub since: Option<String>,
}

#[sen::handler]
pub async fn list(state: State<AppState>, Args(args): Args<ListArgs>) -> CliResult<String> {
    let app = state.read().await;

    let mut options = ListOptions::new();
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    if let Some(since) = &args.since {
        let instant = normalize_instant(&serde_json::Value::String(since.clone()))
            .ok_or_else(|| CliError::user(format!("Unrecognized date: {}", since)))?;
        options = options.since(instant);
    }

    let store = app.db.store();
    let observations = store
        .list(&args.profile, options)
        .await
        .map_err(|e| CliError::system(format!("Failed to list observations: {}", e)))?;

    if observations.is_empty() {
        return Ok(format!("No observations found for profile {}.", args.profile));
    }

    let total = store
        .count(&args.profile)
        .await
        .map_err(|e| CliError::system(format!("Failed to count observations: {}", e)))?;

    // Build table
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Recorded At").fg(Color::Green),
            Cell::new("Weight").fg(Color::Green),
            Cell::new("Unit").fg(Color::Green),
            Cell::new("Import").fg(Color::Green),
        ]);

    for stored in &observations {
        let obs = &stored.observation;
        table.add_row(vec![
            obs.recorded_at.clone(),
            format!("{:.1}", obs.weight_value),
            obs.unit.to_string(),
            stored.import_id.clone(),
        ]);
    }

    Ok(format!(
        "\n{}\n\nShowing {} of {} observations",
        table,
        observations.len(),
        total
    ))
}

//! Formats command

use crate::state::AppState;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use sen::{CliResult, State};

/// List registered import handlers in detection order
///
/// Usage:
///   weighin formats
pub async fn formats(state: State<AppState>) -> CliResult<String> {
    let app = state.read().await;
    let registry = app.importer.registry();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Label").fg(Color::Cyan),
        ]);

    for (i, handler) in registry.handlers().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            handler.id().to_string(),
            handler.label().to_string(),
        ]);
    }

    Ok(format!("\n{}\n\nTotal: {} handlers", table, registry.len()))
}

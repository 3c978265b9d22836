//! Undo command

use crate::state::AppState;
use clap::Parser;
use sen::{Args, CliError, CliResult, State};
use weighin_core::{Error, WeightLogOperations};

/// Remove every observation written by one import
///
/// Usage:
///   weighin undo 3f2b7c9e-...
#[derive(Parser, Debug)]
pub struct UndoArgs {
    /// Import ID printed by `weighin import`
    #[arg(value_name = "IMPORT_ID")]
    pub import_id: String,
}

#[sen::handler]
pub async fn undo(state: State<AppState>, Args(args): Args<UndoArgs>) -> CliResult<String> {
    let app = state.read().await;

    let removed = app
        .db
        .store()
        .delete_import(&args.import_id)
        .await
        .map_err(|e| match e {
            Error::NotFound(id) => CliError::user(format!("Import not found: {}", id)),
            other => CliError::system(format!("Failed to undo import: {}", other)),
        })?;

    Ok(format!(
        "✓ Removed import {} ({} observations)",
        args.import_id, removed
    ))
}

//! Import command - read weight log files into the local database

use super::DEFAULT_PROFILE;
use crate::state::AppState;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use sen::{Args, CliError, CliResult, State};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use weighin_core::{
    ImportOutcome, ImportRecord, WeightLogImporter, WeightLogOperations, WeightLogStore,
};

/// Import weight logs from a file or directory
///
/// Usage:
///   weighin import fitbit_weight.csv
///   weighin import ~/exports --profile alice --dry-run
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// File to import, or a directory to scan for .csv, .tsv and .txt files
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Profile the observations belong to
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,

    /// Never send a sample to the LLM; unknown formats fail instead
    #[arg(long)]
    pub no_ai: bool,

    /// Dry run - parse and report without writing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Import files even if the same content was imported before
    #[arg(short, long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// What happened to one input file before anything is written
enum FileResult {
    Parsed {
        path: PathBuf,
        hash: String,
        outcome: ImportOutcome,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

#[sen::handler]
pub async fn import(state: State<AppState>, Args(args): Args<ImportArgs>) -> CliResult<String> {
    let app = state.read().await;

    let files = collect_import_files(&args.path)?;
    if files.is_empty() {
        return Ok(format!(
            "No importable files found in {}",
            args.path.display()
        ));
    }
    info!("Importing {} file(s) for profile {}", files.len(), args.profile);

    let store = app.db.store();
    let importer = app.importer(!args.no_ai);

    let mut seen = HashMap::new();
    let mut results = Vec::with_capacity(files.len());
    for path in files {
        let result = process_file(&store, importer, &path, &args, &mut seen).await;
        results.push(result);
    }

    let pending: usize = results
        .iter()
        .map(|r| match r {
            FileResult::Parsed { outcome, .. } => outcome.observations.len(),
            _ => 0,
        })
        .sum();

    if args.dry_run {
        return Ok(format!(
            "\n{}\n\nDry run: {} observations would be imported",
            summary_table(&results, &[]),
            pending
        ));
    }

    if pending > 0 && !args.yes && !confirm_write(pending, &args.profile)? {
        return Ok("Import cancelled. Nothing was written.".to_string());
    }

    let (statuses, imported) = write_batches(&store, &args.profile, &results).await;

    Ok(format!(
        "\n{}\n\nImported {} observations for profile {}",
        summary_table(&results, &statuses),
        imported,
        args.profile
    ))
}

/// Store each parsed file as its own batch.
///
/// A failed write is reported in that file's status; later files are
/// still written so every committed import ID gets printed.
async fn write_batches<S>(store: &S, profile: &str, results: &[FileResult]) -> (Vec<String>, usize)
where
    S: WeightLogOperations + Sync,
{
    let mut statuses = Vec::with_capacity(results.len());
    let mut imported = 0;
    for result in results {
        let status = match result {
            FileResult::Parsed {
                path,
                hash,
                outcome,
            } if !outcome.observations.is_empty() => {
                let record = ImportRecord {
                    source: outcome.source.describe(),
                    file_hash: Some(hash.clone()),
                };
                match store.insert_batch(profile, &outcome.observations, record).await {
                    Ok(import_id) => {
                        imported += outcome.observations.len();
                        format!("✓ {}", import_id)
                    }
                    Err(e) => {
                        warn!("Failed to store {}: {}", path.display(), e);
                        format!("✗ not stored: {}", e)
                    }
                }
            }
            FileResult::Parsed { .. } => "no observations".to_string(),
            FileResult::Skipped { reason, .. } => reason.clone(),
            FileResult::Failed { error, .. } => format!("✗ {}", error),
        };
        statuses.push(status);
    }

    (statuses, imported)
}

async fn process_file(
    store: &WeightLogStore,
    importer: &WeightLogImporter,
    path: &Path,
    args: &ImportArgs,
    seen: &mut HashMap<String, PathBuf>,
) -> FileResult {
    let hash = match calculate_file_hash(path) {
        Ok(hash) => hash,
        Err(e) => {
            return FileResult::Failed {
                path: path.to_path_buf(),
                error: e,
            }
        }
    };

    if let Some(first) = claim_hash(seen, &hash, path) {
        debug!("Skipping {}: same content as {}", path.display(), first.display());
        return FileResult::Skipped {
            path: path.to_path_buf(),
            reason: format!("duplicate of {}", first.display()),
        };
    }

    if !args.force {
        match store.find_import_by_hash(&args.profile, &hash).await {
            Ok(Some(import_id)) => {
                debug!("Skipping {}: already imported as {}", path.display(), import_id);
                return FileResult::Skipped {
                    path: path.to_path_buf(),
                    reason: format!("already imported ({})", import_id),
                };
            }
            Ok(None) => {}
            Err(e) => {
                return FileResult::Failed {
                    path: path.to_path_buf(),
                    error: format!("Database error: {}", e),
                }
            }
        }
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return FileResult::Failed {
                path: path.to_path_buf(),
                error: format!("Failed to read file: {}", e),
            }
        }
    };

    // Only the fallback path is slow enough to need a spinner.
    let spinner = if importer.options().fallback_enabled
        && importer.registry().detect_handler(&content).is_none()
    {
        Some(fallback_spinner(path))
    } else {
        None
    };

    let result = importer.import(&content).await;

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match result {
        Ok(outcome) => {
            info!(
                "{}: {} observations via {}",
                path.display(),
                outcome.observations.len(),
                outcome.source.describe()
            );
            FileResult::Parsed {
                path: path.to_path_buf(),
                hash,
                outcome,
            }
        }
        Err(e) => {
            warn!("Failed to import {}: {}", path.display(), e);
            FileResult::Failed {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        }
    }
}

fn fallback_spinner(path: &Path) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!(
        "Unrecognized format, generating a parser for {}",
        path.display()
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn confirm_write(pending: usize, profile: &str) -> CliResult<bool> {
    if !std::io::stdin().is_terminal() {
        return Err(CliError::user(
            "Refusing to write without confirmation. Pass --yes to import non-interactively.",
        ));
    }

    Confirm::new()
        .with_prompt(format!(
            "Write {} observations to profile {}?",
            pending, profile
        ))
        .default(true)
        .interact()
        .map_err(|e| CliError::system(format!("Failed to read confirmation: {}", e)))
}

fn summary_table(results: &[FileResult], statuses: &[String]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("File").fg(Color::Green),
            Cell::new("Source").fg(Color::Green),
            Cell::new("Observations").fg(Color::Green),
            Cell::new("Dropped").fg(Color::Green),
            Cell::new("Status").fg(Color::Green),
        ]);

    for (i, result) in results.iter().enumerate() {
        let status = statuses.get(i).cloned();
        let row = match result {
            FileResult::Parsed { path, outcome, .. } => vec![
                path.display().to_string(),
                outcome.source.describe(),
                outcome.observations.len().to_string(),
                outcome.dropped_rows().to_string(),
                status.unwrap_or_else(|| "ready".to_string()),
            ],
            FileResult::Skipped { path, reason } => vec![
                path.display().to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                status.unwrap_or_else(|| reason.clone()),
            ],
            FileResult::Failed { path, error } => vec![
                path.display().to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                status.unwrap_or_else(|| format!("✗ {}", error)),
            ],
        };
        table.add_row(row);
    }

    table
}

/// Files to import: the path itself, or every candidate file under it
fn collect_import_files(path: &Path) -> CliResult<Vec<PathBuf>> {
    if !path.exists() {
        return Err(CliError::user(format!("Path not found: {}", path.display())));
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            let path = entry.path();

            // Filter by extension
            if let Some(ext) = path.extension() {
                let ext_str = ext.to_string_lossy().to_lowercase();
                if matches!(ext_str.as_str(), "csv" | "tsv" | "txt") {
                    files.push(path.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Record `hash` for this run; returns the earlier file if it was already seen
fn claim_hash(seen: &mut HashMap<String, PathBuf>, hash: &str, path: &Path) -> Option<PathBuf> {
    if let Some(first) = seen.get(hash) {
        return Some(first.clone());
    }
    seen.insert(hash.to_string(), path.to_path_buf());
    None
}

/// SHA-256 of the file contents, hex encoded
fn calculate_file_hash(path: &Path) -> Result<String, String> {
    let content = std::fs::read(path).map_err(|e| format!("Failed to read file: {}", e))?;

    let mut hasher = Sha256::new();
    hasher.update(&content);
    let hash = hasher.finalize();

    Ok(format!("{:x}", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use weighin_core::{
        Error, ImportSource, ListOptions, StoredObservation, WeightObservation, WeightUnit,
    };

    /// Store whose `fail_on`-th insert fails
    struct FlakyStore {
        calls: Mutex<usize>,
        fail_on: usize,
    }

    #[async_trait]
    impl WeightLogOperations for FlakyStore {
        async fn insert_batch(
            &self,
            _profile_id: &str,
            _observations: &[WeightObservation],
            _record: ImportRecord,
        ) -> weighin_core::Result<String> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == self.fail_on {
                return Err(Error::Other("disk full".to_string()));
            }
            Ok(format!("import-{}", *calls))
        }

        async fn list(
            &self,
            _profile_id: &str,
            _options: ListOptions,
        ) -> weighin_core::Result<Vec<StoredObservation>> {
            Ok(Vec::new())
        }

        async fn count(&self, _profile_id: &str) -> weighin_core::Result<i64> {
            Ok(0)
        }

        async fn find_import_by_hash(
            &self,
            _profile_id: &str,
            _file_hash: &str,
        ) -> weighin_core::Result<Option<String>> {
            Ok(None)
        }

        async fn delete_import(&self, _import_id: &str) -> weighin_core::Result<u64> {
            Ok(0)
        }
    }

    fn parsed(name: &str, readings: usize) -> FileResult {
        let observations = (0..readings)
            .map(|day| {
                WeightObservation::new(
                    180.0,
                    WeightUnit::Lb,
                    format!("2024-01-0{}T09:00:00.000Z", day + 1),
                )
                .unwrap()
            })
            .collect::<Vec<_>>();
        FileResult::Parsed {
            path: PathBuf::from(name),
            hash: format!("hash-{}", name),
            outcome: ImportOutcome {
                candidate_rows: observations.len(),
                observations,
                source: ImportSource::Handler {
                    id: "generic-weight-csv".to_string(),
                    label: "Generic date/weight CSV".to_string(),
                },
            },
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_hide_committed_imports() {
        let store = FlakyStore {
            calls: Mutex::new(0),
            fail_on: 2,
        };
        let results = vec![parsed("a.csv", 2), parsed("b.csv", 1), parsed("c.csv", 1)];

        let (statuses, imported) = write_batches(&store, "alice", &results).await;

        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0], "✓ import-1");
        assert!(statuses[1].starts_with("✗"));
        assert!(statuses[1].contains("disk full"));
        assert_eq!(statuses[2], "✓ import-3");
        assert_eq!(imported, 3);

        let table = summary_table(&results, &statuses).to_string();
        assert!(table.contains("import-1"));
        assert!(table.contains("import-3"));
    }

    #[tokio::test]
    async fn test_skipped_and_empty_files_are_not_written() {
        let store = FlakyStore {
            calls: Mutex::new(0),
            fail_on: 0,
        };
        let results = vec![
            parsed("empty.csv", 0),
            FileResult::Skipped {
                path: PathBuf::from("dup.csv"),
                reason: "duplicate of a.csv".to_string(),
            },
        ];

        let (statuses, imported) = write_batches(&store, "alice", &results).await;

        assert_eq!(statuses, vec!["no observations", "duplicate of a.csv"]);
        assert_eq!(imported, 0);
        assert_eq!(*store.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_identical_files_in_one_run_are_claimed_once() {
        let temp_dir = TempDir::new().unwrap();
        let content = "Date,Weight\n2024-01-01,180\n";
        std::fs::write(temp_dir.path().join("a.csv"), content).unwrap();
        std::fs::write(temp_dir.path().join("b.csv"), content).unwrap();
        std::fs::write(temp_dir.path().join("c.txt"), "Date,Weight\n2024-01-02,181\n").unwrap();
        std::fs::write(temp_dir.path().join("notes.md"), content).unwrap();

        let files = collect_import_files(temp_dir.path()).unwrap();
        assert_eq!(files.len(), 3);

        let mut seen = HashMap::new();
        let claims: Vec<Option<PathBuf>> = files
            .iter()
            .map(|path| {
                let hash = calculate_file_hash(path).unwrap();
                claim_hash(&mut seen, &hash, path)
            })
            .collect();

        assert_eq!(claims[0], None);
        assert_eq!(claims[1], Some(files[0].clone()));
        assert_eq!(claims[2], None);
    }

    #[test]
    fn test_missing_path_is_a_user_error() {
        assert!(collect_import_files(Path::new("/nonexistent/weighin/exports")).is_err());
    }
}

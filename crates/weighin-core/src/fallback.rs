//! Sandboxed execution of generated fallback parsers
//!
//! When no built-in handler recognizes a file, a language model writes a
//! small JavaScript `parseWeightLog(fileText)` function for it. That code
//! is untrusted. It runs in a fresh embedded engine context per call with
//! only the ECMAScript built-ins available: no console, filesystem,
//! network, timers or module loader. Loop and recursion limits bound the
//! engine, and [`run_with_deadline`] adds a wall-clock limit.
//!
//! Loop limits apply per loop, so nested loops can still run for a long
//! time. Under [`SandboxIsolation::Process`] the engine runs in a child
//! process (see [`serve_sandbox_worker`]) that is killed at the deadline.
//! Under [`SandboxIsolation::Thread`] the deadline only stops waiting; the
//! script keeps its blocking thread until the engine limits end it.

use boa_engine::{Context, JsError, JsString, JsValue, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::delimited::strip_bom;
use crate::error::FallbackError;
use crate::types::{observation_from_row, WeightObservation};

/// Generated sources longer than this are refused without running
pub const MAX_PARSER_SOURCE_LEN: usize = 8000;

/// Function the generated source must define
pub const ENTRY_POINT: &str = "parseWeightLog";

/// Lines of the file shown to the model
pub const DEFAULT_SAMPLE_LINES: usize = 5;

/// First argument that switches a host binary into sandbox worker mode
pub const SANDBOX_WORKER_ARG: &str = "__sandbox-worker";

/// Resource limits for one sandboxed run
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Wall-clock limit, enforced by [`run_with_deadline`]
    pub timeout: Duration,
    /// Maximum iterations of any single loop
    pub loop_iteration_limit: u64,
    /// Maximum call depth
    pub recursion_limit: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            loop_iteration_limit: 5_000_000,
            recursion_limit: 512,
        }
    }
}

/// Where the engine runs
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SandboxIsolation {
    /// A blocking thread of this process
    #[default]
    Thread,
    /// A child process, killed when the deadline passes
    Process(WorkerCommand),
}

/// Command that starts a sandbox worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// The running executable with [`SANDBOX_WORKER_ARG`]; its `main` must
    /// call [`serve_sandbox_worker`] when it sees that argument.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// `program` with [`SANDBOX_WORKER_ARG`]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![SANDBOX_WORKER_ARG.to_string()],
        }
    }
}

/// Observations from one run, and how many rows the parser returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRun {
    pub observations: Vec<WeightObservation>,
    pub candidate_rows: usize,
}

/// What the host sends a worker on stdin
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest {
    parser_source: String,
    file_content: String,
    loop_iteration_limit: u64,
    recursion_limit: usize,
}

/// Refuse oversized generated sources
pub fn ensure_source_within_limit(parser_source: &str) -> Result<(), FallbackError> {
    let len = parser_source.chars().count();
    if len > MAX_PARSER_SOURCE_LEN {
        return Err(FallbackError::SourceTooLarge {
            len,
            max: MAX_PARSER_SOURCE_LEN,
        });
    }
    Ok(())
}

/// First `n` non-empty lines of a file, for the model prompt
pub fn sample_lines(content: &str, n: usize) -> String {
    strip_bom(content)
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .take(n)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run a generated parser against the full file with default limits
pub fn run_fallback_parser(
    parser_source: &str,
    file_content: &str,
) -> Result<Vec<WeightObservation>, FallbackError> {
    run_fallback_parser_with_limits(parser_source, file_content, &SandboxLimits::default())
}

/// Run a generated parser against the full file.
///
/// Structural failures are errors. Individual rows that fail validation
/// are dropped.
pub fn run_fallback_parser_with_limits(
    parser_source: &str,
    file_content: &str,
    limits: &SandboxLimits,
) -> Result<Vec<WeightObservation>, FallbackError> {
    run_parser(parser_source, file_content, limits).map(|run| run.observations)
}

/// Like [`run_fallback_parser_with_limits`], also reporting the number of
/// rows the parser returned before validation.
pub fn run_parser(
    parser_source: &str,
    file_content: &str,
    limits: &SandboxLimits,
) -> Result<FallbackRun, FallbackError> {
    ensure_source_within_limit(parser_source)?;

    let rows = match execute(parser_source, file_content, limits)? {
        Value::Array(rows) => rows,
        other => return Err(FallbackError::NotAnArray(json_type_name(&other).to_string())),
    };

    let candidate_rows = rows.len();
    let observations: Vec<WeightObservation> = rows
        .iter()
        .filter_map(Value::as_object)
        .filter_map(observation_from_row)
        .collect();

    info!(
        "Fallback parser returned {} rows, {} valid observations",
        candidate_rows,
        observations.len()
    );
    Ok(FallbackRun {
        observations,
        candidate_rows,
    })
}

/// Run a generated parser under `limits.timeout`
pub async fn run_with_deadline(
    parser_source: String,
    file_content: String,
    limits: SandboxLimits,
    isolation: &SandboxIsolation,
) -> Result<FallbackRun, FallbackError> {
    ensure_source_within_limit(&parser_source)?;

    match isolation {
        SandboxIsolation::Thread => run_on_thread(parser_source, file_content, limits).await,
        SandboxIsolation::Process(command) => {
            run_in_worker(command, parser_source, file_content, limits).await
        }
    }
}

async fn run_on_thread(
    parser_source: String,
    file_content: String,
    limits: SandboxLimits,
) -> Result<FallbackRun, FallbackError> {
    let timeout = limits.timeout;
    let task =
        tokio::task::spawn_blocking(move || run_parser(&parser_source, &file_content, &limits));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(FallbackError::Sandbox(join_error.to_string())),
        Err(_) => {
            warn!("Fallback parser timed out; its thread runs until the engine limits stop it");
            Err(FallbackError::Timeout(timeout))
        }
    }
}

async fn run_in_worker(
    command: &WorkerCommand,
    parser_source: String,
    file_content: String,
    limits: SandboxLimits,
) -> Result<FallbackRun, FallbackError> {
    let request = WorkerRequest {
        parser_source,
        file_content,
        loop_iteration_limit: limits.loop_iteration_limit,
        recursion_limit: limits.recursion_limit,
    };
    let payload =
        serde_json::to_vec(&request).map_err(|e| FallbackError::Sandbox(e.to_string()))?;

    debug!("Starting sandbox worker: {}", command.program.display());
    let mut child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FallbackError::Sandbox(format!("failed to start worker: {}", e)))?;

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(FallbackError::Sandbox("worker pipes unavailable".to_string()));
    };

    let exchange = async {
        stdin.write_all(&payload).await?;
        drop(stdin);
        let mut reply = Vec::new();
        stdout.read_to_end(&mut reply).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, reply))
    };

    let outcome = tokio::time::timeout(limits.timeout, exchange).await;
    let (status, reply) = match outcome {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => return Err(FallbackError::Sandbox(format!("worker I/O failed: {}", e))),
        Err(_) => {
            // kill() also reaps the child
            if let Err(e) = child.kill().await {
                error!("Failed to stop sandbox worker: {}", e);
            }
            return Err(FallbackError::Timeout(limits.timeout));
        }
    };

    if !status.success() {
        return Err(FallbackError::Sandbox(format!("worker exited with {}", status)));
    }

    serde_json::from_slice::<Result<FallbackRun, FallbackError>>(&reply)
        .map_err(|e| FallbackError::Sandbox(format!("unreadable worker reply: {}", e)))?
}

/// Worker side of [`SandboxIsolation::Process`].
///
/// Reads one request from stdin, runs it and writes the result to stdout.
/// Returns the process exit code.
pub fn serve_sandbox_worker() -> i32 {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        error!("Sandbox worker could not read its request: {}", e);
        return 2;
    }

    let request: WorkerRequest = match serde_json::from_str(&input) {
        Ok(request) => request,
        Err(e) => {
            error!("Sandbox worker received a malformed request: {}", e);
            return 2;
        }
    };

    let limits = SandboxLimits {
        loop_iteration_limit: request.loop_iteration_limit,
        recursion_limit: request.recursion_limit,
        ..SandboxLimits::default()
    };
    let result = run_parser(&request.parser_source, &request.file_content, &limits);

    let mut stdout = std::io::stdout().lock();
    match serde_json::to_writer(&mut stdout, &result) {
        Ok(()) => match stdout.flush() {
            Ok(()) => 0,
            Err(_) => 2,
        },
        Err(e) => {
            error!("Sandbox worker could not write its reply: {}", e);
            2
        }
    }
}

fn wrap_source(parser_source: &str) -> String {
    format!(
        "(function () {{\n\"use strict\";\n{}\n;\nreturn typeof {} === \"function\" ? {} : undefined;\n}})()",
        parser_source, ENTRY_POINT, ENTRY_POINT
    )
}

/// Evaluate the snippet, call the entry point and read the result back
/// as JSON text.
fn execute(
    parser_source: &str,
    file_content: &str,
    limits: &SandboxLimits,
) -> Result<Value, FallbackError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    // Captured before the snippet runs so it cannot swap it out.
    let stringify = context
        .eval(Source::from_bytes("JSON.stringify"))
        .map_err(|e| FallbackError::Sandbox(e.to_string()))?;

    let wrapped = wrap_source(parser_source);
    let entry = context
        .eval(Source::from_bytes(wrapped.as_bytes()))
        .map_err(|e| FallbackError::Compile(describe(&e, &mut context)))?;
    let Some(entry) = entry.as_callable() else {
        return Err(FallbackError::MissingEntryPoint);
    };

    debug!("Calling {} on {} bytes", ENTRY_POINT, file_content.len());
    let result = entry
        .call(
            &JsValue::undefined(),
            &[JsValue::from(JsString::from(file_content))],
            &mut context,
        )
        .map_err(|e| FallbackError::Execution(describe(&e, &mut context)))?;

    if !result.as_object().is_some_and(|object| object.is_array()) {
        return Err(FallbackError::NotAnArray(js_type_name(&result)));
    }

    let Some(stringify) = stringify.as_callable() else {
        return Err(FallbackError::Sandbox("JSON.stringify is unavailable".to_string()));
    };
    let json_text = stringify
        .call(&JsValue::undefined(), &[result], &mut context)
        .map_err(|e| FallbackError::Execution(e.to_string()))?;
    let Some(json_text) = json_text.as_string().map(|s| s.to_std_string_escaped()) else {
        return Err(FallbackError::Sandbox("result could not be serialized".to_string()));
    };

    serde_json::from_str(&json_text).map_err(|e| FallbackError::Sandbox(e.to_string()))
}

/// Prefer the native error text (`Error: message`) over the raw value
fn describe(error: &JsError, context: &mut Context) -> String {
    error
        .try_native(context)
        .map(|native| native.to_string())
        .unwrap_or_else(|_| error.to_string())
}

fn js_type_name(value: &JsValue) -> String {
    let name = if value.is_null() {
        "null"
    } else if value.is_undefined() {
        "undefined"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_number() || value.is_bigint() {
        "number"
    } else if value.is_string() {
        "string"
    } else if value.is_symbol() {
        "symbol"
    } else if value.is_callable() {
        "function"
    } else {
        "object"
    };
    name.to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WeightUnit;

    const FREE_TEXT: &str = "weigh-ins\n\
        2024-01-01: 180.4 lbs\n\
        2024-01-02: nothing today\n\
        2024-01-03: 179.9 lbs\n";

    const LINE_PARSER: &str = r#"
function parseWeightLog(fileText) {
  var out = [];
  var lines = fileText.split("\n");
  for (var i = 0; i < lines.length; i++) {
    var m = lines[i].match(/^(\d{4}-\d{2}-\d{2}):\s*([\d.]+)\s*(\w+)?/);
    if (m) {
      out.push({ date: m[1], weight: parseFloat(m[2]), unit: m[3] || "lb" });
    }
  }
  return out;
}
"#;

    #[test]
    fn test_runs_generated_parser() {
        let observations = run_fallback_parser(LINE_PARSER, FREE_TEXT).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].weight_value, 180.4);
        assert_eq!(observations[0].unit, WeightUnit::Lb);
        assert_eq!(observations[1].weight_value, 179.9);
    }

    #[test]
    fn test_aliases_units_and_bad_rows() {
        let source = r#"
const parseWeightLog = (text) => [
  { value: "81.5", recordedAt: "2024-05-01T07:00:00Z", weightUnit: "KG" },
  { weight: 0, day: "2024-05-02" },
  { weight: 82, enteredAt: "garbage" },
  { weight: 82.26, datetime: "2024-05-03" },
  "not an object",
  null
];
"#;
        let observations = run_fallback_parser(source, "anything").unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].unit, WeightUnit::Kg);
        assert_eq!(observations[0].recorded_at, "2024-05-01T07:00:00.000Z");
        assert_eq!(observations[1].weight_value, 82.3);
        assert_eq!(observations[1].unit, WeightUnit::Lb);
    }

    #[test]
    fn test_dates_from_date_objects() {
        let source = r#"
function parseWeightLog(text) {
  return [{ weight: 150, date: new Date(Date.UTC(2024, 0, 2, 15, 30)) }];
}
"#;
        let observations = run_fallback_parser(source, "").unwrap();
        assert_eq!(observations[0].recorded_at, "2024-01-02T15:30:00.000Z");
    }

    #[test]
    fn test_oversized_source_rejected_before_running() {
        let source = format!("{}\nfunction parseWeightLog() {{ return []; }}", "/".repeat(8001));
        let err = run_fallback_parser(&source, "x").unwrap_err();
        assert!(matches!(err, FallbackError::SourceTooLarge { max: 8000, .. }));

        let prefix = "function parseWeightLog() { return []; }//";
        let exactly_at_cap = format!("{}{}", prefix, "x".repeat(MAX_PARSER_SOURCE_LEN - prefix.len()));
        assert_eq!(exactly_at_cap.chars().count(), MAX_PARSER_SOURCE_LEN);
        assert!(run_fallback_parser(&exactly_at_cap, "x").is_ok());
    }

    #[test]
    fn test_missing_entry_point_is_an_error() {
        let err = run_fallback_parser("function parse(text) { return []; }", "x").unwrap_err();
        assert!(matches!(err, FallbackError::MissingEntryPoint));

        let err = run_fallback_parser("var parseWeightLog = 42;", "x").unwrap_err();
        assert!(matches!(err, FallbackError::MissingEntryPoint));
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        let err = run_fallback_parser("function parseWeightLog( {", "x").unwrap_err();
        assert!(matches!(err, FallbackError::Compile(_)));
    }

    #[test]
    fn test_throwing_parser_is_an_error() {
        let source = "function parseWeightLog(t) { throw new Error('cannot read'); }";
        let err = run_fallback_parser(source, "x").unwrap_err();
        match err {
            FallbackError::Execution(message) => assert!(message.contains("cannot read")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_array_result_is_an_error() {
        let err = run_fallback_parser("function parseWeightLog(t) { return { rows: [] }; }", "x")
            .unwrap_err();
        assert!(matches!(err, FallbackError::NotAnArray(ref kind) if kind == "object"));

        let err = run_fallback_parser("function parseWeightLog(t) { return null; }", "x").unwrap_err();
        assert!(matches!(err, FallbackError::NotAnArray(ref kind) if kind == "null"));
    }

    #[test]
    fn test_empty_array_is_success() {
        let observations = run_fallback_parser("function parseWeightLog(t) { return []; }", "x").unwrap();
        assert!(observations.is_empty());
    }

    #[test]
    fn test_no_host_capabilities() {
        let source = r#"
function parseWeightLog(t) {
  return [typeof require, typeof process, typeof fetch, typeof console, typeof XMLHttpRequest];
}
"#;
        let observations = run_fallback_parser(source, "x").unwrap();
        assert!(observations.is_empty());

        let guarded = r#"
function parseWeightLog(t) {
  if (typeof require !== "undefined" || typeof fetch !== "undefined") { throw new Error("escaped"); }
  return [];
}
"#;
        assert!(run_fallback_parser(guarded, "x").is_ok());
    }

    #[test]
    fn test_runaway_loop_hits_limit() {
        let limits = SandboxLimits {
            loop_iteration_limit: 10_000,
            ..SandboxLimits::default()
        };
        let err = run_fallback_parser_with_limits(
            "function parseWeightLog(t) { while (true) {} }",
            "x",
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::Execution(_)));
    }

    #[test]
    fn test_runaway_recursion_hits_limit() {
        let limits = SandboxLimits {
            recursion_limit: 64,
            ..SandboxLimits::default()
        };
        let err = run_fallback_parser_with_limits(
            "function parseWeightLog(t) { return parseWeightLog(t); }",
            "x",
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::Execution(_)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let limits = SandboxLimits {
            timeout: Duration::from_millis(1),
            loop_iteration_limit: 2_000_000,
            ..SandboxLimits::default()
        };
        let err = run_with_deadline(
            "function parseWeightLog(t) { for (;;) {} }".to_string(),
            "x".to_string(),
            limits,
            &SandboxIsolation::Thread,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FallbackError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_deadline_met() {
        let run = run_with_deadline(
            LINE_PARSER.to_string(),
            FREE_TEXT.to_string(),
            SandboxLimits::default(),
            &SandboxIsolation::Thread,
        )
        .await
        .unwrap();
        assert_eq!(run.observations.len(), 2);
        assert_eq!(run.candidate_rows, 2);
    }

    #[test]
    fn test_candidate_rows_count_everything_returned() {
        let source = r#"
function parseWeightLog(t) {
  return [{ weight: 180, date: "2024-01-01" }, { weight: -1, date: "2024-01-02" }, "junk", null];
}
"#;
        let run = run_parser(source, "x", &SandboxLimits::default()).unwrap();
        assert_eq!(run.candidate_rows, 4);
        assert_eq!(run.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_worker_is_a_sandbox_error() {
        let isolation =
            SandboxIsolation::Process(WorkerCommand::new("/nonexistent/weighin-sandbox-worker"));
        let err = run_with_deadline(
            LINE_PARSER.to_string(),
            FREE_TEXT.to_string(),
            SandboxLimits::default(),
            &isolation,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FallbackError::Sandbox(_)));
    }

    #[test]
    fn test_worker_reply_round_trips_errors() {
        let reply: Result<FallbackRun, FallbackError> =
            Err(FallbackError::Execution("boom".to_string()));
        let text = serde_json::to_string(&reply).unwrap();
        let parsed: Result<FallbackRun, FallbackError> = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, Err(FallbackError::Execution(ref m)) if m == "boom"));
    }

    #[test]
    fn test_sample_lines() {
        let content = "\u{feff}\nheader  \n\n a \nb\nc\nd\ne\nf\n";
        assert_eq!(sample_lines(content, 5), "header\n a\nb\nc\nd");
        assert_eq!(sample_lines("", 5), "");
    }
}

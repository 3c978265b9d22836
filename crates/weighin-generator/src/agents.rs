//! Agent definitions for weighin-generator
//!
//! This module contains Agent trait implementations using llm-toolkit's Agent derive macro.
//! Agents are kept in a separate module to avoid conflicts with the Result<T> type alias.

use llm_toolkit::{ToPrompt, agent, type_marker};
use serde::{Deserialize, Serialize};

/// Structured response carrying a generated weight log parser
///
/// The model sees a few lines of a file no built-in importer recognized and
/// writes a JavaScript function that extracts weight readings from the
/// whole file.
#[type_marker]
#[derive(Serialize, Deserialize, Debug, Clone, ToPrompt)]
#[prompt(mode = "full")]
pub struct ParserSourceResponse {
    /// JavaScript source defining `function parseWeightLog(fileText)`.
    /// It must return an array of objects with `date` (the date text as it
    /// appears in the file), `weight` (number) and `unit` ("lb" or "kg").
    /// Plain ECMAScript only: no require, import, fetch, console or timers.
    #[serde(alias = "parserSource")]
    pub parser_source: String,

    /// One sentence describing the file format that was detected
    #[serde(default)]
    pub summary: Option<String>,
}

/// Agent for writing a parser for an unrecognized weight log format
#[agent(
    expertise = r#"You are an expert at reverse-engineering personal health data exports and writing small, robust JavaScript parsers for them.

Your task is to:
1. Study the sample lines of a weight log whose format is unknown
2. Work out where each reading's date, weight and unit live
3. Write a single JavaScript function `parseWeightLog(fileText)` that parses the FULL file text, not just the sample
4. Return an array of objects shaped like {{ date: string, weight: number, unit: "lb" | "kg" }}

Rules for the code:
- Plain ECMAScript in strict mode; declare every variable
- No require, import, export, fetch, console, timers or any host API
- Skip header, blank and malformed lines instead of throwing
- Keep the date text exactly as written in the file; do not reformat it
- If the unit is not stated anywhere, use "lb"
- Keep the code short, well under 8000 characters

Output a single, valid JSON object with the structure defined by the `ParserSourceResponse` type. Do not include any other text or explanations outside of the JSON object."#,
    output = "ParserSourceResponse",
    backend = "claude"
)]
pub struct WeightLogParserAgent;

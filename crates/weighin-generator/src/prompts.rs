//! Prompt templates for fallback parser generation

use weighin_core::fallback::{ENTRY_POINT, MAX_PARSER_SOURCE_LEN};

/// Build the user prompt for a file sample
pub fn parser_generation_prompt(sample: &str) -> String {
    format!(
        r#"No built-in importer recognized the following weight log. Write a parser for it.

=====================================================================
Sample Start (first non-empty lines of the file)
=====================================================================
{}
=====================================================================
Sample End
=====================================================================

# Contract
Define `function {}(fileText)`:
- `fileText` is the entire file as one string; the sample above is only its beginning
- Return an array; each element is an object with:
  - `date`: the date (and time, if present) exactly as written in the file
  - `weight`: the reading as a number
  - `unit`: "lb" or "kg"
- Field aliases also accepted: `recordedAt`, `timestamp`, `datetime`, `day`, `time`, `enteredAt` for the date; `value` for the weight
- Skip lines that are not readings; never throw for a single bad line
- No I/O of any kind: no require, import, fetch, console or timers
- The whole source must stay under {} characters
"#,
        sample, ENTRY_POINT, MAX_PARSER_SOURCE_LEN
    )
}

/// Remove a surrounding Markdown code fence, if the model added one
pub fn strip_code_fences(source: &str) -> String {
    let trimmed = source.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // Drop the language tag line (```js, ```javascript, ...)
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_sample_and_contract() {
        let prompt = parser_generation_prompt("2024-01-01 - 180 lbs\n2024-01-02 - 179 lbs");
        assert!(prompt.contains("2024-01-02 - 179 lbs"));
        assert!(prompt.contains("function parseWeightLog(fileText)"));
        assert!(prompt.contains("8000"));
        assert!(prompt.contains("enteredAt"));
    }

    #[test]
    fn test_strip_code_fences() {
        let fenced = "```javascript\nfunction parseWeightLog(t) { return []; }\n```\n";
        assert_eq!(strip_code_fences(fenced), "function parseWeightLog(t) { return []; }");

        let bare = "  function parseWeightLog(t) { return []; }  ";
        assert_eq!(strip_code_fences(bare), "function parseWeightLog(t) { return []; }");

        assert_eq!(strip_code_fences("```\n```"), "");
    }
}

//! Delimited text tokenization
//!
//! Import files arrive with an unknown delimiter. The delimiter is sniffed
//! from the header line, then the `csv` crate does the quote-aware
//! splitting.
//!
//! A quote toggles quoting wherever it appears, not only at the start of a
//! field, so `Weight "lbs, kg"` is one cell. Such fields are rewritten into
//! standard CSV quoting before the reader sees them.

use std::borrow::Cow;
use tracing::debug;

/// Delimiters considered when sniffing, in tie-break order
pub const CANDIDATE_DELIMITERS: &[u8] = b",\t;|";

const BOM: char = '\u{feff}';

/// Remove a leading byte-order marker
pub fn strip_bom(content: &str) -> &str {
    content.strip_prefix(BOM).unwrap_or(content)
}

/// First line that is not blank, after BOM removal
pub fn first_non_empty_line(content: &str) -> Option<&str> {
    strip_bom(content)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .find(|line| !line.trim().is_empty())
}

/// Pick the delimiter that occurs most often in `line`.
///
/// Falls back to `,` when nothing occurs or the top count is shared.
pub fn sniff_delimiter(line: &str) -> u8 {
    let counts: Vec<(u8, usize)> = CANDIDATE_DELIMITERS
        .iter()
        .map(|&d| (d, line.bytes().filter(|&b| b == d).count()))
        .collect();

    let max = counts.iter().map(|(_, count)| *count).max().unwrap_or(0);
    if max == 0 {
        return b',';
    }

    let mut leaders = counts.iter().filter(|(_, count)| *count == max);
    match (leaders.next(), leaders.next()) {
        (Some((delimiter, _)), None) => *delimiter,
        _ => b',',
    }
}

/// Split text into rows of cells.
///
/// Rows may be ragged. Rows whose cells are all blank are dropped.
pub fn read_rows(text: &str, delimiter: u8) -> Vec<Vec<String>> {
    let text = requote(text, delimiter);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping unreadable record {}: {}", index, e);
                continue;
            }
        };

        let cells: Vec<String> = record.iter().map(str::to_string).collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(cells);
    }

    rows
}

/// Rewrite `text` so every quote-toggled field uses standard quoting.
///
/// A doubled quote inside quotes is a literal quote.
pub fn requote(text: &str, delimiter: u8) -> Cow<'_, str> {
    if !text.contains('"') {
        return Cow::Borrowed(text);
    }

    let delimiter = char::from(delimiter);
    let mut out = String::with_capacity(text.len() + 8);
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            '\n' | '\r' if !in_quotes => {
                push_field(&mut out, &field, delimiter);
                field.clear();
                out.push(c);
            }
            c if c == delimiter && !in_quotes => {
                push_field(&mut out, &field, delimiter);
                field.clear();
                out.push(c);
            }
            c => field.push(c),
        }
    }
    push_field(&mut out, &field, delimiter);

    Cow::Owned(out)
}

fn push_field(out: &mut String, field: &str, delimiter: char) {
    let needs_quotes = field
        .chars()
        .any(|c| c == delimiter || c == '"' || c == '\n' || c == '\r');
    if needs_quotes {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Tokenize a whole file, sniffing the delimiter from its first line
pub fn tokenize(content: &str) -> Vec<Vec<String>> {
    let content = strip_bom(content);
    let delimiter = first_non_empty_line(content)
        .map(sniff_delimiter)
        .unwrap_or(b',');
    read_rows(content, delimiter)
}

/// Tokenize only the header line
pub fn header_cells(content: &str) -> Vec<String> {
    let Some(line) = first_non_empty_line(content) else {
        return Vec::new();
    };
    read_rows(line, sniff_delimiter(line))
        .into_iter()
        .next()
        .map(|cells| cells.iter().map(|cell| normalize_header(cell)).collect())
        .unwrap_or_default()
}

/// Lowercase a header cell and drop quote characters
pub fn normalize_header(cell: &str) -> String {
    cell.to_lowercase().replace('"', "").trim().to_string()
}

/// Trim a data cell and any stray surrounding quotes
pub fn clean_cell(cell: &str) -> &str {
    cell.trim().trim_matches('"').trim()
}

/// A header cell matches a keyword exactly or as `keyword ...`,
/// so `weight (lbs)` matches `weight`.
pub fn header_matches(cell: &str, keyword: &str) -> bool {
    cell == keyword
        || cell
            .strip_prefix(keyword)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Index of the first header cell matching any candidate keyword
pub fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|cell| candidates.iter().any(|keyword| header_matches(cell, keyword)))
}

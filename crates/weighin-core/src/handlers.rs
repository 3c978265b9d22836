//! Import handlers for known weight export formats

use serde_json::{json, Value};
use tracing::debug;

use crate::delimited::{clean_cell, find_column, header_cells, normalize_header, tokenize};
use crate::normalize::normalize_date_str;
use crate::types::{parse_weight_value, CandidateRow, WeightUnit};
use crate::Result;

/// A pluggable format recognizer and parser.
///
/// Handlers are stateless; both operations are pure functions of the
/// file content.
pub trait ImportHandler: Send + Sync {
    /// Stable identifier
    fn id(&self) -> &str;

    /// Display name
    fn label(&self) -> &str;

    /// Confidence that `content` is in this handler's format.
    /// `0.0` means not recognized.
    fn detect(&self, content: &str) -> Result<f64>;

    /// Extract one candidate row per data row in `content`.
    ///
    /// Rows that will fail validation are still returned so callers can
    /// count them.
    fn parse(&self, content: &str) -> Result<Vec<CandidateRow>>;
}

/// Column layout and recognition hints for a CSV export
#[derive(Debug, Clone, Copy)]
pub struct CsvFormat {
    pub id: &'static str,
    pub label: &'static str,
    /// Keywords accepted for the date column
    pub date_columns: &'static [&'static str],
    /// Keywords accepted for the weight column
    pub weight_columns: &'static [&'static str],
    /// Substrings that identify this exporter among the header cells
    pub hints: &'static [&'static str],
    /// Score when the required columns exist but no hint does
    pub unhinted_confidence: f64,
}

/// Fitbit body weight export
pub const FITBIT_WEIGHT: CsvFormat = CsvFormat {
    id: "fitbit-weight-csv",
    label: "Fitbit weight export",
    date_columns: &["date"],
    weight_columns: &["weight"],
    hints: &["fitbit", "bmi"],
    unhinted_confidence: 0.0,
};

/// Withings measurements export
pub const WITHINGS_WEIGHT: CsvFormat = CsvFormat {
    id: "withings-weight-csv",
    label: "Withings measurements export",
    date_columns: &["date"],
    weight_columns: &["weight"],
    hints: &["fat mass", "bone mass", "muscle mass", "hydration"],
    unhinted_confidence: 0.0,
};

/// Any CSV with a recognizable date and weight column
pub const GENERIC_WEIGHT: CsvFormat = CsvFormat {
    id: "generic-weight-csv",
    label: "Generic date/weight CSV",
    date_columns: &["date", "day", "timestamp", "datetime", "recorded at"],
    weight_columns: &["weight", "body weight"],
    hints: &[],
    unhinted_confidence: 0.5,
};

/// Handler for a delimited export described by a [`CsvFormat`]
#[derive(Debug, Clone, Copy)]
pub struct CsvWeightHandler {
    format: CsvFormat,
}

impl CsvWeightHandler {
    /// Create a handler for the given format
    pub const fn new(format: CsvFormat) -> Self {
        Self { format }
    }

    /// The format this handler recognizes
    pub fn format(&self) -> &CsvFormat {
        &self.format
    }

    /// Score a set of normalized header cells
    pub fn score_headers(&self, headers: &[String]) -> f64 {
        let has_date = find_column(headers, self.format.date_columns).is_some();
        let has_weight = find_column(headers, self.format.weight_columns).is_some();
        if !(has_date && has_weight) {
            return 0.0;
        }

        let hinted = self
            .format
            .hints
            .iter()
            .any(|hint| headers.iter().any(|cell| cell.contains(hint)));

        if hinted {
            1.0
        } else {
            self.format.unhinted_confidence
        }
    }
}

impl ImportHandler for CsvWeightHandler {
    fn id(&self) -> &str {
        self.format.id
    }

    fn label(&self) -> &str {
        self.format.label
    }

    fn detect(&self, content: &str) -> Result<f64> {
        Ok(self.score_headers(&header_cells(content)))
    }

    fn parse(&self, content: &str) -> Result<Vec<CandidateRow>> {
        let rows = tokenize(content);
        let Some((header_row, data_rows)) = rows.split_first() else {
            return Ok(Vec::new());
        };

        let headers: Vec<String> = header_row.iter().map(|cell| normalize_header(cell)).collect();
        let (Some(date_idx), Some(weight_idx)) = (
            find_column(&headers, self.format.date_columns),
            find_column(&headers, self.format.weight_columns),
        ) else {
            debug!("{}: required columns missing, nothing to parse", self.format.id);
            return Ok(Vec::new());
        };

        let header_unit = WeightUnit::infer(&headers[weight_idx]);
        debug!(
            "{}: date column {}, weight column {}, header unit {:?}",
            self.format.id, date_idx, weight_idx, header_unit
        );

        // Every data row becomes a candidate; unusable fields are null so
        // validation rejects the row and it is counted as dropped.
        let mut candidates = Vec::with_capacity(data_rows.len());
        for (line, row) in data_rows.iter().enumerate() {
            let weight_cell = row.get(weight_idx).map(|c| clean_cell(c)).unwrap_or("");
            let date_cell = row.get(date_idx).map(|c| clean_cell(c)).unwrap_or("");

            let weight = parse_weight_value(&Value::String(weight_cell.to_string()));
            let recorded_at = normalize_date_str(date_cell);
            if weight.is_none() {
                debug!("{}: row {} has no usable weight", self.format.id, line + 1);
            }
            if recorded_at.is_none() {
                debug!("{}: row {} has no usable date", self.format.id, line + 1);
            }

            let unit = WeightUnit::infer(weight_cell)
                .or(header_unit)
                .unwrap_or_default();

            if let Value::Object(candidate) = json!({
                "recordedAt": recorded_at,
                "weight": weight,
                "unit": unit.as_str(),
            }) {
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }
}

/// Handlers shipped with the crate, in registration order
pub fn builtin_handlers() -> Vec<Box<dyn ImportHandler>> {
    vec![
        Box::new(CsvWeightHandler::new(FITBIT_WEIGHT)),
        Box::new(CsvWeightHandler::new(WITHINGS_WEIGHT)),
        Box::new(CsvWeightHandler::new(GENERIC_WEIGHT)),
    ]
}

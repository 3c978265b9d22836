//! Weight observation types and the shared row validator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::normalize::{normalize_date, round_one_decimal};

/// Loosely-typed row produced by a handler or the fallback parser,
/// before validation.
pub type CandidateRow = Map<String, Value>;

/// Field names accepted for the weight value
pub const WEIGHT_ALIASES: &[&str] = &["weight", "value", "weightValue"];

/// Field names accepted for the observation date, in lookup order
pub const DATE_ALIASES: &[&str] = &[
    "recordedAt",
    "date",
    "timestamp",
    "datetime",
    "day",
    "time",
    "enteredAt",
];

/// Field names accepted for the unit
pub const UNIT_ALIASES: &[&str] = &["unit", "units", "weightUnit"];

/// Unit of a weight reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    /// Pounds
    #[default]
    Lb,
    /// Kilograms
    Kg,
}

impl WeightUnit {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightUnit::Lb => "lb",
            WeightUnit::Kg => "kg",
        }
    }

    /// Look for a unit marker inside free text.
    ///
    /// `kg` is checked before `lb`.
    pub fn infer(text: &str) -> Option<WeightUnit> {
        let lower = text.to_lowercase();
        if lower.contains("kg") {
            Some(WeightUnit::Kg)
        } else if lower.contains("lb") {
            Some(WeightUnit::Lb)
        } else {
            None
        }
    }
}

impl FromStr for WeightUnit {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, crate::Error> {
        match s.trim().to_lowercase().as_str() {
            "lb" | "lbs" | "pound" | "pounds" => Ok(WeightUnit::Lb),
            "kg" | "kgs" | "kilogram" | "kilograms" => Ok(WeightUnit::Kg),
            _ => Err(crate::Error::InvalidUnit(s.to_string())),
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single normalized weight reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightObservation {
    /// Positive weight, one decimal place
    pub weight_value: f64,
    /// Unit of `weight_value`
    pub unit: WeightUnit,
    /// ISO-8601 UTC timestamp
    pub recorded_at: String,
}

impl WeightObservation {
    /// Create an observation, returning `None` when the value is not a
    /// finite positive number or the timestamp does not parse.
    pub fn new(weight_value: f64, unit: WeightUnit, recorded_at: impl Into<String>) -> Option<Self> {
        if !weight_value.is_finite() {
            return None;
        }
        let weight_value = round_one_decimal(weight_value);
        if weight_value <= 0.0 {
            return None;
        }

        let recorded_at = recorded_at.into();
        DateTime::parse_from_rfc3339(&recorded_at).ok()?;

        Some(Self {
            weight_value,
            unit,
            recorded_at,
        })
    }

    /// Parse `recorded_at` as a UTC instant
    pub fn recorded_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.recorded_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert to JSON
    pub fn to_json(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a loosely-typed weight value.
///
/// Strings are reduced to digits, `.` and `-` before parsing, so
/// `"81.5 kg"` reads as `81.5`.
pub fn parse_weight_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            digits.parse::<f64>().ok()?
        }
        _ => return None,
    };

    if parsed.is_finite() && parsed > 0.0 {
        Some(round_one_decimal(parsed))
    } else {
        None
    }
}

fn first_present<'a>(row: &'a CandidateRow, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| row.get(*alias))
        .find(|value| !value.is_null())
}

fn resolve_unit(row: &CandidateRow, weight: &Value) -> WeightUnit {
    if let Some(unit) = first_present(row, UNIT_ALIASES) {
        let text = match unit {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Some(unit) = WeightUnit::infer(&text) {
            return unit;
        }
    }

    if let Value::String(text) = weight {
        if let Some(unit) = WeightUnit::infer(text) {
            return unit;
        }
    }

    WeightUnit::default()
}

/// Validate a candidate row into an observation.
///
/// Every import path funnels through here, so rows from built-in
/// handlers and from the fallback parser obey the same rules.
pub fn observation_from_row(row: &CandidateRow) -> Option<WeightObservation> {
    let weight = first_present(row, WEIGHT_ALIASES)?;
    let weight_value = parse_weight_value(weight)?;
    let recorded_at = normalize_date(first_present(row, DATE_ALIASES)?)?;
    let unit = resolve_unit(row, weight);

    WeightObservation::new(weight_value, unit, recorded_at)
}

//! Date normalization shared by every import path
//!
//! Dates without a time of day are pinned to 09:00 local time instead of
//! midnight so a reading never slides onto the previous day when it is
//! displayed in a zone west of the one it was recorded in.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Local hour assigned to readings that carry no time of day
pub const DEFAULT_HOUR: u32 = 9;

/// Largest magnitude accepted for an epoch-millisecond timestamp
const MAX_EPOCH_MILLIS: f64 = 8.64e15;

static BARE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid bare date pattern"));

static TIME_OF_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}").expect("valid time of day pattern"));

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m-%d-%Y %H:%M:%S",
    "%m-%d-%Y %H:%M",
    "%b %d, %Y %H:%M:%S",
    "%b %d, %Y %I:%M %p",
];

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y.%m.%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%a %b %d %Y",
    "%a, %b %d, %Y",
];

/// Normalize a loosely-typed date into an ISO-8601 UTC string.
///
/// Numbers are epoch milliseconds. Strings are trimmed; a bare
/// `YYYY-MM-DD` is read as 09:00 local. Anything that does not resolve
/// to a valid instant yields `None`.
///
/// # Example
///
/// ```
/// use weighin_core::normalize::normalize_date;
/// use serde_json::json;
///
/// assert!(normalize_date(&json!("2024-03-15")).is_some());
/// assert!(normalize_date(&json!("not a date")).is_none());
/// ```
pub fn normalize_date(value: &Value) -> Option<String> {
    normalize_instant(value).map(to_iso_string)
}

/// [`normalize_date`] for plain text
pub fn normalize_date_str(value: &str) -> Option<String> {
    normalize_date(&Value::String(value.to_string()))
}

/// Same rules as [`normalize_date`], returning the instant itself
pub fn normalize_instant(value: &Value) -> Option<DateTime<Utc>> {
    let (instant, original) = match value {
        Value::Null => return None,
        Value::Number(n) => (from_epoch_millis(n.as_f64()?)?, n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            (parse_text(trimmed)?, s.clone())
        }
        _ => return None,
    };

    if TIME_OF_DAY.is_match(&original) {
        Some(instant)
    } else {
        at_default_hour(instant)
    }
}

/// Format an instant the way `Date.prototype.toISOString` does
pub fn to_iso_string(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Round to one decimal place
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn from_epoch_millis(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    let millis = millis.trunc();
    if millis.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64)
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if BARE_DATE.is_match(text) {
        let naive = NaiveDateTime::parse_from_str(
            &format!("{}T{:02}:00:00", text, DEFAULT_HOUR),
            "%Y-%m-%dT%H:%M:%S",
        )
        .ok()?;
        return local_to_utc(naive);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return local_to_utc(naive);
        }
    }

    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return local_to_utc(date.and_hms_opt(0, 0, 0)?);
        }
    }

    None
}

/// Ambiguous local times take the earlier instant; skipped ones are invalid.
fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn at_default_hour(instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local_date = instant.with_timezone(&Local).date_naive();
    local_to_utc(local_date.and_hms_opt(DEFAULT_HOUR, 0, 0)?)
}

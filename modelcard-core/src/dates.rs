//! Date validation and conversion.
//!
//! Dates are stored as `YYYYMMDD` strings in form state and in the card
//! document, and displayed as `YYYY/MM/DD` in rendered exports.

use chrono::{Local, NaiveDate};
use serde_json::Value;

use crate::error::{CardError, Result};
use crate::state::FormState;

/// Expected length of a `YYYYMMDD` string.
pub const DATE_STR_LEN: usize = 8;

/// Earliest date accepted from a date input.
pub const MIN_INPUT_DATE: (i32, u32, u32) = (1900, 1, 1);

/// Whether `s` is exactly eight ASCII digits.
pub fn is_yyyymmdd(s: &str) -> bool {
    s.len() == DATE_STR_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a `YYYYMMDD` string into a calendar date.
pub fn to_date(s: &str) -> Option<NaiveDate> {
    if !is_yyyymmdd(s) {
        return None;
    }
    let year: i32 = s[..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Normalise `YYYYMMDD`, `YYYY-MM-DD` or `YYYY/MM/DD` to `YYYYMMDD`.
///
/// Only the shape is checked; calendar validity is left to [`to_date`].
pub fn normalize_to_yyyymmdd(value: &str) -> Option<String> {
    let s: String = value
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != '/')
        .collect();
    is_yyyymmdd(&s).then_some(s)
}

/// Normalise a JSON value holding a date string.
pub fn normalize_value(value: &Value) -> Option<String> {
    value.as_str().and_then(normalize_to_yyyymmdd)
}

/// Display a stored date as `YYYY/MM/DD`, or return the input unchanged
/// when it cannot be parsed.
pub fn format_display(raw: &str) -> String {
    match to_date(raw) {
        Some(d) => d.format("%Y/%m/%d").to_string(),
        None => raw.to_string(),
    }
}

/// Parse user input into a stored date, enforcing the accepted range
/// (1900-01-01 up to today).
pub fn parse_input(raw: &str) -> Result<String> {
    let norm = normalize_to_yyyymmdd(raw)
        .ok_or_else(|| CardError::invalid_value(format!("'{raw}' is not a YYYY-MM-DD date")))?;
    let date = to_date(&norm)
        .ok_or_else(|| CardError::invalid_value(format!("'{raw}' is not a calendar date")))?;
    let (y, m, d) = MIN_INPUT_DATE;
    let min = NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| CardError::invalid_value("invalid minimum date"))?;
    let today = Local::now().date_naive();
    if date < min || date > today {
        return Err(CardError::invalid_value(format!(
            "date {} must be between {} and {}",
            date,
            min,
            today
        )));
    }
    Ok(norm)
}

/// Store `value` under `key` if it is a valid `YYYYMMDD` date, `null` otherwise.
pub fn set_safe_date_field(state: &mut FormState, key: &str, value: Option<&str>) {
    let stored = value
        .filter(|s| to_date(s).is_some())
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null);
    state.set(key, stored);
}

/// Today's date as `YYYYMMDD`.
pub fn today_yyyymmdd() -> String {
    Local::now().date_naive().format("%Y%m%d").to_string()
}

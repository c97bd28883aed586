//! Version numbers and revision history for the card and for the model.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::dates;
use crate::error::{CardError, Result};
use crate::form::round_one_decimal;
use crate::state::{FormState, keys};

/// Step applied when a revision does not name its version.
pub const VERSION_STEP: f64 = 0.1;

/// Version given to the first revision of an unversioned document.
pub const INITIAL_VERSION: f64 = 1.0;

/// What a revision describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionTarget {
    /// The model card document itself.
    Card,
    /// The documented model.
    Model,
}

impl VersionTarget {
    pub fn section(&self) -> &'static str {
        match self {
            VersionTarget::Card => "card_metadata",
            VersionTarget::Model => "model_basic_information",
        }
    }

    fn date_field(&self) -> &'static str {
        match self {
            VersionTarget::Card => "card_creation_date",
            VersionTarget::Model => "creation_date",
        }
    }

    pub fn version_key(&self) -> String {
        keys::field(self.section(), "version_number")
    }

    pub fn changes_key(&self) -> String {
        keys::field(self.section(), "version_changes")
    }

    pub fn history_key(&self) -> String {
        keys::field(self.section(), "revision_history")
    }

    pub fn date_key(&self) -> String {
        keys::field(self.section(), self.date_field())
    }
}

impl fmt::Display for VersionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionTarget::Card => f.write_str("card"),
            VersionTarget::Model => f.write_str("model"),
        }
    }
}

impl FromStr for VersionTarget {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "card" => Ok(VersionTarget::Card),
            "model" => Ok(VersionTarget::Model),
            other => Err(CardError::invalid_value(format!(
                "'{other}' is not a version target (card, model)"
            ))),
        }
    }
}

/// One entry of a revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub version: f64,
    /// `YYYYMMDD`
    pub date: String,
    pub changes: String,
}

/// Read a stored version as a number with one decimal.
/// Absent, non-numeric and non-finite values read as `0.0`.
pub fn coerce_version(value: Option<&Value>) -> f64 {
    let v = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if v.is_finite() && v >= 0.0 {
        round_one_decimal(v)
    } else {
        0.0
    }
}

pub fn current_version(state: &FormState, target: VersionTarget) -> f64 {
    coerce_version(state.get(&target.version_key()))
}

/// Revisions recorded for `target`, oldest first. Malformed entries are skipped.
pub fn history(state: &FormState, target: VersionTarget) -> Vec<Revision> {
    match state.get(&target.history_key()) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Record a new revision of `target`.
///
/// The version is `explicit_version` when given, otherwise the current
/// version plus [`VERSION_STEP`] (or [`INITIAL_VERSION`] when none is set).
/// The date defaults to today.
pub fn record_revision(
    state: &mut FormState,
    target: VersionTarget,
    changes: &str,
    date: Option<&str>,
    explicit_version: Option<f64>,
) -> Result<Revision> {
    let changes = changes.trim();
    if changes.is_empty() {
        return Err(CardError::invalid_value("describe the changes of this revision"));
    }

    let version = match explicit_version {
        Some(v) if v.is_finite() && v >= 0.0 => round_one_decimal(v),
        Some(v) => {
            return Err(CardError::invalid_value(format!(
                "version {v} must be a non-negative number"
            )));
        }
        None if state.is_empty(&target.version_key()) => INITIAL_VERSION,
        None => round_one_decimal(current_version(state, target) + VERSION_STEP),
    };
    let date = match date {
        Some(raw) => dates::parse_input(raw)?,
        None => dates::today_yyyymmdd(),
    };

    let number = Number::from_f64(version)
        .ok_or_else(|| CardError::invalid_value("version is not representable"))?;
    state.set(target.version_key(), Value::Number(number));
    state.set(target.changes_key(), changes);
    state.set(target.date_key(), date.clone());

    let revision = Revision {
        version,
        date,
        changes: changes.to_string(),
    };
    let mut entries = match state.get(&target.history_key()) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    entries.push(serde_json::to_value(&revision)?);
    state.set(target.history_key(), entries);

    info!(document = %target, version, "Recorded revision");
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_version() {
        assert_eq!(coerce_version(None), 0.0);
        assert_eq!(coerce_version(Some(&json!(1.25))), 1.3);
        assert_eq!(coerce_version(Some(&json!("2.0"))), 2.0);
        assert_eq!(coerce_version(Some(&json!("abc"))), 0.0);
        assert_eq!(coerce_version(Some(&json!(-3))), 0.0);
        assert_eq!(coerce_version(Some(&json!(null))), 0.0);
    }

    #[test]
    fn test_first_revision_starts_at_initial_version() {
        let mut state = FormState::new();
        let rev = record_revision(&mut state, VersionTarget::Card, "First draft", Some("2024-01-10"), None)
            .unwrap();
        assert_eq!(rev.version, INITIAL_VERSION);
        assert_eq!(rev.date, "20240110");
        assert_eq!(state.get("card_metadata_version_number"), Some(&json!(1.0)));
        assert_eq!(state.get_str("card_metadata_version_changes"), Some("First draft"));
        assert_eq!(state.get_str("card_metadata_card_creation_date"), Some("20240110"));
    }

    #[test]
    fn test_revisions_bump_and_accumulate() {
        let mut state = FormState::new();
        state.set("model_basic_information_version_number", 1.0);
        record_revision(&mut state, VersionTarget::Model, "Retrained", Some("20240201"), None).unwrap();
        record_revision(&mut state, VersionTarget::Model, "New data", Some("20240301"), None).unwrap();
        record_revision(&mut state, VersionTarget::Model, "Major", Some("20240401"), Some(3.0)).unwrap();

        let revs = history(&state, VersionTarget::Model);
        let versions: Vec<f64> = revs.iter().map(|r| r.version).collect();
        assert_eq!(versions, [1.1, 1.2, 3.0]);
        assert_eq!(revs[2].changes, "Major");
        assert_eq!(state.get_str("model_basic_information_creation_date"), Some("20240401"));
        assert!(history(&state, VersionTarget::Card).is_empty());
    }

    #[test]
    fn test_revision_requires_changes() {
        let mut state = FormState::new();
        assert!(record_revision(&mut state, VersionTarget::Card, "  ", None, None).is_err());
        assert!(record_revision(&mut state, VersionTarget::Card, "x", None, Some(-1.0)).is_err());
    }

    #[test]
    fn test_target_parse() {
        assert_eq!("Card".parse::<VersionTarget>().unwrap(), VersionTarget::Card);
        assert_eq!("model".parse::<VersionTarget>().unwrap(), VersionTarget::Model);
        assert!("dataset".parse::<VersionTarget>().is_err());
    }
}

//! Restore form state from a model card JSON document.
//!
//! This is the inverse of [`crate::serialize::to_card_value`]: exporting,
//! importing and exporting again yields the same document.

use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::dates;
use crate::error::{CardError, Result};
use crate::evaluations::IO_SPECS_KEY;
use crate::state::{FormState, keys};
use crate::vocab::Task;

fn is_date_key(key: &str) -> bool {
    key.to_lowercase().contains("date")
}

/// Store a date value: empty stays empty, anything else is normalized to
/// `YYYYMMDD` or dropped to `null` when it is not a calendar date.
fn set_date(state: &mut FormState, key: &str, value: &Value) {
    match value {
        Value::Null => state.set(key, Value::Null),
        Value::String(s) if s.is_empty() => state.set(key, ""),
        other => {
            let norm = dates::normalize_value(other);
            dates::set_safe_date_field(state, key, norm.as_deref());
        }
    }
}

fn restore_io_specs(state: &mut FormState, specs: &Value, evaluation: Option<&str>) {
    let Some(specs) = specs.as_array() else {
        return;
    };
    for spec in specs {
        let Some(spec) = spec.as_object() else {
            continue;
        };
        let (Some(entry), Some(source)) = (
            spec.get("entry").and_then(Value::as_str),
            spec.get("source").and_then(Value::as_str),
        ) else {
            continue;
        };
        for (field, value) in spec {
            if field == "entry" || field == "source" {
                continue;
            }
            let key = match evaluation {
                Some(name) => keys::evaluation_io(name, entry, source, field),
                None => keys::training_io(entry, source, field),
            };
            state.set(key, value.clone());
        }
    }
}

fn restore_evaluation(state: &mut FormState, entry: &Map<String, Value>) -> Result<()> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| CardError::invalid_value("evaluation without a name"))?;

    for (key, value) in entry {
        if key == "name" {
            continue;
        }
        if key == IO_SPECS_KEY {
            restore_io_specs(state, value, Some(name));
            continue;
        }
        if let (true, Some(metrics)) = (key.starts_with("type_"), value.as_array()) {
            let mut names = Vec::with_capacity(metrics.len());
            for metric in metrics.iter().filter_map(Value::as_object) {
                let Some(metric_name) = metric.get("name").and_then(Value::as_str) else {
                    continue;
                };
                names.push(metric_name.to_string());
                for (field, v) in metric {
                    if field != "name" {
                        state.set(keys::metric_field(name, metric_name, field), v.clone());
                    }
                }
            }
            state.set(keys::metric_list(name, key), names);
            continue;
        }
        let full_key = keys::evaluation_field(name, key);
        if is_date_key(key) {
            set_date(state, &full_key, value);
        } else {
            state.set(full_key, value.clone());
        }
    }
    Ok(())
}

fn restore_technical_specifications(state: &mut FormState, content: &Map<String, Value>) {
    for (key, value) in content {
        match (key.as_str(), value) {
            ("learning_architectures", Value::Array(archs)) => {
                state.set_learning_architecture_count(archs.len());
                for (i, arch) in archs.iter().enumerate() {
                    let Some(arch) = arch.as_object() else {
                        continue;
                    };
                    for (field, v) in arch {
                        if field != "id" {
                            state.set(keys::architecture(i, field), v.clone());
                        }
                    }
                }
            }
            ("hw_and_sw", Value::Object(hw)) => {
                for (field, v) in hw {
                    state.set(keys::field("hw_and_sw", field), v.clone());
                }
            }
            _ => state.set(keys::field("technical_specifications", key), value.clone()),
        }
    }
}

/// Rebuild form state from a card document.
pub fn populate_from_card(card: &Value) -> Result<FormState> {
    let Some(card) = card.as_object() else {
        return Err(CardError::invalid_value("a model card must be a JSON object"));
    };
    let mut state = FormState::new();

    if let Some(task) = card.get("task").and_then(Value::as_str) {
        state.set_task(task.parse::<Task>()?);
    }

    for (section, content) in card {
        match (section.as_str(), content) {
            ("task", _) => {}
            ("training_data", Value::Object(fields)) => {
                for (key, value) in fields {
                    if key == IO_SPECS_KEY {
                        restore_io_specs(&mut state, value, None);
                    } else {
                        state.set(keys::field(section, key), value.clone());
                    }
                }
            }
            ("evaluations", Value::Array(entries)) => {
                let names: Vec<String> = entries
                    .iter()
                    .filter_map(|e| e.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                state.set(keys::EVALUATION_FORMS, names);
                for entry in entries.iter().filter_map(Value::as_object) {
                    restore_evaluation(&mut state, entry)?;
                }
            }
            ("technical_specifications", Value::Object(fields)) => {
                restore_technical_specifications(&mut state, fields);
            }
            (_, Value::Object(fields)) => {
                for (key, value) in fields {
                    let full_key = keys::field(section, key);
                    if is_date_key(key) {
                        set_date(&mut state, &full_key, value);
                    } else {
                        state.set(full_key, value.clone());
                    }
                }
            }
            _ => debug!(section = %section, "Skipping unrecognised card entry"),
        }
    }
    Ok(state)
}

/// Parse card JSON text into form state.
pub fn populate_from_json(text: &str) -> Result<FormState> {
    let card: Value = serde_json::from_str(text)?;
    populate_from_card(&card)
}

/// Load a card file into form state.
pub fn load_card_file(path: &Path) -> Result<FormState> {
    if !path.exists() {
        return Err(CardError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    let state = populate_from_json(&text)?;
    info!(
        path = %path.display(),
        evaluations = state.evaluation_forms().len(),
        "Imported model card"
    );
    Ok(state)
}

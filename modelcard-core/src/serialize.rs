//! Serialize form state into the model card JSON document.
//!
//! Top-level order: `task`, `card_metadata`, `model_basic_information`,
//! `technical_specifications` (with `learning_architectures` and
//! `hw_and_sw` nested), `training_data`, `evaluations`,
//! `other_considerations`. Missing values serialize as `""`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::collections::insert_after_or_push;
use crate::error::Result;
use crate::evaluations::{IO_SPECS_ANCHOR, IO_SPECS_KEY, extract_evaluations, io_specs};
use crate::schema::ModelCardSchema;
use crate::state::{FormState, keys};
use crate::vocab::{LEARNING_ARCHITECTURE, Task};

/// Section values keyed by field, for fields applicable to `task`.
fn collect_section(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
    section: &str,
) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(s) = schema.section(section) {
        for (field, props) in s.iter() {
            if props.applies_to(task) {
                out.insert(field.to_string(), state.value_or_empty(&keys::field(section, field)));
            }
        }
    }
    out
}

/// Learning architecture blocks with their `id`.
pub fn learning_architectures(state: &FormState) -> Vec<Value> {
    (0..state.learning_architecture_count())
        .map(|i| {
            let mut arch = Map::new();
            for field in LEARNING_ARCHITECTURE {
                arch.insert(field.to_string(), state.value_or_empty(&keys::architecture(i, field)));
            }
            arch.insert("id".into(), Value::from(i));
            Value::Object(arch)
        })
        .collect()
}

/// Build the card document.
pub fn to_card_value(schema: &ModelCardSchema, state: &FormState) -> Value {
    let task = state.task();
    let section = |key: &str| collect_section(schema, state, task, key);

    let mut card = Map::new();
    if let Some(task) = task {
        card.insert("task".into(), Value::String(task.as_str().to_string()));
    }
    card.insert("card_metadata".into(), Value::Object(section("card_metadata")));
    card.insert(
        "model_basic_information".into(),
        Value::Object(section("model_basic_information")),
    );

    let mut tech = section("technical_specifications");
    tech.insert(
        "learning_architectures".into(),
        Value::Array(learning_architectures(state)),
    );
    tech.insert("hw_and_sw".into(), Value::Object(section("hw_and_sw")));
    card.insert("technical_specifications".into(), Value::Object(tech));

    let training = insert_after_or_push(
        section("training_data"),
        IO_SPECS_KEY,
        Value::Array(io_specs(state, None)),
        IO_SPECS_ANCHOR,
    );
    card.insert("training_data".into(), Value::Object(training));

    card.insert(
        "evaluations".into(),
        Value::Array(extract_evaluations(schema, state, task)),
    );
    card.insert(
        "other_considerations".into(),
        Value::Object(section("other_considerations")),
    );

    debug!(
        task = task.map(|t| t.as_str()).unwrap_or("none"),
        evaluations = state.evaluation_forms().len(),
        "Serialized model card"
    );
    Value::Object(card)
}

/// The card document as pretty-printed JSON (two-space indentation).
pub fn to_card_json(schema: &ModelCardSchema, state: &FormState) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_card_value(schema, state))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_order() {
        let schema = ModelCardSchema::embedded().unwrap();
        let state = FormState::for_task(Task::DosePrediction);
        let card = to_card_value(&schema, &state);
        let keys: Vec<&str> = card.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "task",
                "card_metadata",
                "model_basic_information",
                "technical_specifications",
                "training_data",
                "evaluations",
                "other_considerations"
            ]
        );
        assert_eq!(card["task"], json!("Dose prediction"));
        assert_eq!(card["card_metadata"]["card_creation_date"], json!(""));
        assert_eq!(card["technical_specifications"]["learning_architectures"], json!([]));
        assert!(card["technical_specifications"]["hw_and_sw"].is_object());
    }

    #[test]
    fn test_no_task_key_without_task() {
        let schema = ModelCardSchema::embedded().unwrap();
        let card = to_card_value(&schema, &FormState::new());
        assert!(card.get("task").is_none());
    }

    #[test]
    fn test_learning_architectures_have_ids_and_defaults() {
        let mut state = FormState::new();
        state.set_learning_architecture_count(2);
        state.set("learning_architecture_1_loss_function", "Dice");
        let archs = learning_architectures(&state);
        assert_eq!(archs[0]["id"], json!(0));
        assert_eq!(archs[0]["loss_function"], json!(""));
        assert_eq!(archs[1]["loss_function"], json!("Dice"));
        assert_eq!(archs[1].as_object().unwrap().len(), LEARNING_ARCHITECTURE.len() + 1);
    }

    #[test]
    fn test_training_io_specs_follow_url_info() {
        let schema = ModelCardSchema::embedded().unwrap();
        let mut state = FormState::new();
        state.set("technical_specifications_model_outputs", json!(["MRI"]));
        state.set("__training_data_mri_model_outputs_scanner_model", "Ingenia");
        let card = to_card_value(&schema, &state);
        let training = card["training_data"].as_object().unwrap();
        let keys: Vec<&str> = training.keys().map(String::as_str).collect();
        let url = keys.iter().position(|k| *k == "url_info").unwrap();
        assert_eq!(keys[url + 1], IO_SPECS_KEY);
        assert_eq!(training[IO_SPECS_KEY][0]["source"], json!("model_outputs"));
        assert_eq!(training[IO_SPECS_KEY][0]["scanner_model"], json!("Ingenia"));
    }

    #[test]
    fn test_json_is_two_space_indented() {
        let schema = ModelCardSchema::embedded().unwrap();
        let text = to_card_json(&schema, &FormState::new()).unwrap();
        assert!(text.starts_with("{\n  \"card_metadata\""));
    }
}

//! Build the evaluation entries of the card document from form state.

use serde_json::{Map, Value};

use crate::collections::{insert_after_or_push, insert_dict_after_or_push};
use crate::form::is_metric_field;
use crate::schema::ModelCardSchema;
use crate::state::{FormState, keys};
use crate::vocab::{
    DATA_INPUT_OUTPUT_TS, EVALUATED_BY_FIELDS, EVALUATION_SECTION, METRIC_GROUPS,
    QUALITATIVE_SECTION, Task, evaluation_metric_fields,
};

/// Key under which per-modality specifications are listed.
pub const IO_SPECS_KEY: &str = "inputs_outputs_technical_specifications";

/// Anchor after which the per-modality specifications are inserted.
pub const IO_SPECS_ANCHOR: &str = "url_info";

/// Anchor after which the metric groups of an evaluation are inserted.
pub const METRICS_ANCHOR: &str = "additional_patient_info_ev";

/// Per-modality specifications for training (`evaluation = None`) or for one
/// evaluation, as `{entry, source, <spec fields>}` objects.
pub fn io_specs(state: &FormState, evaluation: Option<&str>) -> Vec<Value> {
    state
        .modality_entries()
        .into_iter()
        .map(|entry| {
            let mut detail = Map::new();
            detail.insert("entry".into(), Value::String(entry.modality.clone()));
            detail.insert("source".into(), Value::String(entry.source.to_string()));
            for (field, _) in DATA_INPUT_OUTPUT_TS {
                let key = match evaluation {
                    Some(name) => keys::evaluation_io(name, &entry.modality, entry.source, field),
                    None => keys::training_io(&entry.modality, entry.source, field),
                };
                let value = state
                    .get_with_fallback(&key)
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                detail.insert(field.to_string(), value);
            }
            Value::Object(detail)
        })
        .collect()
}

/// One object per evaluation, ready to be serialized.
///
/// Field order follows the schema; per-modality specifications go after
/// `url_info` and the task's metric groups after
/// `additional_patient_info_ev`. Without a task no metric group is listed.
pub fn extract_evaluations(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
) -> Vec<Value> {
    state
        .evaluation_forms()
        .iter()
        .map(|name| Value::Object(extract_one(schema, state, task, name)))
        .collect()
}

fn extract_one(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
    name: &str,
) -> Map<String, Value> {
    let mut evaluation = Map::new();
    evaluation.insert("name".into(), Value::String(name.to_string()));

    if let Some(section) = schema.section(EVALUATION_SECTION) {
        for (field, props) in section.iter() {
            if !props.applies_to(task) || is_metric_field(field) || METRIC_GROUPS.contains(&field) {
                continue;
            }
            evaluation.insert(
                field.to_string(),
                state.value_or_empty(&keys::evaluation_field(name, field)),
            );
        }
    }

    if state.get_bool(&keys::evaluation_field(name, "evaluated_same_as_approved")) {
        for (field, approver_key) in EVALUATED_BY_FIELDS {
            evaluation.insert(field.to_string(), state.value_or_empty(approver_key));
        }
    }

    if let Some(section) = schema.section(QUALITATIVE_SECTION) {
        for (field, props) in section.iter() {
            if props.applies_to(task) {
                evaluation.insert(
                    field.to_string(),
                    state.value_or_empty(&keys::evaluation_field(name, field)),
                );
            }
        }
    }

    let evaluation = insert_after_or_push(
        evaluation,
        IO_SPECS_KEY,
        Value::Array(io_specs(state, Some(name))),
        IO_SPECS_ANCHOR,
    );

    let mut metrics = Map::new();
    for group in task.map(|t| t.metric_groups()).unwrap_or(&[]) {
        let entries: Vec<Value> = state
            .get_list(&keys::metric_list(name, group))
            .into_iter()
            .map(|metric| {
                let mut entry = Map::new();
                entry.insert("name".into(), Value::String(metric.clone()));
                for field in evaluation_metric_fields(group) {
                    entry.insert(
                        field.to_string(),
                        state.value_or_empty(&keys::metric_field(name, &metric, field)),
                    );
                }
                Value::Object(entry)
            })
            .collect();
        metrics.insert(group.to_string(), Value::Array(entries));
    }

    insert_dict_after_or_push(evaluation, metrics, METRICS_ANCHOR)
}

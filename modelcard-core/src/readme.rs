//! Hugging Face style `README.md`: YAML front matter followed by the card
//! Markdown.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ReadmeConfig;
use crate::error::Result;
use crate::render::MarkdownRenderer;
use crate::schema::ModelCardSchema;
use crate::serialize::to_card_value;
use crate::state::{FormState, is_empty_value, keys};
use crate::vocab::{METRIC_GROUPS, metric_mean_field};

/// Front matter keys, in emission order.
pub const META_KEYS: [&str; 14] = [
    "pipeline_tag",
    "library_name",
    "license",
    "license_name",
    "license_link",
    "language",
    "tags",
    "thumbnail",
    "datasets",
    "metrics",
    "base_model",
    "base_models",
    "new_version",
    "model-index",
];

/// Split a free-text list on commas, semicolons and newlines.
fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn mean_value(value: Option<&Value>) -> Option<f64> {
    let mean = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    mean.filter(|v| v.is_finite())
}

fn evaluation_metrics(evaluation: &Map<String, Value>) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
    METRIC_GROUPS.iter().flat_map(move |group| {
        evaluation
            .get(*group)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .map(move |metric| (*group, metric))
    })
}

/// Unique metric names across every evaluation.
pub fn metric_names(card: &Value) -> Vec<String> {
    let mut names = Vec::new();
    for evaluation in evaluations(card) {
        for (_, metric) in evaluation_metrics(evaluation) {
            if let Some(name) = metric.get("name").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                push_unique(&mut names, name.to_string());
            }
        }
    }
    names
}

fn evaluations(card: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    card.get("evaluations")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// `model-index` entry built from the numeric mean value of each metric.
/// `None` when no metric has a numeric mean.
pub fn model_index(card: &Value, model_name: &str) -> Option<Value> {
    let task = card.get("task").and_then(Value::as_str);
    let mut results = Vec::new();
    for evaluation in evaluations(card) {
        let metrics: Vec<Value> = evaluation_metrics(evaluation)
            .filter_map(|(group, metric)| {
                let name = metric.get("name").and_then(Value::as_str)?;
                let value = mean_value(metric.get(metric_mean_field(group)?))?;
                Some(serde_json::json!({"type": name, "name": name, "value": value}))
            })
            .collect();
        if metrics.is_empty() {
            continue;
        }
        let mut result = Map::new();
        if let Some(task) = task {
            let slug = task.trim().to_lowercase().replace(' ', "-");
            result.insert("task".into(), serde_json::json!({"type": slug, "name": task}));
        }
        let dataset = evaluation
            .get("name")
            .cloned()
            .unwrap_or_else(|| Value::String("evaluation".into()));
        result.insert("dataset".into(), serde_json::json!({"name": dataset, "type": "custom"}));
        result.insert("metrics".into(), Value::Array(metrics));
        results.push(Value::Object(result));
    }
    if results.is_empty() {
        return None;
    }
    let name = if model_name.trim().is_empty() { "model" } else { model_name.trim() };
    Some(serde_json::json!([{"name": name, "results": results}]))
}

/// Front matter collected from the card and the README defaults.
pub fn collect_meta(schema: &ModelCardSchema, state: &FormState, config: &ReadmeConfig) -> Map<String, Value> {
    let card = to_card_value(schema, state);
    let text = |key: String| state.get_str(&key).map(str::trim).unwrap_or_default().to_string();

    let libraries = split_list(&text(keys::field("hw_and_sw", "libraries_and_dependencies")));
    let mut tags = Vec::new();
    for tag in config.tags.iter().chain(libraries.iter().skip(1)) {
        push_unique(&mut tags, tag.clone());
    }
    let license = config
        .license
        .clone()
        .unwrap_or_else(|| text(keys::field("model_basic_information", "software_license")));
    let model_name = text(keys::field("model_basic_information", "name"));

    let mut meta = Map::new();
    meta.insert("pipeline_tag".into(), state.task().map(|t| t.slug()).unwrap_or_default().into());
    meta.insert("library_name".into(), libraries.first().cloned().unwrap_or_default().into());
    meta.insert("license".into(), license.into());
    meta.insert("language".into(), config.language.clone().into());
    meta.insert("tags".into(), tags.into());
    meta.insert("datasets".into(), config.datasets.clone().into());
    meta.insert("metrics".into(), metric_names(&card).into());
    meta.insert("base_model".into(), text(keys::field("training_data", "model_name")).into());
    if let Some(index) = model_index(&card, &model_name) {
        meta.insert("model-index".into(), index);
    }
    meta.retain(|_, v| !is_empty_value(Some(v)));
    meta
}

/// Merge `overrides` into `meta`: known keys only, non-empty values win.
/// `base_models` stands in for `base_model` when the latter is unset.
pub fn merge_meta(mut meta: Map<String, Value>, overrides: &Map<String, Value>) -> Map<String, Value> {
    for key in META_KEYS {
        if let Some(value) = overrides.get(key).filter(|v| !is_empty_value(Some(v))) {
            meta.insert(key.to_string(), value.clone());
        }
    }
    if let Some(base_models) = meta.shift_remove("base_models") {
        if !meta.contains_key("base_model") {
            meta.insert("base_model".to_string(), base_models);
        }
    }
    let mut ordered = Map::new();
    for key in META_KEYS {
        if let Some(value) = meta.shift_remove(key) {
            ordered.insert(key.to_string(), value);
        }
    }
    ordered
}

/// YAML front matter block, `---` delimited. Empty when there is no metadata.
pub fn front_matter(meta: &Map<String, Value>) -> Result<String> {
    if meta.is_empty() {
        return Ok(String::new());
    }
    let yaml = serde_yaml::to_string(meta)?;
    Ok(format!("---\n{yaml}---\n\n"))
}

/// Render the README: front matter, then the card Markdown.
pub fn render_readme(
    schema: &ModelCardSchema,
    state: &FormState,
    config: &ReadmeConfig,
    overrides: Option<&Map<String, Value>>,
) -> Result<String> {
    let mut meta = collect_meta(schema, state, config);
    if let Some(overrides) = overrides {
        meta = merge_meta(meta, overrides);
    }
    let body = MarkdownRenderer::new()?.render(schema, state)?;
    debug!(keys = meta.len(), "Built README front matter");
    Ok(format!("{}{body}", front_matter(&meta)?))
}

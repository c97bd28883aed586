//! Form state — the flat key/value store behind a model card draft.
//!
//! Values are keyed by flat strings built with the helpers in [`keys`]; the
//! schema decides which keys matter. Drafts serialize the whole state to JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::vocab::{MODALITY_SOURCES, Task};

/// Key builders for every family of form keys.
pub mod keys {
    pub const TASK: &str = "task";
    pub const EVALUATION_FORMS: &str = "evaluation_forms";
    pub const LEARNING_ARCHITECTURE_FORMS: &str = "learning_architecture_forms";

    /// `{section}_{field}`
    pub fn field(section: &str, field: &str) -> String {
        format!("{section}_{field}")
    }

    /// `learning_architecture_{index}_{field}`
    pub fn architecture(index: usize, field: &str) -> String {
        format!("{}{field}", architecture_prefix(index))
    }

    pub fn architecture_prefix(index: usize) -> String {
        format!("learning_architecture_{index}_")
    }

    /// Modality names become key segments: trimmed, spaces to `_`, lower-cased.
    pub fn modality_slug(modality: &str) -> String {
        modality.trim().replace(' ', "_").to_lowercase()
    }

    /// Evaluation names become key segments with spaces replaced by `_`.
    pub fn evaluation_slug(name: &str) -> String {
        name.replace(' ', "_")
    }

    /// `training_data_{modality}_{source}_{field}`
    pub fn training_io(modality: &str, source: &str, field: &str) -> String {
        format!("training_data_{}_{source}_{field}", modality_slug(modality))
    }

    pub fn evaluation_prefix(name: &str) -> String {
        format!("evaluation_{}_", evaluation_slug(name))
    }

    /// `evaluation_{slug}_{field}`
    pub fn evaluation_field(name: &str, field: &str) -> String {
        format!("{}{field}", evaluation_prefix(name))
    }

    /// `evaluation_{slug}_{modality}_{source}_{field}`
    pub fn evaluation_io(name: &str, modality: &str, source: &str, field: &str) -> String {
        format!(
            "{}{}_{source}_{field}",
            evaluation_prefix(name),
            modality_slug(modality)
        )
    }

    /// `evaluation_{slug}_{metric_group}_list`
    pub fn metric_list(name: &str, metric_group: &str) -> String {
        format!("{}{metric_group}_list", evaluation_prefix(name))
    }

    /// `evaluation_{slug}.{metric}_{field}`
    pub fn metric_field(name: &str, metric: &str, field: &str) -> String {
        format!("evaluation_{}.{metric}_{field}", evaluation_slug(name))
    }
}

/// A file uploaded for an image field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Original file name.
    pub name: String,
    /// Where the stored copy lives.
    pub path: PathBuf,
}

/// A file attached to the appendix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendixFile {
    pub original_name: String,
    pub stored_path: PathBuf,
    #[serde(default)]
    pub label: String,
}

/// A modality declared as a model input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalityEntry {
    pub modality: String,
    /// `model_inputs` or `model_outputs`.
    pub source: &'static str,
}

/// The state of one model card being written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    #[serde(default)]
    values: Map<String, Value>,
    #[serde(default)]
    uploads: BTreeMap<String, UploadRecord>,
    #[serde(default)]
    appendix: Vec<AppendixFile>,
}

/// Absent, `null`, `""`, `[]` and `{}` count as empty.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh state with the task already selected.
    pub fn for_task(task: Task) -> Self {
        let mut state = Self::default();
        state.set_task(task);
        state
    }

    pub fn task(&self) -> Option<Task> {
        self.get_str(keys::TASK).and_then(|t| t.parse().ok())
    }

    pub fn set_task(&mut self, task: Task) {
        self.set(keys::TASK, task.as_str());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
            _ => false,
        }
    }

    /// First non-empty value among `key`, `_key` and `__key`.
    ///
    /// Older drafts kept widget shadow copies under underscore prefixes.
    pub fn get_with_fallback(&self, key: &str) -> Option<&Value> {
        [key.to_string(), format!("_{key}"), format!("__{key}")]
            .iter()
            .map(|k| self.get(k))
            .find(|v| !is_empty_value(*v))
            .flatten()
    }

    /// The value under `key`, or `""` when absent.
    pub fn value_or_empty(&self, key: &str) -> Value {
        self.get(key)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()))
    }

    pub fn is_empty(&self, key: &str) -> bool {
        is_empty_value(self.get(key))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Remove every key starting with `prefix`.
    pub fn remove_prefixed(&mut self, prefix: &str) -> usize {
        self.remove_matching(|k| k.starts_with(prefix))
    }

    /// Remove every key for which `pred` holds.
    pub fn remove_matching(&mut self, pred: impl Fn(&str) -> bool) -> usize {
        let doomed: Vec<String> = self
            .values
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();
        for key in &doomed {
            self.values.shift_remove(key);
        }
        doomed.len()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// String entries of a list value; non-string items are skipped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append `item` to the list under `key` unless already present.
    /// Returns whether it was added.
    pub fn push_unique(&mut self, key: &str, item: &str) -> bool {
        let mut list = self.get_list(key);
        if list.iter().any(|i| i == item) {
            return false;
        }
        list.push(item.to_string());
        self.set(key, list);
        true
    }

    /// Remove `item` from the list under `key`. Returns whether it was present.
    pub fn remove_from_list(&mut self, key: &str, item: &str) -> bool {
        let mut list = self.get_list(key);
        let before = list.len();
        list.retain(|i| i != item);
        let removed = list.len() < before;
        if removed {
            self.set(key, list);
        }
        removed
    }

    pub fn evaluation_forms(&self) -> Vec<String> {
        self.get_list(keys::EVALUATION_FORMS)
    }

    pub fn learning_architecture_count(&self) -> usize {
        match self.get(keys::LEARNING_ARCHITECTURE_FORMS) {
            Some(Value::Array(a)) => a.len(),
            Some(Value::Object(o)) => o.len(),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
            _ => 0,
        }
    }

    pub fn set_learning_architecture_count(&mut self, count: usize) {
        let names: Vec<String> = (1..=count)
            .map(|i| format!("Learning Architecture {i}"))
            .collect();
        self.set(keys::LEARNING_ARCHITECTURE_FORMS, names);
    }

    /// Declared input and output modalities, inputs first.
    pub fn modality_entries(&self) -> Vec<ModalityEntry> {
        MODALITY_SOURCES
            .iter()
            .flat_map(|source| {
                self.get_list(&keys::field("technical_specifications", source))
                    .into_iter()
                    .map(move |modality| ModalityEntry { modality, source })
            })
            .collect()
    }

    pub fn uploads(&self) -> &BTreeMap<String, UploadRecord> {
        &self.uploads
    }

    pub fn upload(&self, key: &str) -> Option<&UploadRecord> {
        self.uploads.get(key)
    }

    pub fn set_upload(&mut self, key: impl Into<String>, record: UploadRecord) -> Option<UploadRecord> {
        self.uploads.insert(key.into(), record)
    }

    pub fn remove_upload(&mut self, key: &str) -> Option<UploadRecord> {
        self.uploads.remove(key)
    }

    /// Whether an upload exists for `key` and its stored file is on disk.
    pub fn has_image(&self, key: &str) -> bool {
        self.upload(key).is_some_and(|r| r.path.exists())
    }

    pub fn appendix(&self) -> &[AppendixFile] {
        &self.appendix
    }

    pub fn appendix_mut(&mut self) -> &mut Vec<AppendixFile> {
        &mut self.appendix
    }

    /// Stored paths of every uploaded and appended file still on disk.
    pub fn existing_files(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self
            .uploads
            .values()
            .map(|r| r.path.clone())
            .chain(self.appendix.iter().map(|a| a.stored_path.clone()))
            .filter(|p| p.is_file())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

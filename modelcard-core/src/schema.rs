//! Model card schema — the ordered section/field definitions that drive the
//! form, validation and every export.
//!
//! A default schema ships inside the crate. Deployments may point the
//! configuration at an external JSON file with the same shape:
//! `{ "<section>": { "<field>": { ...FieldProps } } }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::error::{CardError, Result};
use crate::vocab::Task;

const EMBEDDED_SCHEMA: &str = include_str!("../schemas/model_card_schema.json");

/// Kind of input a field takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Select,
    Image,
    Date,
    Number,
    History,
    Bool,
    /// Also taken by any type this crate does not know.
    #[default]
    #[serde(other)]
    Text,
}

/// Properties of one schema field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Tasks this field applies to. Absent or empty means every task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_types: Option<Vec<String>>,
    /// Regular expression the value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_description: Option<String>,
}

impl FieldProps {
    /// Whether the field applies to `task`.
    ///
    /// Fields without `model_types` apply everywhere; task-specific fields
    /// are hidden while no task is selected.
    pub fn applies_to(&self, task: Option<Task>) -> bool {
        match self.model_types.as_deref() {
            None | Some([]) => true,
            Some(types) => task.is_some_and(|t| t.matches_any(types)),
        }
    }

    pub fn is_required_for(&self, task: Option<Task>) -> bool {
        self.required && self.applies_to(task)
    }

    /// Human-readable label: the schema label (or key) with underscores
    /// replaced by spaces, title-cased.
    pub fn display_label(&self, key: &str) -> String {
        title_case(&self.label.as_deref().unwrap_or(key).replace('_', " "))
    }

    /// Label as written in the schema, falling back to the key.
    pub fn raw_label<'a>(&'a self, key: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(key)
    }
}

/// A schema field together with its key.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub key: String,
    pub props: FieldProps,
}

/// One ordered section of the schema.
#[derive(Debug, Clone)]
pub struct SchemaSection {
    pub key: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaSection {
    pub fn get(&self, field: &str) -> Option<&FieldProps> {
        self.fields
            .iter()
            .find(|f| f.key == field)
            .map(|f| &f.props)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldProps)> {
        self.fields.iter().map(|f| (f.key.as_str(), &f.props))
    }
}

/// The complete model card schema.
#[derive(Debug, Clone)]
pub struct ModelCardSchema {
    sections: Vec<SchemaSection>,
}

impl ModelCardSchema {
    /// Parse the schema bundled with the crate.
    pub fn embedded() -> Result<Self> {
        Self::from_json_str(EMBEDDED_SCHEMA)
    }

    /// Load a schema from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CardError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let schema = Self::from_json_str(&text)?;
        debug!(path = %path.display(), sections = schema.sections.len(), "Loaded schema file");
        Ok(schema)
    }

    /// Load the configured schema, or the embedded one when none is set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::embedded(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| CardError::schema(format!("malformed schema JSON: {e}")))?;
        let Value::Object(root) = root else {
            return Err(CardError::schema("schema root must be an object"));
        };

        let mut sections = Vec::with_capacity(root.len());
        for (section_key, fields) in root {
            let Value::Object(fields) = fields else {
                return Err(CardError::schema(format!(
                    "section '{section_key}' must be an object of fields"
                )));
            };
            let mut defs = Vec::with_capacity(fields.len());
            for (field_key, props) in fields {
                let props: FieldProps = serde_json::from_value(props).map_err(|e| {
                    CardError::schema(format!("field '{section_key}.{field_key}': {e}"))
                })?;
                check_field(&section_key, &field_key, &props)?;
                defs.push(FieldDef {
                    key: field_key,
                    props,
                });
            }
            sections.push(SchemaSection {
                key: section_key,
                fields: defs,
            });
        }
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[SchemaSection] {
        &self.sections
    }

    pub fn section(&self, key: &str) -> Option<&SchemaSection> {
        self.sections.iter().find(|s| s.key == key)
    }

    pub fn field(&self, section: &str, field: &str) -> Option<&FieldProps> {
        self.section(section).and_then(|s| s.get(field))
    }

    /// Like [`field`](Self::field) but reports unknown fields as errors.
    pub fn require_field(&self, section: &str, field: &str) -> Result<&FieldProps> {
        self.field(section, field)
            .ok_or_else(|| CardError::invalid_field(section, field))
    }
}

fn check_field(section: &str, key: &str, props: &FieldProps) -> Result<()> {
    if props.field_type == FieldType::Select && props.options.is_empty() {
        return Err(CardError::schema(format!(
            "select field '{section}.{key}' has no options"
        )));
    }
    if let Some(pattern) = &props.format {
        regex::Regex::new(pattern).map_err(|e| {
            CardError::schema(format!("field '{section}.{key}' has an invalid format: {e}"))
        })?;
    }
    Ok(())
}

/// Title-case like a word processor: first letter of every alphabetic run
/// upper-cased, the rest lower-cased.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_schema_loads_in_order() {
        let schema = ModelCardSchema::embedded().unwrap();
        let keys: Vec<&str> = schema.sections().iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys.first(), Some(&"card_metadata"));
        assert_eq!(keys.last(), Some(&"other_considerations"));
        assert!(keys.contains(&"learning_architecture"));
        let card = schema.section("card_metadata").unwrap();
        assert_eq!(card.fields[0].key, "card_creation_date");
    }

    #[test]
    fn test_unknown_type_defaults_to_text() {
        let schema = ModelCardSchema::from_json_str(
            r#"{"s": {"f": {"type": "slider"}, "g": {"type": "markdown"}, "h": {"type": "date"}}}"#,
        )
        .unwrap();
        assert_eq!(schema.field("s", "f").unwrap().field_type, FieldType::Text);
        assert_eq!(schema.field("s", "g").unwrap().field_type, FieldType::Text);
        assert_eq!(schema.field("s", "h").unwrap().field_type, FieldType::Date);
    }

    #[test]
    fn test_select_without_options_is_rejected() {
        let err = ModelCardSchema::from_json_str(r#"{"s": {"f": {"type": "select"}}}"#)
            .unwrap_err();
        assert!(matches!(err, CardError::Schema(_)));
    }

    #[test]
    fn test_bad_format_regex_is_rejected() {
        let err = ModelCardSchema::from_json_str(r#"{"s": {"f": {"format": "(["}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid format"));
    }

    #[test]
    fn test_applies_to() {
        let general = FieldProps::default();
        assert!(general.applies_to(None));
        let seg_only = FieldProps {
            model_types: Some(vec!["Segmentation".into()]),
            ..Default::default()
        };
        assert!(seg_only.applies_to(Some(Task::Segmentation)));
        assert!(!seg_only.applies_to(Some(Task::Other)));
        assert!(!seg_only.applies_to(None));
    }

    #[test]
    fn test_display_label() {
        let props = FieldProps::default();
        assert_eq!(props.display_label("loss_function"), "Loss Function");
        let labelled = FieldProps {
            label: Some("FOV (field of view)".into()),
            ..Default::default()
        };
        assert_eq!(labelled.display_label("fov"), "Fov (Field Of View)");
    }
}

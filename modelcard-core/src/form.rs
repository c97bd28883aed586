//! Form rendering rules and typed input handling.
//!
//! The form is a schema-driven listing of fields per section; which fields
//! appear depends on the selected task. Inputs arrive as raw strings and are
//! coerced by field type before landing in [`FormState`].

use serde_json::{Number, Value};
use tracing::debug;

use crate::dates;
use crate::error::{CardError, Result};
use crate::schema::{FieldDef, FieldProps, FieldType, ModelCardSchema};
use crate::state::{FormState, keys};
use crate::uploads::remove_stored;
use crate::vocab::{
    CONTENT_LIST_FIELDS, DATA_INPUT_OUTPUT_TS, DOSE_METRIC_GROUPS, DOSE_STATIC_METRICS,
    EVALUATION_SECTION, LEARNING_ARCHITECTURE_SECTION, METRIC_GROUPS,
    MODALITY_SOURCES, OTHER_OPTION, QUALITATIVE_SECTION, RTSTRUCT_OPTION,
    TREATMENT_MODALITY_FIELDS, Task, evaluation_metric_fields, is_io_ts_field,
    section_display_name, strip_brackets,
};

/// Message shown when a value does not match a field's format and the
/// schema gives no description.
pub const DEFAULT_FORMAT_MESSAGE: &str = "Invalid format.";

/// Range accepted for parametric dose metrics (`D95`, `V20`, ...).
pub const DOSE_PARAM_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

/// Whether a field is shown for the selected task.
pub fn should_render(props: &FieldProps, task: Option<Task>) -> bool {
    props.applies_to(task)
}

/// Fields of `section` visible for `task`, in schema order.
pub fn visible_fields<'a>(
    schema: &'a ModelCardSchema,
    section: &str,
    task: Option<Task>,
) -> Vec<&'a FieldDef> {
    schema
        .section(section)
        .map(|s| {
            s.fields
                .iter()
                .filter(|f| should_render(&f.props, task))
                .collect()
        })
        .unwrap_or_default()
}

/// One section of the rendered form.
#[derive(Debug, Clone)]
pub struct SectionView<'a> {
    pub key: &'a str,
    pub display_name: &'static str,
    pub fields: Vec<&'a FieldDef>,
}

/// The whole form for `task`. Sections with no visible field are omitted.
pub fn form_layout(schema: &ModelCardSchema, task: Option<Task>) -> Vec<SectionView<'_>> {
    schema
        .sections()
        .iter()
        .filter_map(|section| {
            let fields = visible_fields(schema, &section.key, task);
            if fields.is_empty() {
                return None;
            }
            Some(SectionView {
                key: &section.key,
                display_name: section_display_name(&section.key).unwrap_or("Other"),
                fields,
            })
        })
        .collect()
}

/// Which instance of a field an input targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// A plain card field, `{section}_{field}`.
    Card,
    /// A field of one learning architecture block.
    Architecture(usize),
    /// A field of one evaluation.
    Evaluation(String),
    /// A per-metric field of one evaluation.
    Metric { evaluation: String, metric: String },
}

impl Scope {
    /// State key for `section.field` in this scope.
    pub fn key(&self, section: &str, field: &str) -> String {
        match self {
            Scope::Card => keys::field(section, field),
            Scope::Architecture(i) => keys::architecture(*i, field),
            Scope::Evaluation(name) => keys::evaluation_field(name, field),
            Scope::Metric { evaluation, metric } => keys::metric_field(evaluation, metric, field),
        }
    }

    /// Check that this scope can hold `section.field` in the current state.
    pub fn validate(&self, state: &FormState, section: &str, field: &str) -> Result<()> {
        let repeated = section == LEARNING_ARCHITECTURE_SECTION
            || section == EVALUATION_SECTION
            || section == QUALITATIVE_SECTION;
        match self {
            Scope::Card if repeated => Err(CardError::invalid_value(format!(
                "fields of '{section}' belong to a learning architecture or an evaluation"
            ))),
            Scope::Card => Ok(()),
            Scope::Architecture(i) => {
                if section != LEARNING_ARCHITECTURE_SECTION {
                    return Err(CardError::invalid_value(format!(
                        "'{section}' is not a learning architecture section"
                    )));
                }
                let count = state.learning_architecture_count();
                if *i >= count {
                    return Err(CardError::invalid_value(format!(
                        "learning architecture {} does not exist ({count} defined)",
                        i + 1
                    )));
                }
                Ok(())
            }
            Scope::Evaluation(name) => {
                if section != EVALUATION_SECTION && section != QUALITATIVE_SECTION {
                    return Err(CardError::invalid_value(format!(
                        "'{section}' is not an evaluation section"
                    )));
                }
                if is_metric_field(field) {
                    return Err(CardError::invalid_value(format!(
                        "'{field}' is recorded per metric"
                    )));
                }
                require_evaluation(state, name)
            }
            Scope::Metric { evaluation, metric } => {
                if section != EVALUATION_SECTION || !is_metric_field(field) {
                    return Err(CardError::invalid_value(format!(
                        "'{field}' is not a metric field"
                    )));
                }
                require_evaluation(state, evaluation)?;
                let listed = METRIC_GROUPS.iter().any(|group| {
                    evaluation_metric_fields(group).contains(&field)
                        && state
                            .get_list(&keys::metric_list(evaluation, group))
                            .iter()
                            .any(|m| m == metric)
                });
                if !listed {
                    return Err(CardError::invalid_value(format!(
                        "metric '{metric}' is not listed for '{field}' in evaluation '{evaluation}'"
                    )));
                }
                Ok(())
            }
        }
    }
}

fn require_evaluation(state: &FormState, name: &str) -> Result<()> {
    if state.evaluation_forms().iter().any(|n| n == name) {
        Ok(())
    } else {
        Err(CardError::invalid_value(format!(
            "evaluation '{name}' does not exist"
        )))
    }
}

/// Whether `field` is one of the per-metric fields of any metric group.
pub fn is_metric_field(field: &str) -> bool {
    METRIC_GROUPS
        .iter()
        .any(|group| evaluation_metric_fields(group).contains(&field))
}

/// Selects that accumulate several entries.
pub fn is_list_field(field: &str) -> bool {
    CONTENT_LIST_FIELDS.contains(&field) || TREATMENT_MODALITY_FIELDS.contains(&field)
}

/// Result of a successful input.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedInput {
    pub key: String,
    pub value: Value,
    /// Set when the stored value does not match the field's format.
    pub format_issue: Option<String>,
}

/// Check `value` against the field's `format` regex.
///
/// The pattern must match at the start of the value, whether or not it
/// begins with `^`. Returns the message to show when it does not match.
/// Empty values pass.
pub fn check_format(props: &FieldProps, value: &str) -> Option<String> {
    let pattern = props.format.as_deref()?;
    if value.is_empty() {
        return None;
    }
    let re = regex::Regex::new(&format!("^(?:{pattern})")).ok()?;
    if re.is_match(value) {
        None
    } else {
        Some(
            props
                .format_description
                .clone()
                .unwrap_or_else(|| DEFAULT_FORMAT_MESSAGE.to_string()),
        )
    }
}

/// Coerce `raw` by the field's type and store it.
///
/// Content-list selects append the entry instead of replacing the value.
/// Such entries may carry a detail after a colon: `OT (Other):Ultrasound`
/// stores the custom name and `RTSTRUCT:Bladder` stores `RTSTRUCT_Bladder`.
pub fn apply_input(
    state: &mut FormState,
    schema: &ModelCardSchema,
    section: &str,
    field: &str,
    scope: &Scope,
    raw: &str,
) -> Result<AppliedInput> {
    let props = schema.require_field(section, field)?;
    if !should_render(props, state.task()) {
        return Err(CardError::invalid_value(format!(
            "'{field}' does not apply to the selected task"
        )));
    }
    scope.validate(state, section, field)?;
    let key = scope.key(section, field);

    let value = match props.field_type {
        FieldType::Text => Value::String(raw.trim().to_string()),
        FieldType::Select if is_list_field(field) => {
            let entry = content_entry(props, field, raw)?;
            let mut list = state.get_list(&key);
            if !list.contains(&entry) {
                list.push(entry);
            }
            Value::from(list)
        }
        FieldType::Select => {
            let option = match_option(&props.options, raw).ok_or_else(|| {
                CardError::invalid_value(format!(
                    "'{}' is not an option of '{field}' (expected one of: {})",
                    raw.trim(),
                    props.options.join(", ")
                ))
            })?;
            Value::String(option.clone())
        }
        FieldType::Date => Value::String(dates::parse_input(raw)?),
        FieldType::Number => Value::Number(parse_version(raw)?),
        FieldType::Bool => Value::Bool(parse_bool(raw)?),
        FieldType::Image => {
            return Err(CardError::invalid_value(format!(
                "'{field}' takes a file; attach one instead"
            )));
        }
        FieldType::History => {
            return Err(CardError::invalid_value(format!(
                "'{field}' is maintained by revisions"
            )));
        }
    };

    let format_issue = value.as_str().and_then(|s| check_format(props, s));
    debug!(key = %key, "Applied input");
    state.set(key.clone(), value.clone());
    Ok(AppliedInput {
        key,
        value,
        format_issue,
    })
}

/// Remove one entry from a content-list select.
pub fn remove_list_entry(
    state: &mut FormState,
    section: &str,
    field: &str,
    scope: &Scope,
    entry: &str,
) -> Result<()> {
    if !is_list_field(field) {
        return Err(CardError::invalid_value(format!("'{field}' is not a list field")));
    }
    let key = scope.key(section, field);
    if state.remove_from_list(&key, entry) {
        Ok(())
    } else {
        Err(CardError::invalid_value(format!(
            "'{entry}' is not listed in '{field}'"
        )))
    }
}

fn content_entry(props: &FieldProps, field: &str, raw: &str) -> Result<String> {
    let (choice, detail) = match raw.split_once(':') {
        Some((c, d)) => (c.trim(), Some(d.trim()).filter(|d| !d.is_empty())),
        None => (raw.trim(), None),
    };
    let option = match_option(&props.options, choice).ok_or_else(|| {
        CardError::invalid_value(format!(
            "'{choice}' is not an option of '{field}' (expected one of: {})",
            props.options.join(", ")
        ))
    })?;

    if option == OTHER_OPTION {
        return detail.map(str::to_string).ok_or_else(|| {
            CardError::invalid_value("a custom name is required, e.g. 'OT (Other):Ultrasound'")
        });
    }
    if option == RTSTRUCT_OPTION && CONTENT_LIST_FIELDS.contains(&field) {
        return detail
            .map(|subtype| format!("{RTSTRUCT_OPTION}_{subtype}"))
            .ok_or_else(|| {
                CardError::invalid_value("a structure subtype is required, e.g. 'RTSTRUCT:Bladder'")
            });
    }
    if detail.is_some() {
        return Err(CardError::invalid_value(format!(
            "option '{option}' takes no detail"
        )));
    }
    Ok(strip_brackets(option))
}

/// Find the option matching `raw`: exact, then case-insensitive, then by
/// the short form without the bracketed description.
pub fn match_option<'a>(options: &'a [String], raw: &str) -> Option<&'a String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    options
        .iter()
        .find(|o| o.as_str() == raw)
        .or_else(|| options.iter().find(|o| o.eq_ignore_ascii_case(raw)))
        .or_else(|| {
            options
                .iter()
                .find(|o| strip_brackets(o).eq_ignore_ascii_case(raw))
        })
}

/// Parse a version number: finite, non-negative, one decimal.
pub fn parse_version(raw: &str) -> Result<Number> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| CardError::invalid_value(format!("'{}' is not a number", raw.trim())))?;
    if !v.is_finite() || v < 0.0 {
        return Err(CardError::invalid_value(format!(
            "'{}' must be a non-negative number",
            raw.trim()
        )));
    }
    Number::from_f64(round_one_decimal(v))
        .ok_or_else(|| CardError::invalid_value("version is not representable"))
}

pub(crate) fn round_one_decimal(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Ok(true),
        "false" | "no" | "n" | "0" | "off" => Ok(false),
        other => Err(CardError::invalid_value(format!("'{other}' is not a yes/no value"))),
    }
}

/// Append a learning architecture block. Returns its zero-based index.
pub fn add_learning_architecture(state: &mut FormState) -> usize {
    let index = state.learning_architecture_count();
    state.set_learning_architecture_count(index + 1);
    index
}

/// Remove block `index`, shifting later blocks down.
pub fn remove_learning_architecture(state: &mut FormState, index: usize) -> Result<()> {
    let count = state.learning_architecture_count();
    if index >= count {
        return Err(CardError::invalid_value(format!(
            "learning architecture {} does not exist ({count} defined)",
            index + 1
        )));
    }
    let prefix = keys::architecture_prefix(index);
    state.remove_prefixed(&prefix);
    let uploads: Vec<String> = state
        .uploads()
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect();
    for key in uploads {
        if let Some(record) = state.remove_upload(&key) {
            remove_stored(&record.path);
        }
    }

    for i in index + 1..count {
        let from = keys::architecture_prefix(i);
        let moved: Vec<(String, Value)> = state
            .values()
            .iter()
            .filter(|(k, _)| k.starts_with(&from))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (old_key, value) in moved {
            let field = &old_key[from.len()..];
            state.remove(&old_key);
            state.set(keys::architecture(i - 1, field), value);
        }
        let uploads: Vec<String> = state
            .uploads()
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        for old_key in uploads {
            let field = old_key[from.len()..].to_string();
            if let Some(record) = state.remove_upload(&old_key) {
                state.set_upload(keys::architecture(i - 1, &field), record);
            }
        }
    }
    state.set_learning_architecture_count(count - 1);
    Ok(())
}

/// Add a named evaluation. Names are trimmed and must be unique.
pub fn add_evaluation(state: &mut FormState, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CardError::invalid_value("evaluation name must not be empty"));
    }
    if name.contains('.') {
        return Err(CardError::invalid_value("evaluation name must not contain '.'"));
    }
    if !state.push_unique(keys::EVALUATION_FORMS, name) {
        return Err(CardError::invalid_value(format!(
            "evaluation '{name}' already exists"
        )));
    }
    Ok(name.to_string())
}

/// Remove an evaluation with all its fields, metrics and uploads.
pub fn remove_evaluation(state: &mut FormState, name: &str) -> Result<()> {
    if !state.remove_from_list(keys::EVALUATION_FORMS, name) {
        return Err(CardError::invalid_value(format!(
            "evaluation '{name}' does not exist"
        )));
    }
    let field_prefix = keys::evaluation_prefix(name);
    let metric_prefix = format!("evaluation_{}.", keys::evaluation_slug(name));
    // "A" must not take "A B"'s keys with it.
    let shadowed: Vec<String> = state
        .evaluation_forms()
        .iter()
        .map(|other| keys::evaluation_prefix(other))
        .filter(|p| p.starts_with(&field_prefix))
        .collect();
    let owned = |k: &str| {
        k.starts_with(&metric_prefix)
            || (k.starts_with(&field_prefix) && !shadowed.iter().any(|p| k.starts_with(p)))
    };
    let removed = state.remove_matching(owned);
    let uploads: Vec<String> = state
        .uploads()
        .keys()
        .filter(|k| owned(k.as_str()))
        .cloned()
        .collect();
    for key in uploads {
        if let Some(record) = state.remove_upload(&key) {
            remove_stored(&record.path);
        }
    }
    debug!(evaluation = name, removed, "Removed evaluation");
    Ok(())
}

/// Add a metric to an evaluation's metric group. Returns the stored name.
///
/// Dose groups take the static metrics, `Other:<name>`, or a parametric
/// `D{n}`/`V{n}` with `n` in 1..=100. `type_metrics_other` takes any name.
/// Other groups take one of the schema options.
pub fn add_metric(
    state: &mut FormState,
    schema: &ModelCardSchema,
    evaluation: &str,
    metric_group: &str,
    metric: &str,
) -> Result<String> {
    require_evaluation(state, evaluation)?;
    let task = state
        .task()
        .ok_or_else(|| CardError::invalid_value("select a task before adding metrics"))?;
    if !task.metric_groups().contains(&metric_group) {
        return Err(CardError::invalid_value(format!(
            "metric group '{metric_group}' does not apply to {task} (expected one of: {})",
            task.metric_groups().join(", ")
        )));
    }

    let name = if DOSE_METRIC_GROUPS.contains(&metric_group) {
        dose_metric_name(metric)?
    } else if metric_group == "type_metrics_other" {
        let name = metric.trim();
        if name.is_empty() {
            return Err(CardError::invalid_value("metric name must not be empty"));
        }
        name.to_string()
    } else {
        let props = schema.require_field(EVALUATION_SECTION, metric_group)?;
        match_option(&props.options, metric)
            .cloned()
            .ok_or_else(|| {
                CardError::invalid_value(format!(
                    "'{}' is not an option of '{metric_group}' (expected one of: {})",
                    metric.trim(),
                    props.options.join(", ")
                ))
            })?
    };

    if !state.push_unique(&keys::metric_list(evaluation, metric_group), &name) {
        return Err(CardError::invalid_value(format!(
            "metric '{name}' is already listed"
        )));
    }
    Ok(name)
}

/// Remove a metric and its recorded fields from an evaluation.
pub fn remove_metric(
    state: &mut FormState,
    evaluation: &str,
    metric_group: &str,
    metric: &str,
) -> Result<()> {
    if !state.remove_from_list(&keys::metric_list(evaluation, metric_group), metric) {
        return Err(CardError::invalid_value(format!(
            "metric '{metric}' is not listed in '{metric_group}'"
        )));
    }
    for field in evaluation_metric_fields(metric_group) {
        let key = keys::metric_field(evaluation, metric, field);
        state.remove(&key);
        if let Some(record) = state.remove_upload(&key) {
            remove_stored(&record.path);
        }
    }
    Ok(())
}

fn dose_metric_name(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if let Some((kind, custom)) = raw.split_once(':') {
        if kind.trim().eq_ignore_ascii_case("other") {
            let custom = custom.trim();
            if custom.is_empty() {
                return Err(CardError::invalid_value(
                    "a custom name is required, e.g. 'Other:Dmean'",
                ));
            }
            return Ok(custom.to_string());
        }
    }
    if raw.eq_ignore_ascii_case("other") {
        return Err(CardError::invalid_value(
            "a custom name is required, e.g. 'Other:Dmean'",
        ));
    }
    let statics: Vec<String> = DOSE_STATIC_METRICS
        .iter()
        .filter(|m| **m != "Other")
        .map(|m| m.to_string())
        .collect();
    if let Some(m) = match_option(&statics, raw) {
        return Ok(m.clone());
    }

    let mut chars = raw.chars();
    let prefix = chars.next().map(|c| c.to_ascii_uppercase());
    if let Some(prefix @ ('D' | 'V')) = prefix {
        let n: u32 = chars
            .as_str()
            .parse()
            .map_err(|_| CardError::invalid_value(format!("'{raw}' is not a dose metric")))?;
        if !DOSE_PARAM_RANGE.contains(&n) {
            return Err(CardError::invalid_value(format!(
                "{prefix} value must be between {} and {}",
                DOSE_PARAM_RANGE.start(),
                DOSE_PARAM_RANGE.end()
            )));
        }
        return Ok(format!("{prefix}{n}"));
    }
    Err(CardError::invalid_value(format!(
        "'{raw}' is not a dose metric (GPR, MAE, MSE, Other:<name>, D<n>, V<n>)"
    )))
}

/// Store one per-modality technical specification value.
///
/// With `evaluation` set the value belongs to that evaluation's dataset,
/// otherwise to the training data.
pub fn set_io_spec(
    state: &mut FormState,
    evaluation: Option<&str>,
    modality: &str,
    source: &str,
    field: &str,
    value: &str,
) -> Result<String> {
    if !is_io_ts_field(field) {
        let known: Vec<&str> = DATA_INPUT_OUTPUT_TS.iter().map(|(k, _)| *k).collect();
        return Err(CardError::invalid_value(format!(
            "'{field}' is not a modality specification (expected one of: {})",
            known.join(", ")
        )));
    }
    if !MODALITY_SOURCES.contains(&source) {
        return Err(CardError::invalid_value(format!(
            "source must be one of: {}",
            MODALITY_SOURCES.join(", ")
        )));
    }
    let declared = state
        .modality_entries()
        .into_iter()
        .find(|e| e.source == source && e.modality.eq_ignore_ascii_case(modality.trim()))
        .ok_or_else(|| {
            CardError::invalid_value(format!("'{modality}' is not declared in {source}"))
        })?;

    let key = match evaluation {
        Some(name) => {
            require_evaluation(state, name)?;
            keys::evaluation_io(name, &declared.modality, source, field)
        }
        None => keys::training_io(&declared.modality, source, field),
    };
    state.set(key.clone(), value.trim());
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ModelCardSchema {
        ModelCardSchema::embedded().unwrap()
    }

    #[test]
    fn test_should_render() {
        let props = FieldProps {
            model_types: Some(vec!["Dose prediction".into()]),
            ..Default::default()
        };
        assert!(should_render(&props, Some(Task::DosePrediction)));
        assert!(!should_render(&props, Some(Task::Segmentation)));
        assert!(!should_render(&props, None));
        assert!(should_render(&FieldProps::default(), None));
    }

    #[test]
    fn test_form_layout_hides_other_task_fields() {
        let schema = schema();
        let layout = form_layout(&schema, Some(Task::Segmentation));
        let eval = layout.iter().find(|s| s.key == EVALUATION_SECTION).unwrap();
        let keys: Vec<&str> = eval.fields.iter().map(|f| f.key.as_str()).collect();
        assert!(keys.contains(&"type_gm_seg"));
        assert!(!keys.contains(&"type_ism"));
        assert!(!keys.contains(&"type_dose_dm_dp"));
        assert_eq!(eval.display_name, "Evaluation data, methodology, and results / commissioning");
    }

    #[test]
    fn test_check_format() {
        let schema = schema();
        let email = schema
            .field("model_basic_information", "developed_by_email")
            .unwrap();
        assert_eq!(check_format(email, "someone@hospital.org"), None);
        assert_eq!(check_format(email, ""), None);
        assert_eq!(
            check_format(email, "not-an-email").as_deref(),
            Some("Please enter a valid email address.")
        );
        let bare = FieldProps {
            format: Some("^\\d+$".into()),
            ..Default::default()
        };
        assert_eq!(check_format(&bare, "x").as_deref(), Some(DEFAULT_FORMAT_MESSAGE));
    }

    #[test]
    fn test_check_format_anchors_at_start() {
        let unanchored = FieldProps {
            format: Some("\\d{4}".into()),
            ..Default::default()
        };
        assert_eq!(check_format(&unanchored, "2024 cohort"), None);
        assert!(check_format(&unanchored, "cohort 2024").is_some());
    }

    #[test]
    fn test_apply_text_and_select() {
        let schema = schema();
        let mut state = FormState::for_task(Task::Segmentation);
        let out = apply_input(
            &mut state,
            &schema,
            "model_basic_information",
            "name",
            &Scope::Card,
            "  AutoSeg  ",
        )
        .unwrap();
        assert_eq!(out.key, "model_basic_information_name");
        assert_eq!(state.get_str("model_basic_information_name"), Some("AutoSeg"));

        apply_input(
            &mut state,
            &schema,
            "model_basic_information",
            "clearance_type",
            &Scope::Card,
            "research use only",
        )
        .unwrap();
        assert_eq!(
            state.get_str("model_basic_information_clearance_type"),
            Some("Research use only")
        );
        assert!(
            apply_input(
                &mut state,
                &schema,
                "model_basic_information",
                "clearance_type",
                &Scope::Card,
                "Banana",
            )
            .is_err()
        );
    }

    #[test]
    fn test_apply_reports_format_issue_but_stores() {
        let schema = schema();
        let mut state = FormState::new();
        let out = apply_input(
            &mut state,
            &schema,
            "model_basic_information",
            "developed_by_email",
            &Scope::Card,
            "nobody",
        )
        .unwrap();
        assert!(out.format_issue.is_some());
        assert_eq!(state.get_str("model_basic_information_developed_by_email"), Some("nobody"));
    }

    #[test]
    fn test_content_list_entries() {
        let schema = schema();
        let mut state = FormState::new();
        let ts = "technical_specifications";
        for raw in ["CT (Computed Tomography)", "mri", "RTSTRUCT:Bladder", "OT (Other):Ultrasound", "ct"] {
            apply_input(&mut state, &schema, ts, "model_inputs", &Scope::Card, raw).unwrap();
        }
        assert_eq!(
            state.get("technical_specifications_model_inputs"),
            Some(&json!(["CT", "MRI", "RTSTRUCT_Bladder", "Ultrasound"]))
        );
        assert!(apply_input(&mut state, &schema, ts, "model_inputs", &Scope::Card, "OT (Other)").is_err());
        assert!(apply_input(&mut state, &schema, ts, "model_inputs", &Scope::Card, "RTSTRUCT").is_err());
        remove_list_entry(&mut state, ts, "model_inputs", &Scope::Card, "MRI").unwrap();
        assert_eq!(state.get_list("technical_specifications_model_inputs").len(), 3);
    }

    #[test]
    fn test_version_number_coercion() {
        let schema = schema();
        let mut state = FormState::new();
        apply_input(&mut state, &schema, "card_metadata", "version_number", &Scope::Card, "1.26")
            .unwrap();
        assert_eq!(state.get("card_metadata_version_number"), Some(&json!(1.3)));
        for bad in ["-1", "NaN", "inf", "one"] {
            assert!(
                apply_input(&mut state, &schema, "card_metadata", "version_number", &Scope::Card, bad)
                    .is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_date_input() {
        let schema = schema();
        let mut state = FormState::new();
        apply_input(&mut state, &schema, "card_metadata", "card_creation_date", &Scope::Card, "2024-03-01")
            .unwrap();
        assert_eq!(state.get_str("card_metadata_card_creation_date"), Some("20240301"));
        assert!(
            apply_input(&mut state, &schema, "card_metadata", "card_creation_date", &Scope::Card, "1850-01-01")
                .is_err()
        );
    }

    #[test]
    fn test_scope_checks() {
        let schema = schema();
        let mut state = FormState::for_task(Task::Segmentation);
        let la = LEARNING_ARCHITECTURE_SECTION;
        assert!(apply_input(&mut state, &schema, la, "batch_size", &Scope::Card, "8").is_err());
        assert!(apply_input(&mut state, &schema, la, "batch_size", &Scope::Architecture(0), "8").is_err());
        add_learning_architecture(&mut state);
        apply_input(&mut state, &schema, la, "batch_size", &Scope::Architecture(0), "8").unwrap();
        assert_eq!(state.get_str("learning_architecture_0_batch_size"), Some("8"));

        let scope = Scope::Evaluation("Internal".into());
        assert!(apply_input(&mut state, &schema, EVALUATION_SECTION, "total_size", &scope, "10").is_err());
        add_evaluation(&mut state, "Internal").unwrap();
        apply_input(&mut state, &schema, EVALUATION_SECTION, "total_size", &scope, "10").unwrap();
        assert_eq!(state.get_str("evaluation_Internal_total_size"), Some("10"));
    }

    #[test]
    fn test_remove_learning_architecture_shifts_later_blocks() {
        let mut state = FormState::new();
        for _ in 0..3 {
            add_learning_architecture(&mut state);
        }
        state.set("learning_architecture_0_loss_function", "Dice");
        state.set("learning_architecture_1_loss_function", "CE");
        state.set("learning_architecture_2_loss_function", "Focal");
        remove_learning_architecture(&mut state, 1).unwrap();
        assert_eq!(state.learning_architecture_count(), 2);
        assert_eq!(state.get_str("learning_architecture_0_loss_function"), Some("Dice"));
        assert_eq!(state.get_str("learning_architecture_1_loss_function"), Some("Focal"));
        assert!(state.get("learning_architecture_2_loss_function").is_none());
        assert!(remove_learning_architecture(&mut state, 5).is_err());
    }

    #[test]
    fn test_evaluation_names() {
        let mut state = FormState::new();
        assert_eq!(add_evaluation(&mut state, "  External set ").unwrap(), "External set");
        assert!(add_evaluation(&mut state, "External set").is_err());
        assert!(add_evaluation(&mut state, "   ").is_err());
        state.set("evaluation_External_set_total_size", "40");
        state.set("evaluation_External_set.DSC_mean_data_seg", "0.9");
        remove_evaluation(&mut state, "External set").unwrap();
        assert!(state.evaluation_forms().is_empty());
        assert!(state.get("evaluation_External_set_total_size").is_none());
        assert!(state.get("evaluation_External_set.DSC_mean_data_seg").is_none());
    }

    #[test]
    fn test_remove_evaluation_keeps_longer_named_sibling() {
        let mut state = FormState::new();
        add_evaluation(&mut state, "A").unwrap();
        add_evaluation(&mut state, "A B").unwrap();
        state.set("evaluation_A_total_size", "1");
        state.set("evaluation_A_B_total_size", "2");
        remove_evaluation(&mut state, "A").unwrap();
        assert!(state.get("evaluation_A_total_size").is_none());
        assert_eq!(state.get_str("evaluation_A_B_total_size"), Some("2"));
    }

    #[test]
    fn test_add_metric_rules() {
        let schema = schema();
        let mut state = FormState::for_task(Task::Segmentation);
        add_evaluation(&mut state, "Internal").unwrap();

        let name = add_metric(&mut state, &schema, "Internal", "type_gm_seg", "dsc").unwrap();
        assert_eq!(name, "DSC (Dice Similarity Coefficient)");
        assert_eq!(add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "d95").unwrap(), "D95");
        assert_eq!(add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "V20").unwrap(), "V20");
        assert_eq!(
            add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "Other:Dmean").unwrap(),
            "Dmean"
        );
        assert!(add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "D0").is_err());
        assert!(add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "V101").is_err());
        assert!(add_metric(&mut state, &schema, "Internal", "type_dose_dm_seg", "D95").is_err());
        assert!(add_metric(&mut state, &schema, "Internal", "type_ism", "MAE").is_err());
        assert_eq!(
            state.get_list("evaluation_Internal_type_dose_dm_seg_list"),
            ["D95", "V20", "Dmean"]
        );

        state.set("evaluation_Internal.D95_mean_data_dm_seg", "2.1");
        remove_metric(&mut state, "Internal", "type_dose_dm_seg", "D95").unwrap();
        assert!(state.get("evaluation_Internal.D95_mean_data_dm_seg").is_none());
    }

    #[test]
    fn test_metric_scope_requires_listed_metric() {
        let schema = schema();
        let mut state = FormState::for_task(Task::Segmentation);
        add_evaluation(&mut state, "Internal").unwrap();
        let scope = Scope::Metric {
            evaluation: "Internal".into(),
            metric: "HD95 (95th percentile Hausdorff Distance)".into(),
        };
        assert!(apply_input(&mut state, &schema, EVALUATION_SECTION, "mean_data_seg", &scope, "3.2").is_err());
        add_metric(&mut state, &schema, "Internal", "type_gm_seg", "HD95").unwrap();
        let out = apply_input(&mut state, &schema, EVALUATION_SECTION, "mean_data_seg", &scope, "3.2")
            .unwrap();
        assert_eq!(out.key, "evaluation_Internal.HD95 (95th percentile Hausdorff Distance)_mean_data_seg");
    }

    #[test]
    fn test_set_io_spec() {
        let mut state = FormState::new();
        state.set("technical_specifications_model_inputs", json!(["CBCT"]));
        let key = set_io_spec(&mut state, None, "cbct", "model_inputs", "fov", " 400 mm ").unwrap();
        assert_eq!(key, "training_data_cbct_model_inputs_fov");
        assert_eq!(state.get_str(&key), Some("400 mm"));
        assert!(set_io_spec(&mut state, None, "CT", "model_inputs", "fov", "x").is_err());
        assert!(set_io_spec(&mut state, None, "CBCT", "model_outputs", "fov", "x").is_err());
        assert!(set_io_spec(&mut state, None, "CBCT", "model_inputs", "colour", "x").is_err());
        assert!(set_io_spec(&mut state, Some("Nope"), "CBCT", "model_inputs", "fov", "x").is_err());
    }

    #[test]
    fn test_removing_blocks_deletes_their_uploads() {
        use crate::uploads::attach;
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let png = src.path().join("fig.png");
        std::fs::write(&png, b"x").unwrap();

        let schema = schema();
        let mut state = FormState::for_task(Task::Segmentation);
        add_learning_architecture(&mut state);
        add_evaluation(&mut state, "Internal").unwrap();
        let metric = add_metric(&mut state, &schema, "Internal", "type_gm_seg", "dsc").unwrap();

        let arch = attach(&mut state, "learning_architecture_0_architecture_figure", &png, store.path()).unwrap();
        let metric_key = keys::metric_field("Internal", &metric, "figure_gm_seg");
        let per_metric = attach(&mut state, &metric_key, &png, store.path()).unwrap();

        remove_metric(&mut state, "Internal", "type_gm_seg", &metric).unwrap();
        assert!(!per_metric.path.exists());
        assert!(state.uploads().get(&metric_key).is_none());

        std::fs::remove_file(&arch.path).unwrap();
        remove_learning_architecture(&mut state, 0).unwrap();
        assert!(state.uploads().is_empty());
    }
}

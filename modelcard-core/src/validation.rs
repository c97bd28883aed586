//! Required-field validation and progress tracking.
//!
//! Four passes run over the form state: static card fields, learning
//! architecture blocks, per-modality specifications and evaluation forms.
//! Missing required fields only warn; values that break a field's format
//! block exports.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::CardError;
use crate::form::{Scope, check_format, is_metric_field};
use crate::schema::{FieldProps, FieldType, ModelCardSchema, title_case};
use crate::state::{FormState, keys};
use crate::vocab::{
    DATA_INPUT_OUTPUT_TS, EVALUATED_BY_FIELDS, EVALUATION_SECTION, LEARNING_ARCHITECTURE,
    LEARNING_ARCHITECTURE_SECTION, METRIC_GROUPS, QUALITATIVE_SECTION, SECTION_DISPLAY_NAMES,
    Task, evaluation_metric_fields, is_io_ts_field,
};

const TRAINING_SECTION: &str = "training_data";

/// Sections validated by their own pass.
const SKIP_SECTIONS: [&str; 3] = [
    EVALUATION_SECTION,
    LEARNING_ARCHITECTURE_SECTION,
    QUALITATIVE_SECTION,
];

/// Required in the schema but only meaningful next to an RTSTRUCT entry.
const SKIP_KEYS: [&str; 2] = [
    "input_content_rtstruct_subtype",
    "output_content_rtstruct_subtype",
];

/// A required field left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingItem {
    /// Internal section key.
    pub section: String,
    /// Human-readable label, with the block/evaluation it belongs to.
    pub label: String,
}

impl MissingItem {
    fn new(section: &str, label: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            label: label.into(),
        }
    }
}

/// A value that does not match its field's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatIssue {
    pub key: String,
    pub label: String,
    pub message: String,
}

/// How many required fields are filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub required_total: usize,
    pub required_filled: usize,
}

impl Progress {
    /// Completion in percent; an empty form with nothing required is complete.
    pub fn percent(&self) -> u8 {
        if self.required_total == 0 {
            return 100;
        }
        ((self.required_filled * 100) / self.required_total) as u8
    }
}

/// Outcome of validating a form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub missing: Vec<MissingItem>,
    pub format_issues: Vec<FormatIssue>,
    pub progress: Progress,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn has_format_issues(&self) -> bool {
        !self.format_issues.is_empty()
    }

    /// Missing items grouped by display section, in sidebar order.
    /// Groups without missing items are left out.
    pub fn grouped(&self) -> Vec<(&'static str, Vec<&MissingItem>)> {
        SECTION_DISPLAY_NAMES
            .iter()
            .filter_map(|(name, sections)| {
                let items: Vec<&MissingItem> = self
                    .missing
                    .iter()
                    .filter(|m| sections.contains(&m.section.as_str()))
                    .collect();
                (!items.is_empty()).then_some((*name, items))
            })
            .collect()
    }

    /// The error exports fail with, if any value has a bad format.
    pub fn format_error(&self) -> Option<CardError> {
        self.has_format_issues().then(|| {
            CardError::Format(self.format_issues.iter().map(|i| i.label.clone()).collect())
        })
    }
}

/// Counts every required check and collects the failures.
#[derive(Default)]
struct Tally {
    checked: usize,
    missing: Vec<MissingItem>,
}

impl Tally {
    fn check(&mut self, filled: bool, section: &str, label: impl FnOnce() -> String) {
        self.checked += 1;
        if !filled {
            self.missing.push(MissingItem::new(section, label()));
        }
    }
}

/// Schema label or key with underscores as spaces, title-cased.
pub fn label_for(props: &FieldProps, key: &str) -> String {
    props.display_label(key)
}

fn is_filled(state: &FormState, key: &str, props: &FieldProps) -> bool {
    if props.field_type == FieldType::Image {
        state.has_image(key)
    } else {
        !state.is_empty(key)
    }
}

fn static_pass(schema: &ModelCardSchema, state: &FormState, task: Option<Task>, tally: &mut Tally) {
    for section in schema.sections() {
        if SKIP_SECTIONS.contains(&section.key.as_str()) {
            continue;
        }
        for (key, props) in section.iter() {
            if SKIP_KEYS.contains(&key)
                || (is_io_ts_field(key) && section.key == TRAINING_SECTION)
            {
                continue;
            }
            if !props.is_required_for(task) {
                continue;
            }
            let full_key = keys::field(&section.key, key);
            tally.check(is_filled(state, &full_key, props), &section.key, || {
                label_for(props, key)
            });
        }
    }
}

fn architecture_pass(schema: &ModelCardSchema, state: &FormState, tally: &mut Tally) {
    for i in 0..state.learning_architecture_count() {
        for field in LEARNING_ARCHITECTURE {
            let Some(props) = schema.field(LEARNING_ARCHITECTURE_SECTION, field) else {
                continue;
            };
            if !props.required {
                continue;
            }
            let key = keys::architecture(i, field);
            tally.check(
                is_filled(state, &key, props),
                LEARNING_ARCHITECTURE_SECTION,
                || {
                    let label = props
                        .label
                        .clone()
                        .unwrap_or_else(|| title_case(&field.replace('_', " ")));
                    format!("{label} (Learning Architecture {})", i + 1)
                },
            );
        }
    }
}

fn modality_pass(state: &FormState, tally: &mut Tally) {
    let evaluations = state.evaluation_forms();
    for entry in state.modality_entries() {
        let (modality, source) = (entry.modality.as_str(), entry.source);
        for (field, label) in DATA_INPUT_OUTPUT_TS {
            let key = keys::training_io(modality, source, field);
            let filled = state.get_with_fallback(&key).is_some();
            tally.check(filled, TRAINING_SECTION, || {
                format!("{label} ({modality} - {source})")
            });
        }
        for name in &evaluations {
            for (field, label) in DATA_INPUT_OUTPUT_TS {
                let key = keys::evaluation_io(name, modality, source, field);
                let filled = state.get_with_fallback(&key).is_some();
                tally.check(filled, EVALUATION_SECTION, || {
                    format!("{label} ({modality} - {source})(Eval: {name})")
                });
            }
        }
    }
}

fn evaluation_pass(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
    tally: &mut Tally,
) {
    let Some(eval_section) = schema.section(EVALUATION_SECTION) else {
        return;
    };
    let metric_groups = task.map(|t| t.metric_groups()).unwrap_or(&[]);

    for name in state.evaluation_forms() {
        let approved_same = state.get_bool(&keys::evaluation_field(&name, "evaluated_same_as_approved"));

        for (key, props) in eval_section.iter() {
            if is_metric_field(key) || METRIC_GROUPS.contains(&key) || is_io_ts_field(key) {
                continue;
            }
            if approved_same && EVALUATED_BY_FIELDS.iter().any(|(f, _)| *f == key) {
                continue;
            }
            if !props.is_required_for(task) {
                continue;
            }
            let full_key = keys::evaluation_field(&name, key);
            tally.check(is_filled(state, &full_key, props), EVALUATION_SECTION, || {
                format!("{} (Eval: {name})", label_for(props, key))
            });
        }

        for group in metric_groups {
            for metric in state.get_list(&keys::metric_list(&name, group)) {
                let short = metric.split(" (").next().unwrap_or(&metric);
                for field in evaluation_metric_fields(group) {
                    let Some(props) = eval_section.get(field) else {
                        continue;
                    };
                    if !props.required {
                        continue;
                    }
                    let full_key = keys::metric_field(&name, &metric, field);
                    tally.check(is_filled(state, &full_key, props), EVALUATION_SECTION, || {
                        format!(
                            "{} (Metric: {short}, Eval: {name})",
                            label_for(props, field)
                        )
                    });
                }
            }
        }
    }
}

/// Required static card fields left empty.
pub fn validate_static_fields(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
) -> Vec<MissingItem> {
    let mut tally = Tally::default();
    static_pass(schema, state, task, &mut tally);
    tally.missing
}

/// Required fields left empty in learning architecture blocks.
pub fn validate_learning_architectures(
    schema: &ModelCardSchema,
    state: &FormState,
) -> Vec<MissingItem> {
    let mut tally = Tally::default();
    architecture_pass(schema, state, &mut tally);
    tally.missing
}

/// Per-modality specifications left empty, for training and every evaluation.
pub fn validate_modalities_fields(state: &FormState) -> Vec<MissingItem> {
    let mut tally = Tally::default();
    modality_pass(state, &mut tally);
    tally.missing
}

/// Required evaluation fields and metric fields left empty.
pub fn validate_evaluation_forms(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
) -> Vec<MissingItem> {
    let mut tally = Tally::default();
    evaluation_pass(schema, state, task, &mut tally);
    tally.missing
}

/// All four passes, in order.
pub fn validate_required_fields(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
) -> Vec<MissingItem> {
    run_passes(schema, state, task).missing
}

fn run_passes(schema: &ModelCardSchema, state: &FormState, task: Option<Task>) -> Tally {
    let mut tally = Tally::default();
    static_pass(schema, state, task, &mut tally);
    architecture_pass(schema, state, &mut tally);
    modality_pass(state, &mut tally);
    evaluation_pass(schema, state, task, &mut tally);
    tally
}

/// Every stored value that breaks its field's format.
pub fn format_issues(
    schema: &ModelCardSchema,
    state: &FormState,
    task: Option<Task>,
) -> Vec<FormatIssue> {
    let mut issues = Vec::new();
    let mut check = |key: String, props: &FieldProps, field: &str, suffix: &str| {
        let Some(value) = state.get_str(&key) else {
            return;
        };
        if let Some(message) = check_format(props, value) {
            issues.push(FormatIssue {
                label: format!("{}{suffix}", label_for(props, field)),
                key,
                message,
            });
        }
    };

    let evaluations = state.evaluation_forms();
    for section in schema.sections() {
        for (field, props) in section.iter() {
            if props.format.is_none() || !props.applies_to(task) {
                continue;
            }
            match section.key.as_str() {
                LEARNING_ARCHITECTURE_SECTION => {
                    for i in 0..state.learning_architecture_count() {
                        let suffix = format!(" (Learning Architecture {})", i + 1);
                        check(Scope::Architecture(i).key(&section.key, field), props, field, &suffix);
                    }
                }
                EVALUATION_SECTION | QUALITATIVE_SECTION => {
                    for name in &evaluations {
                        let suffix = format!(" (Eval: {name})");
                        let scope = Scope::Evaluation(name.clone());
                        check(scope.key(&section.key, field), props, field, &suffix);
                    }
                }
                _ => check(Scope::Card.key(&section.key, field), props, field, ""),
            }
        }
    }
    issues
}

/// Validate the whole form for its selected task.
pub fn validate(schema: &ModelCardSchema, state: &FormState) -> ValidationReport {
    let task = state.task();
    let tally = run_passes(schema, state, task);
    let format_issues = format_issues(schema, state, task);
    let progress = Progress {
        required_total: tally.checked,
        required_filled: tally.checked - tally.missing.len(),
    };
    debug!(
        missing = tally.missing.len(),
        format_issues = format_issues.len(),
        "Validated form"
    );
    if !format_issues.is_empty() {
        info!(count = format_issues.len(), "Form has values with an invalid format");
    }
    ValidationReport {
        missing: tally.missing,
        format_issues,
        progress,
    }
}

//! Controlled vocabularies shared by the form, validation and export layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CardError;

/// The task a model card documents. Selecting it reveals task-specific fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Task {
    ImageToImageTranslation,
    Segmentation,
    DosePrediction,
    Other,
}

impl Task {
    pub const ALL: [Task; 4] = [
        Task::ImageToImageTranslation,
        Task::Segmentation,
        Task::DosePrediction,
        Task::Other,
    ];

    /// Display name, as stored in the card document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::ImageToImageTranslation => "Image-to-Image translation",
            Task::Segmentation => "Segmentation",
            Task::DosePrediction => "Dose prediction",
            Task::Other => "Other",
        }
    }

    /// Metric groups evaluated for this task.
    pub fn metric_groups(&self) -> &'static [&'static str] {
        match self {
            Task::ImageToImageTranslation => &["type_ism", "type_dose_dm"],
            Task::Segmentation => &["type_gm_seg", "type_dose_dm_seg"],
            Task::DosePrediction => &["type_dose_dm_dp"],
            Task::Other => &["type_metrics_other"],
        }
    }

    /// Lower-case, hyphenated tag (`image-to-image-translation`).
    pub fn slug(&self) -> String {
        self.as_str().trim().to_lowercase().replace(' ', "-")
    }

    /// Case-insensitive membership test against a schema `model_types` list.
    pub fn matches_any(&self, model_types: &[String]) -> bool {
        model_types
            .iter()
            .any(|m| m.trim().eq_ignore_ascii_case(self.as_str()))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();
        match norm.split_whitespace().collect::<Vec<_>>().join(" ").as_str() {
            "image to image translation" | "image to image" | "i2i" => {
                Ok(Task::ImageToImageTranslation)
            }
            "segmentation" => Ok(Task::Segmentation),
            "dose prediction" => Ok(Task::DosePrediction),
            "other" => Ok(Task::Other),
            _ => Err(CardError::UnknownTask(s.to_string())),
        }
    }
}

impl TryFrom<String> for Task {
    type Error = CardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Task> for String {
    fn from(task: Task) -> Self {
        task.as_str().to_string()
    }
}

/// Sources a modality can come from.
pub const MODALITY_SOURCES: [&str; 2] = ["model_inputs", "model_outputs"];

/// Per-modality technical specification fields and their labels.
pub const DATA_INPUT_OUTPUT_TS: &[(&str, &str)] = &[
    ("image_resolution", "Image resolution"),
    ("patient_positioning", "Patient positioning"),
    ("scanner_model", "Scanner model"),
    ("scan_acquisition_parameters", "Scan acquisition parameters"),
    ("scan_reconstruction_parameters", "Scan reconstruction parameters"),
    ("fov", "FOV (Field of View)"),
];

/// Returns true when `key` is one of the per-modality specification fields.
pub fn is_io_ts_field(key: &str) -> bool {
    DATA_INPUT_OUTPUT_TS.iter().any(|(k, _)| *k == key)
}

/// Per-metric fields recorded for each metric group.
pub fn evaluation_metric_fields(metric_group: &str) -> &'static [&'static str] {
    match metric_group {
        "type_ism" => &[
            "on_volume_ism",
            "registration_ism",
            "sample_data_ism",
            "mean_data_ism",
            "figure_ism",
        ],
        "type_dose_dm" => &[
            "metric_specifications_dm",
            "on_volume_dm",
            "registration_dm",
            "treatment_modality_dm",
            "dose_engine_dm",
            "dose_grid_resolution_dm",
            "tps_vendor_dm",
            "sample_data_dm",
            "mean_data_dm",
            "figure_dm",
        ],
        "type_gm_seg" => &[
            "metric_specifications_seg",
            "on_volume_seg",
            "sample_data_seg",
            "mean_data_seg",
            "figure_gm_seg",
        ],
        "type_dose_dm_seg" => &[
            "metric_specifications_dm_seg",
            "on_volume_dm_seg",
            "treatment_modality_dm_seg",
            "dose_engine_dm_seg",
            "sample_data_dm_seg",
            "mean_data_dm_seg",
            "figure_dm_seg",
        ],
        "type_dose_dm_dp" => &[
            "metric_specifications_dm_dp",
            "on_volume_dm_dp",
            "treatment_modality_dm_dp",
            "dose_engine_dm_dp",
            "sample_data_dm_dp",
            "mean_data_dm_dp",
            "figure_dm_dp",
        ],
        "type_metrics_other" => &[
            "metric_specifications_other",
            "sample_data_other",
            "mean_data_other",
            "figure_other",
        ],
        _ => &[],
    }
}

/// All metric groups known to any task.
pub const METRIC_GROUPS: [&str; 6] = [
    "type_ism",
    "type_dose_dm",
    "type_gm_seg",
    "type_dose_dm_seg",
    "type_dose_dm_dp",
    "type_metrics_other",
];

/// Metric groups whose entries are dose metrics (static names or D/V parametric).
pub const DOSE_METRIC_GROUPS: [&str; 3] = ["type_dose_dm", "type_dose_dm_seg", "type_dose_dm_dp"];

/// Static dose metric names.
pub const DOSE_STATIC_METRICS: [&str; 4] = [
    "GPR (Gamma Passing Rate)",
    "MAE (Mean Absolute Error)",
    "MSE (Mean Squared Error)",
    "Other",
];

/// Key of the figure field for a metric group.
pub fn metric_figure_field(metric_group: &str) -> Option<&'static str> {
    evaluation_metric_fields(metric_group)
        .iter()
        .copied()
        .find(|f| f.starts_with("figure_"))
}

/// Mean value field for a metric group, used when building a model index.
pub fn metric_mean_field(metric_group: &str) -> Option<&'static str> {
    evaluation_metric_fields(metric_group)
        .iter()
        .copied()
        .find(|f| f.starts_with("mean_data_"))
}

/// Fields of one learning architecture block, in display order.
pub const LEARNING_ARCHITECTURE: [&str; 12] = [
    "total_number_trainable_parameters",
    "number_of_inputs",
    "input_content",
    "additional_information_input",
    "number_of_outputs",
    "output_content",
    "additional_information_output",
    "loss_function",
    "batch_size",
    "regularisation",
    "architecture_figure",
    "uncertainty_quantification_techniques",
];

/// Content-list selects accumulate entries instead of holding one value.
pub const CONTENT_LIST_FIELDS: [&str; 4] =
    ["input_content", "output_content", "model_inputs", "model_outputs"];

/// Treatment modality selects also accumulate entries.
pub const TREATMENT_MODALITY_FIELDS: [&str; 2] =
    ["treatment_modality_train", "treatment_modality_eval"];

/// Select option that asks for a free-text value.
pub const OTHER_OPTION: &str = "OT (Other)";

/// Select option that asks for a structure subtype.
pub const RTSTRUCT_OPTION: &str = "RTSTRUCT";

/// Evaluator fields mirrored from the approver when the evaluator is the same.
pub const EVALUATED_BY_FIELDS: [(&str, &str); 3] = [
    (
        "evaluated_by_name",
        "model_basic_information_clearance_approved_by_name",
    ),
    (
        "evaluated_by_institution",
        "model_basic_information_clearance_approved_by_institution",
    ),
    (
        "evaluated_by_contact_email",
        "model_basic_information_clearance_approved_by_contact_email",
    ),
];

pub const EVALUATION_SECTION: &str = "evaluation_data_methodology_results_commisioning";
pub const QUALITATIVE_SECTION: &str = "qualitative_evaluation";
pub const LEARNING_ARCHITECTURE_SECTION: &str = "learning_architecture";

/// Display grouping of schema sections, in sidebar order.
pub const SECTION_DISPLAY_NAMES: &[(&str, &[&str])] = &[
    ("Card Metadata", &["card_metadata"]),
    ("Model Basic Information", &["model_basic_information"]),
    (
        "Technical Specifications",
        &["technical_specifications", "learning_architecture", "hw_and_sw"],
    ),
    (
        "Training data, methodology, and information",
        &["training_data"],
    ),
    (
        "Evaluation data, methodology, and results / commissioning",
        &[EVALUATION_SECTION, QUALITATIVE_SECTION],
    ),
    ("Other considerations", &["other_considerations"]),
];

/// Display name for an internal section key.
pub fn section_display_name(section: &str) -> Option<&'static str> {
    SECTION_DISPLAY_NAMES
        .iter()
        .find(|(_, keys)| keys.contains(&section))
        .map(|(name, _)| *name)
}

/// Remove any parenthesised text, e.g. `"CT (Computed Tomography)"` → `"CT"`.
pub fn strip_brackets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => {
                depth += 1;
                while out.ends_with(char::is_whitespace) {
                    out.pop();
                }
            }
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parse_variants() {
        assert_eq!(
            "image-to-image translation".parse::<Task>().unwrap(),
            Task::ImageToImageTranslation
        );
        assert_eq!(
            "Image_to_Image_Translation".parse::<Task>().unwrap(),
            Task::ImageToImageTranslation
        );
        assert_eq!("  SEGMENTATION ".parse::<Task>().unwrap(), Task::Segmentation);
        assert_eq!("dose_prediction".parse::<Task>().unwrap(), Task::DosePrediction);
        assert!("classification".parse::<Task>().is_err());
    }

    #[test]
    fn test_task_serde_uses_display_name() {
        let json = serde_json::to_string(&Task::DosePrediction).unwrap();
        assert_eq!(json, "\"Dose prediction\"");
        let back: Task = serde_json::from_str("\"segmentation\"").unwrap();
        assert_eq!(back, Task::Segmentation);
    }

    #[test]
    fn test_task_matches_model_types_case_insensitively() {
        let types = vec!["segmentation".to_string(), "Other".to_string()];
        assert!(Task::Segmentation.matches_any(&types));
        assert!(Task::Other.matches_any(&types));
        assert!(!Task::DosePrediction.matches_any(&types));
    }

    #[test]
    fn test_every_metric_group_has_figure_and_mean() {
        for group in METRIC_GROUPS {
            assert!(metric_figure_field(group).is_some(), "{group}");
            assert!(metric_mean_field(group).is_some(), "{group}");
        }
    }

    #[test]
    fn test_strip_brackets() {
        assert_eq!(strip_brackets("CT (Computed Tomography)"), "CT");
        assert_eq!(strip_brackets("MRI"), "MRI");
        assert_eq!(strip_brackets("A (x) B (y)"), "A B");
    }

    #[test]
    fn test_section_display_name() {
        assert_eq!(
            section_display_name("learning_architecture"),
            Some("Technical Specifications")
        );
        assert_eq!(section_display_name("nope"), None);
    }
}

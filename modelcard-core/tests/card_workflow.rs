//! End-to-end tests: fill a card through the public API, validate it,
//! export it and read it back.

use modelcard_core::form::{
    add_evaluation, add_learning_architecture, add_metric, remove_evaluation, set_io_spec,
};
use modelcard_core::uploads::{add_appendix, attach_field};
use modelcard_core::versioning::{VersionTarget, history};
use modelcard_core::{
    CardError, ExportFormat, Exporter, FormState, ModelCardSchema, Scope, Task, ToolConfig,
    apply_input, load_card_file, record_revision, to_card_json, to_card_value, validate,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Read;
use std::path::Path;

const DSC: &str = "DSC (Dice Similarity Coefficient)";

/// A segmentation card with one learning architecture and one evaluation.
fn segmentation_card(schema: &ModelCardSchema) -> FormState {
    let mut state = FormState::for_task(Task::Segmentation);
    let set = |state: &mut FormState, section: &str, field: &str, scope: &Scope, value: &str| {
        apply_input(state, schema, section, field, scope, value).unwrap();
    };

    set(&mut state, "model_basic_information", "name", &Scope::Card, "OAR-Net");
    set(&mut state, "model_basic_information", "description", &Scope::Card, "Head and neck OAR segmentation");
    set(&mut state, "model_basic_information", "developed_by_email", &Scope::Card, "team@example.org");
    set(&mut state, "model_basic_information", "clearance_type", &Scope::Card, "research use only");
    set(&mut state, "model_basic_information", "software_license", &Scope::Card, "apache-2.0");
    set(&mut state, "technical_specifications", "model_inputs", &Scope::Card, "CT");
    set(&mut state, "technical_specifications", "model_outputs", &Scope::Card, "RTSTRUCT:Parotid");
    set(&mut state, "hw_and_sw", "libraries_and_dependencies", &Scope::Card, "pytorch, monai");

    let arch = add_learning_architecture(&mut state);
    set(&mut state, "learning_architecture", "loss_function", &Scope::Architecture(arch), "Dice + CE");
    set(&mut state, "learning_architecture", "batch_size", &Scope::Architecture(arch), "2");

    set_io_spec(&mut state, None, "CT", "model_inputs", "image_resolution", "1x1x3 mm").unwrap();

    let eval = add_evaluation(&mut state, "External").unwrap();
    let eval_scope = Scope::Evaluation(eval.clone());
    set(&mut state, "evaluation_data_methodology_results_commisioning", "evaluation_date", &eval_scope, "2024-02-01");
    set(&mut state, "evaluation_data_methodology_results_commisioning", "number_of_patients", &eval_scope, "40");
    set(&mut state, "qualitative_evaluation", "likert_scoring", &eval_scope, "4.2 / 5");
    set_io_spec(&mut state, Some(&eval), "CT", "model_inputs", "scanner_model", "Siemens").unwrap();

    let metric = add_metric(&mut state, schema, &eval, "type_gm_seg", "DSC").unwrap();
    assert_eq!(metric, DSC);
    let metric_scope = Scope::Metric {
        evaluation: eval.clone(),
        metric,
    };
    set(&mut state, "evaluation_data_methodology_results_commisioning", "on_volume_seg", &metric_scope, "Parotid");
    set(&mut state, "evaluation_data_methodology_results_commisioning", "mean_data_seg", &metric_scope, "0.86");

    record_revision(&mut state, VersionTarget::Card, "First release", Some("2024-03-01"), None).unwrap();
    state
}

#[test]
fn json_export_import_roundtrip() {
    let schema = ModelCardSchema::embedded().unwrap();
    let config = ToolConfig::default();
    let state = segmentation_card(&schema);
    let dir = tempfile::tempdir().unwrap();

    let outcome = Exporter::new(&schema, &config, &state)
        .export(ExportFormat::Json, dir.path())
        .unwrap();
    assert_eq!(outcome.path, dir.path().join("model_card.json"));
    let first = std::fs::read_to_string(&outcome.path).unwrap();

    let restored = load_card_file(&outcome.path).unwrap();
    assert_eq!(restored.task(), Some(Task::Segmentation));
    assert_eq!(restored.evaluation_forms(), ["External"]);
    assert_eq!(restored.learning_architecture_count(), 1);
    assert_eq!(to_card_json(&schema, &restored).unwrap(), first);
}

#[test]
fn card_document_shape() {
    let schema = ModelCardSchema::embedded().unwrap();
    let card = to_card_value(&schema, &segmentation_card(&schema));

    assert_eq!(card["task"], json!("Segmentation"));
    assert_eq!(card["model_basic_information"]["clearance_type"], json!("Research use only"));
    assert_eq!(card["technical_specifications"]["model_outputs"], json!(["RTSTRUCT_Parotid"]));
    assert_eq!(
        card["technical_specifications"]["learning_architectures"][0]["loss_function"],
        json!("Dice + CE")
    );

    let evaluation = &card["evaluations"][0];
    assert_eq!(evaluation["name"], json!("External"));
    assert_eq!(evaluation["evaluation_date"], json!("20240201"));
    assert_eq!(evaluation["likert_scoring"], json!("4.2 / 5"));
    assert_eq!(evaluation["type_gm_seg"][0]["name"], json!(DSC));
    assert_eq!(evaluation["type_gm_seg"][0]["mean_data_seg"], json!("0.86"));
    assert_eq!(
        evaluation["inputs_outputs_technical_specifications"][0]["scanner_model"],
        json!("Siemens")
    );
}

#[test]
fn validation_tracks_progress() {
    let schema = ModelCardSchema::embedded().unwrap();
    let empty = validate(&schema, &FormState::for_task(Task::Segmentation));
    let filled = validate(&schema, &segmentation_card(&schema));

    assert!(!empty.is_complete());
    assert!(filled.progress.required_filled > empty.progress.required_filled);
    assert!(filled.progress.percent() < 100);
    assert!(
        filled
            .missing
            .iter()
            .any(|m| m.label.contains("Learning Architecture 1"))
    );
    assert!(filled.missing.iter().all(|m| !m.label.starts_with("Name")));
    assert!(!filled.has_format_issues());
}

#[test]
fn bad_format_blocks_every_export() {
    let schema = ModelCardSchema::embedded().unwrap();
    let config = ToolConfig::default();
    let mut state = segmentation_card(&schema);
    let applied = apply_input(&mut state, &schema, "card_metadata", "doi", &Scope::Card, "zenodo").unwrap();
    assert!(applied.format_issue.is_some());

    let dir = tempfile::tempdir().unwrap();
    let err = Exporter::new(&schema, &config, &state)
        .export(ExportFormat::Markdown, dir.path())
        .unwrap_err();
    assert!(matches!(err, CardError::Format(labels) if labels == ["Doi"]));
    assert!(!dir.path().join("model_card.md").exists());
}

#[test]
fn removing_an_evaluation_drops_its_metrics() {
    let schema = ModelCardSchema::embedded().unwrap();
    let mut state = segmentation_card(&schema);
    remove_evaluation(&mut state, "External").unwrap();
    assert!(state.evaluation_forms().is_empty());
    assert!(state.values().keys().all(|k| !k.starts_with("evaluation_External")));
    assert_eq!(to_card_value(&schema, &state)["evaluations"], json!([]));
}

fn write_png(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]).unwrap();
    path
}

#[test]
fn bundle_contains_card_and_files() {
    let schema = ModelCardSchema::embedded().unwrap();
    let mut config = ToolConfig::default();
    config.export.bundle_includes_pdf = false;
    let mut state = segmentation_card(&schema);

    let scratch = tempfile::tempdir().unwrap();
    let store = scratch.path().join("uploads");
    let figure = write_png(scratch.path(), "pipeline.png");
    let appendix = write_png(scratch.path(), "extra.png");
    attach_field(
        &mut state,
        &schema,
        "technical_specifications",
        "model_pipeline_figure",
        &Scope::Card,
        &figure,
        &store,
    )
    .unwrap();
    add_appendix(&mut state, &appendix, "Extra results", &store).unwrap();

    let out = scratch.path().join("out");
    let outcome = Exporter::new(&schema, &config, &state)
        .export(ExportFormat::Bundle, &out)
        .unwrap();
    assert_eq!(outcome.path, out.join("model_card_with_files.zip"));

    let file = std::fs::File::open(&outcome.path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for expected in [
        "model_card.json",
        "model_card.md",
        "README.md",
        "files/pipeline.png",
        "files/extra.png",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }
    assert!(!names.iter().any(|n| n.ends_with(".pdf")));

    let mut markdown = String::new();
    archive
        .by_name("model_card.md")
        .unwrap()
        .read_to_string(&mut markdown)
        .unwrap();
    assert!(markdown.starts_with("# Model Card: OAR-Net"));
    assert!(markdown.contains("data:image/png;base64,"));
    assert!(markdown.contains("Extra results"));
}

#[test]
fn metric_figure_attaches_when_names_hold_separators() {
    let schema = ModelCardSchema::embedded().unwrap();
    let mut state = FormState::for_task(Task::Other);
    let eval = add_evaluation(&mut state, "Site A/B").unwrap();
    let metric = add_metric(&mut state, &schema, &eval, "type_metrics_other", "score\\raw").unwrap();
    let scope = Scope::Metric {
        evaluation: eval,
        metric,
    };

    let scratch = tempfile::tempdir().unwrap();
    let store = scratch.path().join("uploads");
    let figure = write_png(scratch.path(), "curve.png");
    let record = attach_field(
        &mut state,
        &schema,
        "evaluation_data_methodology_results_commisioning",
        "figure_other",
        &scope,
        &figure,
        &store,
    )
    .unwrap();

    assert_eq!(record.name, "curve.png");
    assert_eq!(record.path.parent(), Some(store.as_path()));
    assert!(record.path.is_file());
    assert!(state.uploads().values().any(|r| r == &record));
}

#[test]
fn files_archive_needs_an_upload() {
    let schema = ModelCardSchema::embedded().unwrap();
    let config = ToolConfig::default();
    let state = segmentation_card(&schema);
    let dir = tempfile::tempdir().unwrap();
    let err = Exporter::new(&schema, &config, &state)
        .export(ExportFormat::Files, dir.path())
        .unwrap_err();
    assert!(matches!(err, CardError::NothingToExport(_)));
}

#[test]
fn revisions_accumulate() {
    let schema = ModelCardSchema::embedded().unwrap();
    let mut state = segmentation_card(&schema);
    record_revision(&mut state, VersionTarget::Card, "Added metrics", Some("2024-04-01"), None).unwrap();
    let revisions = history(&state, VersionTarget::Card);
    let versions: Vec<f64> = revisions.iter().map(|r| r.version).collect();
    assert_eq!(versions, [1.0, 1.1]);
    assert_eq!(revisions[1].date, "20240401");
    assert_eq!(state.get_str("card_metadata_card_creation_date"), Some("20240401"));
}

#[test]
fn html_and_readme_exports() {
    let schema = ModelCardSchema::embedded().unwrap();
    let config = ToolConfig::default();
    let state = segmentation_card(&schema);
    let exporter = Exporter::new(&schema, &config, &state);

    let html = String::from_utf8(exporter.render(ExportFormat::Html).unwrap()).unwrap();
    assert!(html.starts_with("<!doctype html>"));
    assert!(html.contains("<h1>Model Card: OAR-Net</h1>"));
    assert!(html.contains("<table>"));

    let readme = String::from_utf8(exporter.render(ExportFormat::Readme).unwrap()).unwrap();
    assert!(readme.starts_with("---\npipeline_tag: segmentation\n"));
    assert!(readme.contains("library_name: pytorch"));
    assert!(readme.contains("value: 0.86"));
}

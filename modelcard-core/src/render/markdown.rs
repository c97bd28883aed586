//! Model card Markdown, rendered from Handlebars templates.
//!
//! Every section gets its own template; the master template stitches the
//! rendered sections together and appends the appendix. Contexts are built
//! from the serialized card document so the Markdown always matches the
//! JSON export, with labels taken from the schema.

use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::dates;
use crate::error::{CardError, Result};
use crate::evaluations::IO_SPECS_KEY;
use crate::form::is_metric_field;
use crate::schema::{FieldProps, FieldType, ModelCardSchema, title_case};
use crate::serialize::to_card_value;
use crate::state::{FormState, keys};
use crate::uploads::file_to_data_uri;
use crate::vocab::{
    DATA_INPUT_OUTPUT_TS, EVALUATION_SECTION, LEARNING_ARCHITECTURE,
    LEARNING_ARCHITECTURE_SECTION, METRIC_GROUPS, QUALITATIVE_SECTION, Task,
    evaluation_metric_fields, metric_figure_field, section_display_name,
};

/// Rendered sections, in document order.
pub const SECTIONS: [&str; 6] = [
    "card_metadata",
    "model_basic_information",
    "technical_specifications",
    "training_data",
    "evaluations",
    "other_considerations",
];

const MASTER_TEMPLATE: &str = "model_card";

const TEMPLATES: &[(&str, &str)] = &[
    (MASTER_TEMPLATE, include_str!("../../templates/model_card.md.hbs")),
    ("section", include_str!("../../templates/section.md.hbs")),
    (
        "technical_specifications",
        include_str!("../../templates/technical_specifications.md.hbs"),
    ),
    ("training_data", include_str!("../../templates/training_data.md.hbs")),
    ("evaluations", include_str!("../../templates/evaluations.md.hbs")),
];

const PARTIALS: &[(&str, &str)] = &[
    ("fields", include_str!("../../templates/partials/fields.md.hbs")),
    ("table", include_str!("../../templates/partials/table.md.hbs")),
    ("figure", include_str!("../../templates/partials/figure.md.hbs")),
];

#[derive(Debug, Serialize)]
struct Entry {
    label: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct Figure {
    label: String,
    name: String,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct Table {
    caption: Option<String>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Labelled values, tables and figures of one group of fields.
#[derive(Debug, Default, Serialize)]
struct Block {
    title: String,
    entries: Vec<Entry>,
    tables: Vec<Table>,
    figures: Vec<Figure>,
    empty: bool,
}

#[derive(Debug, Serialize)]
struct SectionContext {
    title: String,
    block: Block,
}

#[derive(Debug, Serialize)]
struct TechnicalContext {
    title: String,
    block: Block,
    architectures: Option<Table>,
    architecture_figures: Vec<Figure>,
    hw_and_sw: Block,
}

#[derive(Debug, Serialize)]
struct TrainingContext {
    title: String,
    block: Block,
    io_specs: Option<Table>,
}

#[derive(Debug, Serialize)]
struct MetricGroupContext {
    title: String,
    table: Table,
    figures: Vec<Figure>,
}

#[derive(Debug, Serialize)]
struct EvaluationContext {
    name: String,
    block: Block,
    io_specs: Option<Table>,
    metric_groups: Vec<MetricGroupContext>,
}

#[derive(Debug, Serialize)]
struct EvaluationsContext {
    title: String,
    evaluations: Vec<EvaluationContext>,
}

#[derive(Debug, Serialize)]
struct AppendixEntry {
    title: String,
    name: String,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct MasterContext {
    model_name: String,
    task: String,
    sections: BTreeMap<&'static str, String>,
    appendix: Vec<AppendixEntry>,
}

/// Scalar text of a card value; `None` when the value is empty.
fn display_value(props: Option<&FieldProps>, value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => match props.map(|p| p.field_type) {
            Some(FieldType::Date) => dates::format_display(s),
            _ => s.clone(),
        },
        Value::Bool(b) => (if *b { "Yes" } else { "No" }).to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| display_value(None, v))
                .collect();
            if parts.is_empty() {
                return None;
            }
            parts.join(", ")
        }
        Value::Object(_) => return None,
    };
    Some(text)
}

/// Keep multi-line values inside their list item.
fn list_text(s: &str) -> String {
    s.trim().replace('\n', "  \n  ")
}

fn cell_text(s: &str) -> String {
    s.trim().replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn figure(state: &FormState, full_key: &str, label: String, name: &str) -> Figure {
    let url = state
        .upload(full_key)
        .filter(|u| u.path.exists())
        .and_then(|u| file_to_data_uri(&u.path));
    Figure {
        label,
        name: name.to_string(),
        url,
    }
}

fn history_table(label: String, value: &Value) -> Option<Table> {
    let rows: Vec<Vec<String>> = value
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .map(|rev| {
            let field = |k: &str| rev.get(k).and_then(|v| display_value(None, v)).unwrap_or_default();
            vec![
                cell_text(&field("version")),
                dates::format_display(&field("date")),
                cell_text(&field("changes")),
            ]
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some(Table {
        caption: Some(label),
        header: vec!["Version".into(), "Date".into(), "Changes".into()],
        rows,
    })
}

/// Collects the fields of one block in schema order.
struct BlockBuilder<'a> {
    state: &'a FormState,
    block: Block,
}

impl<'a> BlockBuilder<'a> {
    fn new(state: &'a FormState, title: impl Into<String>) -> Self {
        Self {
            state,
            block: Block {
                title: title.into(),
                ..Default::default()
            },
        }
    }

    fn push(&mut self, field: &str, props: &FieldProps, value: Option<&Value>, full_key: &str) {
        let Some(value) = value else {
            return;
        };
        let label = props.display_label(field);
        match props.field_type {
            FieldType::History => {
                if let Some(table) = history_table(label, value) {
                    self.block.tables.push(table);
                }
            }
            FieldType::Image => {
                if let Some(name) = value.as_str().filter(|s| !s.is_empty()) {
                    self.block.figures.push(figure(self.state, full_key, label, name));
                }
            }
            _ => {
                if let Some(text) = display_value(Some(props), value) {
                    self.block.entries.push(Entry {
                        label,
                        value: list_text(&text),
                    });
                }
            }
        }
    }

    fn finish(mut self) -> Block {
        self.block.empty = self.block.entries.is_empty()
            && self.block.tables.is_empty()
            && self.block.figures.is_empty();
        self.block
    }
}

/// The card document plus everything needed to label it.
struct CardView<'a> {
    schema: &'a ModelCardSchema,
    state: &'a FormState,
    card: Value,
    task: Option<Task>,
}

impl<'a> CardView<'a> {
    fn new(schema: &'a ModelCardSchema, state: &'a FormState) -> Self {
        Self {
            schema,
            state,
            card: to_card_value(schema, state),
            task: state.task(),
        }
    }

    fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.card.get(key).and_then(Value::as_object)
    }

    fn title(section: &str) -> String {
        section_display_name(section)
            .map(str::to_string)
            .unwrap_or_else(|| title_case(&section.replace('_', " ")))
    }

    fn block(&self, section: &str, values: Option<&Map<String, Value>>) -> Block {
        let mut builder = BlockBuilder::new(self.state, Self::title(section));
        if let (Some(schema_section), Some(values)) = (self.schema.section(section), values) {
            for (field, props) in schema_section.iter() {
                if props.applies_to(self.task) {
                    builder.push(field, props, values.get(field), &keys::field(section, field));
                }
            }
        }
        builder.finish()
    }

    fn plain_section(&self, section: &str) -> SectionContext {
        SectionContext {
            title: Self::title(section),
            block: self.block(section, self.object(section)),
        }
    }

    fn technical(&self) -> TechnicalContext {
        let tech = self.object("technical_specifications");
        let archs: Vec<&Map<String, Value>> = tech
            .and_then(|t| t.get("learning_architectures"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();

        let mut architecture_figures = Vec::new();
        let architectures = (!archs.is_empty()).then(|| {
            let mut header = vec!["Field".to_string()];
            header.extend((1..=archs.len()).map(|i| format!("Architecture {i}")));
            let mut rows = Vec::new();
            for field in LEARNING_ARCHITECTURE {
                let props = self.schema.field(LEARNING_ARCHITECTURE_SECTION, field);
                let label = props
                    .map(|p| p.display_label(field))
                    .unwrap_or_else(|| title_case(&field.replace('_', " ")));
                if props.is_some_and(|p| p.field_type == FieldType::Image) {
                    for (i, arch) in archs.iter().enumerate() {
                        if let Some(name) = arch.get(field).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                            architecture_figures.push(figure(
                                self.state,
                                &keys::architecture(i, field),
                                format!("{label} (Architecture {})", i + 1),
                                name,
                            ));
                        }
                    }
                    continue;
                }
                let cells: Vec<String> = archs
                    .iter()
                    .map(|arch| {
                        arch.get(field)
                            .and_then(|v| display_value(props, v))
                            .map(|s| cell_text(&s))
                            .unwrap_or_default()
                    })
                    .collect();
                if cells.iter().any(|c| !c.is_empty()) {
                    let mut row = vec![label];
                    row.extend(cells);
                    rows.push(row);
                }
            }
            Table {
                caption: None,
                header,
                rows,
            }
        });

        let hw = tech.and_then(|t| t.get("hw_and_sw")).and_then(Value::as_object);
        TechnicalContext {
            title: Self::title("technical_specifications"),
            block: self.block("technical_specifications", tech),
            architectures,
            architecture_figures,
            hw_and_sw: self.block("hw_and_sw", hw),
        }
    }

    fn training(&self) -> TrainingContext {
        let training = self.object("training_data");
        TrainingContext {
            title: Self::title("training_data"),
            block: self.block("training_data", training),
            io_specs: training.and_then(|t| t.get(IO_SPECS_KEY)).and_then(io_table),
        }
    }

    fn evaluation(&self, entry: &Map<String, Value>) -> EvaluationContext {
        let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
        let mut builder = BlockBuilder::new(self.state, name);
        for section in [EVALUATION_SECTION, QUALITATIVE_SECTION] {
            let Some(schema_section) = self.schema.section(section) else {
                continue;
            };
            for (field, props) in schema_section.iter() {
                if !props.applies_to(self.task) || is_metric_field(field) || METRIC_GROUPS.contains(&field) {
                    continue;
                }
                builder.push(field, props, entry.get(field), &keys::evaluation_field(name, field));
            }
        }

        let metric_groups = self
            .task
            .map(|t| t.metric_groups())
            .unwrap_or(&[])
            .iter()
            .filter_map(|group| self.metric_group(name, group, entry.get(*group)?))
            .collect();

        EvaluationContext {
            name: name.to_string(),
            block: builder.finish(),
            io_specs: entry.get(IO_SPECS_KEY).and_then(io_table),
            metric_groups,
        }
    }

    fn metric_group(&self, evaluation: &str, group: &str, value: &Value) -> Option<MetricGroupContext> {
        let metrics: Vec<&Map<String, Value>> =
            value.as_array()?.iter().filter_map(Value::as_object).collect();
        if metrics.is_empty() {
            return None;
        }
        let label_of = |field: &str| {
            self.schema
                .field(EVALUATION_SECTION, field)
                .map(|p| p.display_label(field))
                .unwrap_or_else(|| title_case(&field.replace('_', " ")))
        };
        let figure_field = metric_figure_field(group);
        let fields: Vec<&str> = evaluation_metric_fields(group)
            .iter()
            .copied()
            .filter(|f| Some(*f) != figure_field)
            .collect();

        let mut header = vec!["Metric".to_string()];
        header.extend(fields.iter().map(|f| label_of(f)));
        let mut rows = Vec::with_capacity(metrics.len());
        let mut figures = Vec::new();
        for metric in metrics {
            let metric_name = metric.get("name").and_then(Value::as_str).unwrap_or_default();
            let mut row = vec![cell_text(metric_name)];
            row.extend(fields.iter().map(|f| {
                metric
                    .get(*f)
                    .and_then(|v| display_value(None, v))
                    .map(|s| cell_text(&s))
                    .unwrap_or_default()
            }));
            rows.push(row);
            if let Some(fig) = figure_field {
                if let Some(file) = metric.get(fig).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                    figures.push(figure(
                        self.state,
                        &keys::metric_field(evaluation, metric_name, fig),
                        format!("{metric_name} ({})", label_of(group)),
                        file,
                    ));
                }
            }
        }
        Some(MetricGroupContext {
            title: label_of(group),
            table: Table {
                caption: None,
                header,
                rows,
            },
            figures,
        })
    }

    fn evaluations(&self) -> EvaluationsContext {
        let evaluations = self
            .card
            .get("evaluations")
            .and_then(Value::as_array)
            .map(|e| e.iter().filter_map(Value::as_object).map(|e| self.evaluation(e)).collect())
            .unwrap_or_default();
        EvaluationsContext {
            title: Self::title(EVALUATION_SECTION),
            evaluations,
        }
    }

    fn appendix(&self) -> Vec<AppendixEntry> {
        self.state
            .appendix()
            .iter()
            .map(|file| AppendixEntry {
                title: if file.label.is_empty() {
                    file.original_name.clone()
                } else {
                    file.label.clone()
                },
                name: file.original_name.clone(),
                url: file_to_data_uri(&file.stored_path),
            })
            .collect()
    }
}

/// Per-modality specifications as a table with one column per modality.
fn io_table(value: &Value) -> Option<Table> {
    let specs: Vec<&Map<String, Value>> =
        value.as_array()?.iter().filter_map(Value::as_object).collect();
    if specs.is_empty() {
        return None;
    }
    let mut header = vec!["Field".to_string()];
    header.extend(specs.iter().map(|spec| {
        let entry = spec.get("entry").and_then(Value::as_str).unwrap_or_default();
        let role = match spec.get("source").and_then(Value::as_str) {
            Some("model_outputs") => "output",
            _ => "input",
        };
        cell_text(&format!("{entry} ({role})"))
    }));
    let rows = DATA_INPUT_OUTPUT_TS
        .iter()
        .map(|(field, label)| {
            let mut row = vec![label.to_string()];
            row.extend(specs.iter().map(|spec| {
                spec.get(*field)
                    .and_then(|v| display_value(None, v))
                    .map(|s| cell_text(&s))
                    .unwrap_or_default()
            }));
            row
        })
        .collect();
    Some(Table {
        caption: None,
        header,
        rows,
    })
}

/// Collapse runs of blank lines left by template control lines.
fn tidy(markdown: &str) -> String {
    let blank_runs = Regex::new(r"\n[ \t]*(\n[ \t]*)+\n").ok();
    let text = match blank_runs {
        Some(re) => re.replace_all(markdown, "\n\n").into_owned(),
        None => markdown.to_string(),
    };
    format!("{}\n", text.trim())
}

/// Markdown renderer with its templates registered.
pub struct MarkdownRenderer {
    registry: Handlebars<'static>,
}

impl MarkdownRenderer {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        for (name, source) in PARTIALS {
            registry
                .register_partial(name, *source)
                .map_err(|e| CardError::render(format!("partial '{name}': {e}")))?;
        }
        for (name, source) in TEMPLATES {
            registry
                .register_template_string(name, *source)
                .map_err(|e| CardError::render(format!("template '{name}': {e}")))?;
        }
        Ok(Self { registry })
    }

    fn render_view(&self, view: &CardView<'_>, section: &str) -> Result<String> {
        let rendered = match section {
            "technical_specifications" => self.registry.render(section, &view.technical())?,
            "training_data" => self.registry.render(section, &view.training())?,
            "evaluations" => self.registry.render(section, &view.evaluations())?,
            "card_metadata" | "model_basic_information" | "other_considerations" => {
                self.registry.render("section", &view.plain_section(section))?
            }
            other => {
                return Err(CardError::render(format!("unknown section '{other}'")));
            }
        };
        Ok(tidy(&rendered))
    }

    /// Markdown of one section of [`SECTIONS`].
    pub fn render_section(
        &self,
        schema: &ModelCardSchema,
        state: &FormState,
        section: &str,
    ) -> Result<String> {
        self.render_view(&CardView::new(schema, state), section)
    }

    /// The complete model card.
    pub fn render(&self, schema: &ModelCardSchema, state: &FormState) -> Result<String> {
        let view = CardView::new(schema, state);
        let mut sections = BTreeMap::new();
        for section in SECTIONS {
            sections.insert(section, self.render_view(&view, section)?);
        }
        let context = MasterContext {
            model_name: state
                .get_str(&keys::field("model_basic_information", "name"))
                .unwrap_or_default()
                .trim()
                .to_string(),
            task: view.task.map(|t| t.as_str().to_string()).unwrap_or_default(),
            sections,
            appendix: view.appendix(),
        };
        let markdown = tidy(&self.registry.render(MASTER_TEMPLATE, &context)?);
        debug!(bytes = markdown.len(), "Rendered model card markdown");
        Ok(markdown)
    }
}

/// Render the complete model card as Markdown.
pub fn render_markdown(schema: &ModelCardSchema, state: &FormState) -> Result<String> {
    MarkdownRenderer::new()?.render(schema, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ModelCardSchema {
        ModelCardSchema::embedded().unwrap()
    }

    #[test]
    fn test_templates_register() {
        assert!(MarkdownRenderer::new().is_ok());
    }

    #[test]
    fn test_display_value() {
        let date = FieldProps {
            field_type: FieldType::Date,
            ..Default::default()
        };
        assert_eq!(display_value(Some(&date), &json!("20240131")).as_deref(), Some("2024/01/31"));
        assert_eq!(display_value(None, &json!(["CT", "MRI"])).as_deref(), Some("CT, MRI"));
        assert_eq!(display_value(None, &json!(true)).as_deref(), Some("Yes"));
        assert_eq!(display_value(None, &json!(1.5)).as_deref(), Some("1.5"));
        assert_eq!(display_value(None, &json!("  ")), None);
        assert_eq!(display_value(None, &json!([])), None);
    }

    #[test]
    fn test_cell_text_escapes_pipes() {
        assert_eq!(cell_text("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_tidy_collapses_blank_lines() {
        assert_eq!(tidy("a\n\n\n\nb\n  \n\nc\n\n"), "a\n\nb\n\nc\n");
    }

    #[test]
    fn test_full_card_markdown() {
        let mut state = FormState::for_task(Task::Segmentation);
        state.set("model_basic_information_name", "OAR-Net");
        state.set("model_basic_information_creation_date", "20240115");
        state.set("card_metadata_revision_history", json!([
            {"version": 1.0, "date": "20240110", "changes": "First draft"}
        ]));
        state.set("technical_specifications_model_inputs", json!(["CT"]));
        state.set_learning_architecture_count(2);
        state.set("learning_architecture_0_loss_function", "Dice");
        state.set("learning_architecture_1_loss_function", "Focal | Dice");
        state.set("hw_and_sw_libraries_and_dependencies", "torch, monai");
        state.set("evaluation_forms", json!(["External"]));
        state.set("evaluation_External_type_gm_seg_list", json!(["DSC"]));
        state.set("evaluation_External.DSC_mean_data_seg", "0.87");

        let md = render_markdown(&schema(), &state).unwrap();
        assert!(md.starts_with("# Model Card: OAR-Net\n"));
        assert!(md.contains("**Task:** Segmentation"));
        assert!(md.contains("## Card Metadata"));
        assert!(md.contains("| 1.0 | 2024/01/10 | First draft |"));
        assert!(md.contains("2024/01/15"));
        assert!(md.contains("| Field | Architecture 1 | Architecture 2 |"));
        assert!(md.contains("| Dice | Focal \\| Dice |"));
        assert!(md.contains("torch, monai"));
        assert!(md.contains("| Field | CT (input) |"));
        assert!(md.contains("### External"));
        assert!(md.contains("| DSC |"));
        assert!(md.contains("0.87"));
        assert!(!md.contains("\n\n\n"));
    }

    #[test]
    fn test_empty_section_placeholder() {
        let md = MarkdownRenderer::new()
            .unwrap()
            .render_section(&schema(), &FormState::new(), "other_considerations")
            .unwrap();
        assert!(md.contains("## Other considerations"));
        assert!(md.contains("_No information provided._"));
    }

    #[test]
    fn test_unknown_section_is_an_error() {
        let err = MarkdownRenderer::new()
            .unwrap()
            .render_section(&schema(), &FormState::new(), "appendix")
            .unwrap_err();
        assert!(matches!(err, CardError::Render(_)));
    }

    #[test]
    fn test_figures_are_embedded_as_data_uris() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("pipeline.png");
        std::fs::write(&png, b"png").unwrap();
        let mut state = FormState::new();
        crate::uploads::attach(
            &mut state,
            "technical_specifications_model_pipeline_figure",
            &png,
            &dir.path().join("store"),
        )
        .unwrap();
        let md = render_markdown(&schema(), &state).unwrap();
        assert!(md.contains("](data:image/png;base64,cG5n)"));
        assert!(md.contains("*Figure: Model Pipeline Figure (pipeline.png)*"));
    }

    #[test]
    fn test_appendix_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("protocol.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        let mut state = FormState::new();
        crate::uploads::add_appendix(&mut state, &pdf, "Study protocol", &dir.path().join("store"))
            .unwrap();
        let md = render_markdown(&schema(), &state).unwrap();
        assert!(md.contains("## Appendix"));
        assert!(md.contains("### Study protocol"));
        assert!(md.contains("Attached file: `protocol.pdf`"));
    }
}

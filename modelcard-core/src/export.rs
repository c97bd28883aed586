//! Export engine: JSON, Markdown, HTML, PDF, README and zip archives.
//!
//! Every export validates the form first. Values with a bad format abort
//! the export; missing required fields are only reported.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;

use crate::config::ToolConfig;
use crate::error::{CardError, Result};
use crate::readme::render_readme;
use crate::render::{MarkdownRenderer, fonts_available, pdf_bytes, render_markdown_to_html};
use crate::schema::ModelCardSchema;
use crate::serialize::to_card_json;
use crate::state::FormState;
use crate::validation::{MissingItem, ValidationReport, validate};

/// Directory inside the bundle holding the uploaded files.
pub const BUNDLE_FILES_DIR: &str = "files";

/// What to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Html,
    Pdf,
    Readme,
    /// Zip of the uploaded files.
    Files,
    /// Zip of the card in every text format plus the uploaded files.
    Bundle,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 7] = [
        ExportFormat::Json,
        ExportFormat::Markdown,
        ExportFormat::Html,
        ExportFormat::Pdf,
        ExportFormat::Readme,
        ExportFormat::Files,
        ExportFormat::Bundle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Readme => "readme",
            ExportFormat::Files => "files",
            ExportFormat::Bundle => "bundle",
        }
    }

    /// Output file name under the configured stems.
    pub fn file_name(&self, config: &ToolConfig) -> String {
        let stem = &config.export.file_stem;
        match self {
            ExportFormat::Json => format!("{stem}.json"),
            ExportFormat::Markdown => format!("{stem}.md"),
            ExportFormat::Html => format!("{stem}.html"),
            ExportFormat::Pdf => format!("{stem}.pdf"),
            ExportFormat::Readme => "README.md".to_string(),
            ExportFormat::Files => config.export.files_archive.clone(),
            ExportFormat::Bundle => config.export.bundle_archive.clone(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "html" => Ok(ExportFormat::Html),
            "pdf" => Ok(ExportFormat::Pdf),
            "readme" => Ok(ExportFormat::Readme),
            "files" | "zip" => Ok(ExportFormat::Files),
            "bundle" => Ok(ExportFormat::Bundle),
            other => Err(CardError::invalid_value(format!(
                "unknown export format '{other}' (json, md, html, pdf, readme, files, bundle)"
            ))),
        }
    }
}

/// Result of one export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub bytes: usize,
    /// Required fields still empty when the export ran.
    pub missing: Vec<MissingItem>,
}

/// Add `name` to `seen`, suffixing it until it is unique.
fn unique_name(seen: &mut HashSet<String>, name: &str) -> String {
    if seen.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Uploaded and appended files still on disk, with their archive names.
pub fn archive_entries(state: &FormState) -> Vec<(String, PathBuf)> {
    let mut seen = HashSet::new();
    let uploads = state.uploads().values().map(|u| (u.name.as_str(), &u.path));
    let appendix = state
        .appendix()
        .iter()
        .map(|a| (a.original_name.as_str(), &a.stored_path));
    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for (name, path) in uploads.chain(appendix) {
        if !path.is_file() {
            warn!(path = %path.display(), "Uploaded file is missing, skipping");
            continue;
        }
        if entries.iter().any(|(_, p)| p == path) {
            continue;
        }
        entries.push((unique_name(&mut seen, name), path.clone()));
    }
    entries
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
}

fn write_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(name.as_str(), zip_options())?;
        zip.write_all(data)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn read_entries(state: &FormState, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
    let files = archive_entries(state);
    if files.is_empty() {
        return Err(CardError::nothing_to_export("no uploaded files are available"));
    }
    files
        .into_iter()
        .map(|(name, path)| -> Result<(String, Vec<u8>)> {
            Ok((format!("{prefix}{name}"), std::fs::read(&path)?))
        })
        .collect()
}

/// Renders and writes exports for one form.
pub struct Exporter<'a> {
    schema: &'a ModelCardSchema,
    config: &'a ToolConfig,
    state: &'a FormState,
    readme_overrides: Option<Map<String, Value>>,
}

impl<'a> Exporter<'a> {
    pub fn new(schema: &'a ModelCardSchema, config: &'a ToolConfig, state: &'a FormState) -> Self {
        Self {
            schema,
            config,
            state,
            readme_overrides: None,
        }
    }

    /// Front matter values that replace the collected ones in the README.
    pub fn with_readme_overrides(mut self, overrides: Map<String, Value>) -> Self {
        self.readme_overrides = Some(overrides);
        self
    }

    /// Validate the form. Format issues are an error; missing required
    /// fields are logged and returned in the report.
    pub fn check(&self) -> Result<ValidationReport> {
        let report = validate(self.schema, self.state);
        if let Some(err) = report.format_error() {
            return Err(err);
        }
        if !report.is_complete() {
            warn!(
                missing = report.missing.len(),
                progress = report.progress.percent(),
                "Exporting with required fields missing"
            );
        }
        Ok(report)
    }

    fn markdown(&self) -> Result<String> {
        MarkdownRenderer::new()?.render(self.schema, self.state)
    }

    fn title(&self) -> String {
        match self.state.get_str("model_basic_information_name").map(str::trim) {
            Some(name) if !name.is_empty() => format!("Model Card: {name}"),
            _ => "Model Card".to_string(),
        }
    }

    /// Render `format` in memory, without validating.
    pub fn render(&self, format: ExportFormat) -> Result<Vec<u8>> {
        let bytes = match format {
            ExportFormat::Json => to_card_json(self.schema, self.state)?.into_bytes(),
            ExportFormat::Markdown => self.markdown()?.into_bytes(),
            ExportFormat::Html => render_markdown_to_html(&self.markdown()?, None).into_bytes(),
            ExportFormat::Pdf => pdf_bytes(&self.markdown()?, &self.title(), &self.config.pdf)?,
            ExportFormat::Readme => render_readme(
                self.schema,
                self.state,
                &self.config.readme,
                self.readme_overrides.as_ref(),
            )?
            .into_bytes(),
            ExportFormat::Files => write_zip(&read_entries(self.state, "")?)?,
            ExportFormat::Bundle => self.bundle()?,
        };
        Ok(bytes)
    }

    fn bundle(&self) -> Result<Vec<u8>> {
        let files = read_entries(self.state, &format!("{BUNDLE_FILES_DIR}/"))?;
        let mut entries = Vec::with_capacity(files.len() + 4);
        for format in [ExportFormat::Json, ExportFormat::Markdown, ExportFormat::Readme] {
            entries.push((format.file_name(self.config), self.render(format)?));
        }
        if self.config.export.bundle_includes_pdf {
            if fonts_available(&self.config.pdf) {
                entries.push((ExportFormat::Pdf.file_name(self.config), self.render(ExportFormat::Pdf)?));
            } else {
                warn!("No PDF font available, leaving the PDF out of the bundle");
            }
        }
        entries.extend(files);
        write_zip(&entries)
    }

    /// Validate, render `format` and write it into `dir`.
    pub fn export(&self, format: ExportFormat, dir: &Path) -> Result<ExportOutcome> {
        let report = self.check()?;
        let data = self.render(format)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format.file_name(self.config));
        std::fs::write(&path, &data)?;
        info!(format = %format, path = %path.display(), bytes = data.len(), "Exported model card");
        Ok(ExportOutcome {
            format,
            path,
            bytes: data.len(),
            missing: report.missing,
        })
    }
}

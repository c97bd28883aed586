//! Configuration for the model card tool.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files live at
//! `~/.config/modelcard/config.toml` and `<workspace>/.modelcard/config.toml`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding per-workspace state (config, drafts, uploads).
pub const WORKSPACE_DIR: &str = ".modelcard";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub readme: ReadmeConfig,
    #[serde(default)]
    pub drafts: DraftsConfig,
}

/// Where the field schema comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// External schema file. The embedded schema is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Default output directory, relative to the workspace.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Stem of the card files (`model_card.json`, `model_card.md`, ...).
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
    #[serde(default = "default_files_archive")]
    pub files_archive: String,
    #[serde(default = "default_bundle_archive")]
    pub bundle_archive: String,
    /// Add the PDF to the bundle when a font is available.
    #[serde(default = "default_true")]
    pub bundle_includes_pdf: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_file_stem() -> String {
    "model_card".to_string()
}

fn default_files_archive() -> String {
    "uploaded_files.zip".to_string()
}

fn default_bundle_archive() -> String {
    "model_card_with_files.zip".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_stem: default_file_stem(),
            files_archive: default_files_archive(),
            bundle_archive: default_bundle_archive(),
            bundle_includes_pdf: default_true(),
        }
    }
}

/// PDF rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Directory searched first for the font family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_dir: Option<PathBuf>,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    /// Page margins in millimetres.
    #[serde(default = "default_margins")]
    pub margins_mm: u32,
    #[serde(default = "default_font_size")]
    pub font_size: u8,
}

fn default_font_family() -> String {
    "LiberationSans".to_string()
}

fn default_margins() -> u32 {
    18
}

fn default_font_size() -> u8 {
    10
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            font_dir: None,
            font_family: default_font_family(),
            margins_mm: default_margins(),
            font_size: default_font_size(),
        }
    }
}

/// Front matter defaults for the generated README.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadmeConfig {
    #[serde(default = "default_language")]
    pub language: Vec<String>,
    /// Tags added to every README.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    /// Overrides the card's software license when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

fn default_language() -> Vec<String> {
    vec!["en".to_string()]
}

impl Default for ReadmeConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            tags: Vec::new(),
            datasets: Vec::new(),
            license: None,
        }
    }
}

/// Draft storage inside the workspace directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftsConfig {
    #[serde(default = "default_draft_file")]
    pub file_name: String,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
}

fn default_draft_file() -> String {
    "draft.json".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            file_name: default_draft_file(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

impl ToolConfig {
    /// Directory holding drafts and uploads for `workspace`.
    pub fn state_dir(&self, workspace: &Path) -> PathBuf {
        workspace.join(WORKSPACE_DIR)
    }

    pub fn draft_path(&self, workspace: &Path) -> PathBuf {
        self.state_dir(workspace).join(&self.drafts.file_name)
    }

    pub fn uploads_dir(&self, workspace: &Path) -> PathBuf {
        self.state_dir(workspace).join(&self.drafts.uploads_dir)
    }

    /// Export directory; relative paths resolve against `workspace`.
    pub fn output_dir(&self, workspace: &Path) -> PathBuf {
        if self.export.output_dir.is_absolute() {
            self.export.output_dir.clone()
        } else {
            workspace.join(&self.export.output_dir)
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "modelcards", "modelcard")
}

/// User-level config file location, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

/// Workspace-level config file location.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load configuration by merging all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ToolConfig>,
) -> Result<ToolConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ToolConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // MODELCARD_PDF__FONT_DIR, MODELCARD_EXPORT__OUTPUT_DIR, ...
    figment = figment.merge(Env::prefixed("MODELCARD_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit TOML file layered over the defaults.
pub fn load_config_file(path: &Path) -> Result<ToolConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(ToolConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MODELCARD_").split("__"))
        .extract()
        .map_err(Box::new)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

//! Error types for the model card library.
//!
//! Uses `thiserror` for the public error enum. Variants cover schema loading,
//! form input, rendering and export failures.

use std::path::PathBuf;

/// Top-level error type for model card operations.
#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown field '{field}' in section '{section}'")]
    InvalidField { section: String, field: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unknown task: '{0}'")]
    UnknownTask(String),

    #[error("Fields have invalid format: {}", .0.join(", "))]
    Format(Vec<String>),

    #[error("Render error: {0}")]
    Render(String),

    #[error("PDF export unavailable: {0}")]
    Pdf(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Nothing to export: {0}")]
    NothingToExport(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CardError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn invalid_field(section: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidField {
            section: section.into(),
            field: field.into(),
        }
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn pdf(msg: impl Into<String>) -> Self {
        Self::Pdf(msg.into())
    }

    pub fn nothing_to_export(msg: impl Into<String>) -> Self {
        Self::NothingToExport(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CardError>;

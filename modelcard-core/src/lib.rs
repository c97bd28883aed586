//! # Model Card Core
//!
//! Library for writing model cards of AI systems used in radiotherapy.
//! Provides the field schema, form state, input handling, validation and
//! progress tracking, versioning, and exports to JSON, Markdown, HTML, PDF,
//! README and zip archives.

pub mod collections;
pub mod config;
pub mod dates;
pub mod error;
pub mod evaluations;
pub mod export;
pub mod form;
pub mod import;
pub mod readme;
pub mod render;
pub mod schema;
pub mod serialize;
pub mod state;
pub mod uploads;
pub mod validation;
pub mod versioning;
pub mod vocab;

// Re-export commonly used types at the crate root.
pub use config::{ToolConfig, load_config};
pub use error::{CardError, Result};
pub use export::{ExportFormat, ExportOutcome, Exporter};
pub use form::{AppliedInput, Scope, apply_input};
pub use import::{load_card_file, populate_from_card, populate_from_json};
pub use schema::{FieldProps, FieldType, ModelCardSchema};
pub use serialize::{to_card_json, to_card_value};
pub use state::{FormState, keys};
pub use validation::{MissingItem, Progress, ValidationReport, validate};
pub use versioning::{Revision, VersionTarget, record_revision};
pub use vocab::Task;

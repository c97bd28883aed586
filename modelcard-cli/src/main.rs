//! modelcard: write model cards for radiotherapy AI systems from the terminal.
//!
//! Every command loads the workspace draft, applies one change, and saves it.

mod commands;
mod draft;

use clap::Parser;
use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Author, validate and export model cards for AI in radiotherapy
#[derive(Parser, Debug)]
#[command(name = "modelcard", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Draft file (defaults to .modelcard/draft.json in the workspace)
    #[arg(short, long)]
    draft: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a new draft for a task
    New {
        /// Segmentation, Dose prediction, Image-to-Image translation or Other
        #[arg(short, long)]
        task: String,
        /// Replace an existing draft
        #[arg(long)]
        force: bool,
    },
    /// List the supported tasks
    Tasks,
    /// List the fields shown for the draft's task
    Fields {
        /// Only this section
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Set a field from text input
    Set {
        section: String,
        field: String,
        value: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove one entry from a list field
    RemoveEntry {
        section: String,
        field: String,
        entry: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove a stored value by its full key
    Unset { key: String },
    /// Set a stored value by its full key; the value is parsed as JSON when possible
    SetRaw { key: String, value: String },
    /// Manage learning architecture blocks
    Architecture {
        #[command(subcommand)]
        action: ArchitectureAction,
    },
    /// Manage evaluations
    Evaluation {
        #[command(subcommand)]
        action: EvaluationAction,
    },
    /// Manage the metrics of an evaluation
    Metric {
        #[command(subcommand)]
        action: MetricAction,
    },
    /// Set a per-modality technical specification
    Io {
        /// A modality listed in model_inputs or model_outputs
        modality: String,
        /// model_inputs or model_outputs
        source: String,
        field: String,
        value: String,
        /// Evaluation dataset instead of the training data
        #[arg(long = "eval")]
        evaluation: Option<String>,
    },
    /// Attach a figure to an image field
    Attach {
        section: String,
        field: String,
        file: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove the figure of an image field
    Detach {
        section: String,
        field: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Manage appendix files
    Appendix {
        #[command(subcommand)]
        action: AppendixAction,
    },
    /// Show missing required fields and progress
    Validate {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a new version of the card or the model
    Revise {
        /// card or model
        target: String,
        /// What changed
        #[arg(long)]
        changes: String,
        /// Explicit version number (default: current + 0.1)
        #[arg(long)]
        version: Option<f64>,
        /// Revision date (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show the revision history of the card or the model
    History {
        /// card or model
        target: String,
    },
    /// Load a model card JSON file into the draft
    Import {
        file: PathBuf,
        /// Replace an existing draft
        #[arg(long)]
        force: bool,
    },
    /// Export the card
    Export {
        /// json, md, html, pdf, readme, files or bundle
        format: String,
        /// Output directory (default from configuration)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// README front matter override, KEY=VALUE (VALUE may be JSON)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Which block a field belongs to.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ScopeArgs {
    /// Learning architecture number (1-based)
    #[arg(long = "arch", conflicts_with = "evaluation")]
    pub architecture: Option<usize>,
    /// Evaluation name
    #[arg(long = "eval")]
    pub evaluation: Option<String>,
    /// Metric name within the evaluation
    #[arg(long, requires = "evaluation")]
    pub metric: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub enum ArchitectureAction {
    /// Append a learning architecture
    Add,
    /// Remove a learning architecture (1-based)
    Remove { number: usize },
}

#[derive(clap::Subcommand, Debug)]
pub enum EvaluationAction {
    /// Add a named evaluation
    Add { name: String },
    /// Remove an evaluation with its metrics and figures
    Remove { name: String },
    /// List evaluations
    List,
}

#[derive(clap::Subcommand, Debug)]
pub enum MetricAction {
    /// Add a metric to a metric group of an evaluation
    Add {
        evaluation: String,
        group: String,
        metric: String,
    },
    /// Remove a metric and its recorded values
    Remove {
        evaluation: String,
        group: String,
        metric: String,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum AppendixAction {
    /// Attach a file to the appendix
    Add {
        file: PathBuf,
        #[arg(short, long, default_value = "")]
        label: String,
    },
    /// Remove an appendix file by name
    Remove { name: String },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("org", "modelcards", "modelcard")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "modelcard.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = resolve_workspace(cli.workspace.as_deref())?;

    let config = match &cli.config {
        Some(path) => modelcard_core::config::load_config_file(path),
        None => modelcard_core::load_config(Some(&workspace), None),
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let ctx = commands::Context::new(workspace, config, cli.draft)?;
    commands::handle_command(cli.command, &ctx)
}

/// An explicit workspace must exist; without one the current directory is used.
fn resolve_workspace(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => {
            let resolved = path
                .canonicalize()
                .with_context(|| format!("Workspace '{}' is not accessible", path.display()))?;
            anyhow::ensure!(
                resolved.is_dir(),
                "Workspace '{}' is not a directory",
                path.display()
            );
            Ok(resolved)
        }
        None => Ok(std::env::current_dir()
            .and_then(|d| d.canonicalize())
            .unwrap_or_else(|_| PathBuf::from("."))),
    }
}

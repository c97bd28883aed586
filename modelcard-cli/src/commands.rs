//! CLI subcommand handlers.

use crate::AppendixAction;
use crate::ArchitectureAction;
use crate::Commands;
use crate::ConfigAction;
use crate::EvaluationAction;
use crate::MetricAction;
use crate::ScopeArgs;
use crate::draft;
use anyhow::Context as _;
use modelcard_core::config::{ToolConfig, workspace_config_path};
use modelcard_core::versioning::{VersionTarget, history, record_revision};
use modelcard_core::{
    ExportFormat, Exporter, FormState, ModelCardSchema, Scope, Task, dates, form, uploads, validate,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything a command needs to find the draft and its files.
pub struct Context {
    pub workspace: PathBuf,
    pub config: ToolConfig,
    pub draft_path: PathBuf,
}

impl Context {
    pub fn new(
        workspace: PathBuf,
        config: ToolConfig,
        draft: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let draft_path = match draft {
            Some(path) if path.is_absolute() => path,
            Some(path) => workspace.join(path),
            None => config.draft_path(&workspace),
        };
        Ok(Self {
            workspace,
            config,
            draft_path,
        })
    }

    fn schema(&self) -> anyhow::Result<ModelCardSchema> {
        let path = self.config.schema.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.workspace.join(p)
            }
        });
        Ok(ModelCardSchema::load(path.as_deref())?)
    }

    fn uploads_dir(&self) -> PathBuf {
        self.config.uploads_dir(&self.workspace)
    }

    fn load(&self) -> anyhow::Result<FormState> {
        draft::load(&self.draft_path)
    }

    fn save(&self, state: &FormState) -> anyhow::Result<()> {
        draft::save(&self.draft_path, state)
    }

    /// Load the draft, apply `f`, and save it when `f` succeeds.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut FormState) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }

    fn refuse_overwrite(&self, force: bool) -> anyhow::Result<()> {
        if self.draft_path.exists() && !force {
            anyhow::bail!(
                "A draft already exists at {}. Use --force to replace it.",
                self.draft_path.display()
            );
        }
        Ok(())
    }
}

impl ScopeArgs {
    /// The block addressed by the flags. Architecture numbers are 1-based.
    pub fn to_scope(&self) -> anyhow::Result<Scope> {
        match (self.architecture, &self.evaluation, &self.metric) {
            (Some(0), _, _) => anyhow::bail!("Learning architectures are numbered from 1"),
            (Some(n), _, _) => Ok(Scope::Architecture(n - 1)),
            (None, Some(evaluation), Some(metric)) => Ok(Scope::Metric {
                evaluation: evaluation.clone(),
                metric: metric.clone(),
            }),
            (None, Some(evaluation), None) => Ok(Scope::Evaluation(evaluation.clone())),
            (None, None, _) => Ok(Scope::Card),
        }
    }
}

/// Parse `KEY=VALUE` README overrides. Values that parse as JSON keep
/// their type; anything else is a string.
pub fn parse_meta(entries: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut meta = Map::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{entry}'"))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Empty key in '{entry}'");
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| Value::String(value.trim().to_string()));
        meta.insert(key.to_string(), value);
    }
    Ok(meta)
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::New { task, force } => handle_new(ctx, &task, force),
        Commands::Tasks => {
            for task in Task::ALL {
                println!("{:<28} metric groups: {}", task.as_str(), task.metric_groups().join(", "));
            }
            Ok(())
        }
        Commands::Fields { section } => handle_fields(ctx, section.as_deref()),
        Commands::Set {
            section,
            field,
            value,
            scope,
        } => handle_set(ctx, &section, &field, &value, &scope),
        Commands::RemoveEntry {
            section,
            field,
            entry,
            scope,
        } => {
            let scope = scope.to_scope()?;
            ctx.update(|state| {
                Ok(form::remove_list_entry(state, &section, &field, &scope, &entry)?)
            })?;
            println!("Removed '{entry}' from {field}");
            Ok(())
        }
        Commands::Unset { key } => ctx.update(|state| match state.remove(&key) {
            Some(_) => {
                println!("Removed {key}");
                Ok(())
            }
            None => anyhow::bail!("'{key}' is not set"),
        }),
        Commands::SetRaw { key, value } => {
            let value: Value =
                serde_json::from_str(&value).unwrap_or_else(|_| Value::String(value.clone()));
            ctx.update(|state| {
                state.set(key.clone(), value);
                Ok(())
            })?;
            println!("Set {key}");
            Ok(())
        }
        Commands::Architecture { action } => handle_architecture(ctx, action),
        Commands::Evaluation { action } => handle_evaluation(ctx, action),
        Commands::Metric { action } => handle_metric(ctx, action),
        Commands::Io {
            modality,
            source,
            field,
            value,
            evaluation,
        } => {
            let key = ctx.update(|state| {
                Ok(form::set_io_spec(
                    state,
                    evaluation.as_deref(),
                    &modality,
                    &source,
                    &field,
                    &value,
                )?)
            })?;
            println!("Set {key}");
            Ok(())
        }
        Commands::Attach {
            section,
            field,
            file,
            scope,
        } => {
            let schema = ctx.schema()?;
            let scope = scope.to_scope()?;
            let store = ctx.uploads_dir();
            let record = ctx.update(|state| {
                Ok(uploads::attach_field(
                    state, &schema, &section, &field, &scope, &file, &store,
                )?)
            })?;
            println!("Attached {} to {}", record.name, scope.key(&section, &field));
            Ok(())
        }
        Commands::Detach {
            section,
            field,
            scope,
        } => {
            let key = scope.to_scope()?.key(&section, &field);
            let record = ctx.update(|state| Ok(uploads::detach(state, &key)?))?;
            println!("Removed {} from {key}", record.name);
            Ok(())
        }
        Commands::Appendix { action } => handle_appendix(ctx, action),
        Commands::Validate { json } => handle_validate(ctx, json),
        Commands::Revise {
            target,
            changes,
            version,
            date,
        } => {
            let target: VersionTarget = target.parse()?;
            let revision = ctx.update(|state| {
                Ok(record_revision(
                    state,
                    target,
                    &changes,
                    date.as_deref(),
                    version,
                )?)
            })?;
            println!(
                "Recorded {target} version {:.1} ({})",
                revision.version,
                dates::format_display(&revision.date)
            );
            Ok(())
        }
        Commands::History { target } => {
            let target: VersionTarget = target.parse()?;
            let state = ctx.load()?;
            let revisions = history(&state, target);
            if revisions.is_empty() {
                println!("No {target} revisions recorded.");
            }
            for rev in revisions {
                println!(
                    "{:>5.1}  {}  {}",
                    rev.version,
                    dates::format_display(&rev.date),
                    rev.changes
                );
            }
            Ok(())
        }
        Commands::Import { file, force } => {
            ctx.refuse_overwrite(force)?;
            let state = modelcard_core::load_card_file(&file)?;
            ctx.save(&state)?;
            info!(file = %file.display(), "Imported model card");
            match state.task() {
                Some(task) => println!("Imported {} ({task})", file.display()),
                None => println!("Imported {} (no task set)", file.display()),
            }
            Ok(())
        }
        Commands::Export { format, out, meta } => handle_export(ctx, &format, out, &meta),
        Commands::Config { action } => handle_config(action, ctx),
    }
}

fn handle_new(ctx: &Context, task: &str, force: bool) -> anyhow::Result<()> {
    let task: Task = task.parse()?;
    ctx.refuse_overwrite(force)?;
    let uploads_dir = ctx.uploads_dir();
    if force && uploads_dir.exists() {
        std::fs::remove_dir_all(&uploads_dir)
            .with_context(|| format!("Failed to clear {}", uploads_dir.display()))?;
    }
    ctx.save(&FormState::for_task(task))?;
    println!("Started a {task} model card at {}", ctx.draft_path.display());
    Ok(())
}

fn handle_fields(ctx: &Context, only: Option<&str>) -> anyhow::Result<()> {
    let schema = ctx.schema()?;
    let task = if ctx.draft_path.exists() {
        ctx.load()?.task()
    } else {
        None
    };
    let layout = form::form_layout(&schema, task);
    if let Some(only) = only {
        if !layout.iter().any(|s| s.key == only) {
            anyhow::bail!("No visible section '{only}'");
        }
    }
    for section in layout.iter().filter(|s| only.is_none_or(|o| s.key == o)) {
        println!("{} [{}]", section.display_name, section.key);
        for field in &section.fields {
            let props = &field.props;
            let kind = serde_json::to_value(props.field_type)?;
            println!(
                "  {:<40} {:<8} {}{}",
                field.key,
                kind.as_str().unwrap_or_default(),
                props.display_label(&field.key),
                if props.required { " *" } else { "" }
            );
        }
    }
    Ok(())
}

fn handle_set(
    ctx: &Context,
    section: &str,
    field: &str,
    value: &str,
    scope: &ScopeArgs,
) -> anyhow::Result<()> {
    let schema = ctx.schema()?;
    let scope = scope.to_scope()?;
    let applied = ctx.update(|state| {
        Ok(form::apply_input(state, &schema, section, field, &scope, value)?)
    })?;
    println!("Set {} = {}", applied.key, applied.value);
    if let Some(message) = &applied.format_issue {
        warn!(key = %applied.key, "{message}");
    }
    Ok(())
}

fn handle_architecture(ctx: &Context, action: ArchitectureAction) -> anyhow::Result<()> {
    match action {
        ArchitectureAction::Add => {
            let index = ctx.update(|state| Ok(form::add_learning_architecture(state)))?;
            println!("Added learning architecture {}", index + 1);
        }
        ArchitectureAction::Remove { number } => {
            if number == 0 {
                anyhow::bail!("Learning architectures are numbered from 1");
            }
            ctx.update(|state| Ok(form::remove_learning_architecture(state, number - 1)?))?;
            println!("Removed learning architecture {number}");
        }
    }
    Ok(())
}

fn handle_evaluation(ctx: &Context, action: EvaluationAction) -> anyhow::Result<()> {
    match action {
        EvaluationAction::Add { name } => {
            let name = ctx.update(|state| Ok(form::add_evaluation(state, &name)?))?;
            println!("Added evaluation '{name}'");
        }
        EvaluationAction::Remove { name } => {
            ctx.update(|state| Ok(form::remove_evaluation(state, &name)?))?;
            println!("Removed evaluation '{name}'");
        }
        EvaluationAction::List => {
            let state = ctx.load()?;
            for name in state.evaluation_forms() {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn handle_metric(ctx: &Context, action: MetricAction) -> anyhow::Result<()> {
    match action {
        MetricAction::Add {
            evaluation,
            group,
            metric,
        } => {
            let schema = ctx.schema()?;
            let name = ctx.update(|state| {
                Ok(form::add_metric(state, &schema, &evaluation, &group, &metric)?)
            })?;
            println!("Added metric {name} to '{evaluation}'");
        }
        MetricAction::Remove {
            evaluation,
            group,
            metric,
        } => {
            ctx.update(|state| Ok(form::remove_metric(state, &evaluation, &group, &metric)?))?;
            println!("Removed metric {metric} from '{evaluation}'");
        }
    }
    Ok(())
}

fn handle_appendix(ctx: &Context, action: AppendixAction) -> anyhow::Result<()> {
    match action {
        AppendixAction::Add { file, label } => {
            let store = ctx.uploads_dir();
            let added = ctx.update(|state| Ok(uploads::add_appendix(state, &file, &label, &store)?))?;
            println!("Added {} to the appendix", added.original_name);
        }
        AppendixAction::Remove { name } => {
            ctx.update(|state| Ok(uploads::remove_appendix(state, &name)?))?;
            println!("Removed {name} from the appendix");
        }
    }
    Ok(())
}

fn handle_validate(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let schema = ctx.schema()?;
    let state = ctx.load()?;
    let report = validate(&schema, &state);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (section, items) in report.grouped() {
        println!("{section}");
        for item in items {
            println!("  - {}", item.label);
        }
    }
    for issue in &report.format_issues {
        println!("Invalid format: {} ({})", issue.label, issue.message);
    }
    let progress = report.progress;
    println!(
        "Progress: {}% ({}/{} required fields)",
        progress.percent(),
        progress.required_filled,
        progress.required_total
    );
    if report.is_complete() && !report.has_format_issues() {
        println!("All required fields are filled.");
    }
    Ok(())
}

fn handle_export(
    ctx: &Context,
    format: &str,
    out: Option<PathBuf>,
    meta: &[String],
) -> anyhow::Result<()> {
    let format: ExportFormat = format.parse()?;
    let schema = ctx.schema()?;
    let state = ctx.load()?;
    let dir = out.unwrap_or_else(|| ctx.config.output_dir(&ctx.workspace));

    let mut exporter = Exporter::new(&schema, &ctx.config, &state);
    if !meta.is_empty() {
        exporter = exporter.with_readme_overrides(parse_meta(meta)?);
    }
    let outcome = exporter.export(format, &dir)?;
    if !outcome.missing.is_empty() {
        println!(
            "Warning: {} required field(s) are empty. Run `modelcard validate` for details.",
            outcome.missing.len()
        );
    }
    println!("Wrote {} ({} bytes)", outcome.path.display(), outcome.bytes);
    Ok(())
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => write_default_config(&ctx.workspace),
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&ctx.config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn write_default_config(workspace: &Path) -> anyhow::Result<()> {
    let config_path = workspace_config_path(workspace);
    if config_path.exists() {
        println!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(&ToolConfig::default())?;
    std::fs::write(&config_path, &toml_str)?;
    println!(
        "Created default configuration at: {}",
        config_path.display()
    );
    Ok(())
}

//! Draft persistence: the form state kept as JSON inside the workspace.

use anyhow::Context as _;
use modelcard_core::FormState;
use std::path::Path;

/// Read the draft at `path`.
pub fn load(path: &Path) -> anyhow::Result<FormState> {
    if !path.exists() {
        anyhow::bail!(
            "No draft at {}. Start one with `modelcard new --task <task>`.",
            path.display()
        );
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read draft {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Draft {} is corrupt", path.display()))
}

/// Write the draft to `path`, replacing the previous file atomically.
pub fn save(path: &Path, state: &FormState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to save draft {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Saved draft");
    Ok(())
}

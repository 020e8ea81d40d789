use crate::grading::{GradingConfig, GradingSystem};
use anyhow::Context;
use std::path::Path;

pub const GRADING_FILE_ENV: &str = "RESULTSD_GRADING";

/// Resolve the grading system used until a workspace overrides it. A bad
/// file here is fatal: the process refuses to start rather than grade with
/// a broken table.
pub fn load_startup_grading() -> anyhow::Result<GradingSystem> {
    match std::env::var_os(GRADING_FILE_ENV) {
        Some(path) if !path.is_empty() => load_grading_file(Path::new(&path)),
        _ => Ok(GradingSystem::waec()),
    }
}

pub fn load_grading_file(path: &Path) -> anyhow::Result<GradingSystem> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read grading config {}", path.display()))?;
    let config: GradingConfig = serde_json::from_str(&text)
        .with_context(|| format!("parse grading config {}", path.display()))?;
    let system = GradingSystem::new(config)
        .with_context(|| format!("validate grading config {}", path.display()))?;
    Ok(system)
}

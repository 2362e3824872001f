//! JSON report files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Write `data` as pretty JSON to `path` and return the absolute path.
pub fn save_report<T: Serialize>(data: &T, path: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(path)
}

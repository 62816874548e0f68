//! Reading export files from disk.

use anyhow::{Context, Result};
use std::path::Path;

/// An export file read into memory.
pub struct ExportFile {
    /// Base name, used for upload and chunk names.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ExportFile {
    /// The contents as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes)
            .with_context(|| format!("{} is not valid UTF-8", self.name))
    }
}

/// Only `.json` files are accepted.
pub fn ensure_json_extension(path: &Path) -> Result<()> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        anyhow::bail!(
            "Unsupported file: {} (only .json exports can be imported)",
            path.display()
        );
    }
    Ok(())
}

pub fn read_export(path: &Path) -> Result<ExportFile> {
    ensure_json_extension(path)?;
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read export file: {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(ExportFile { name, bytes })
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

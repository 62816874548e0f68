//! `convo split`: write an export's upload chunks to disk.
//!
//! Uses the same chunker and file names as a chunked upload, so the output
//! can be inspected or uploaded by hand.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use convo_import_core::chunk::{array_len, chunk_file_name, split_json_array_into_chunks};
use convo_import_core::error::ImportError;

use crate::input::{format_bytes, read_export};

/// One written chunk file.
#[derive(Debug, Clone)]
pub struct WrittenChunk {
    pub path: PathBuf,
    pub conversations: usize,
    pub bytes: u64,
}

/// Split `path` into chunk files under `out_dir`.
pub fn split_file(path: &Path, out_dir: &Path, max_bytes: u64) -> Result<Vec<WrittenChunk>> {
    let file = read_export(path)?;
    let value: Value = serde_json::from_slice(&file.bytes)
        .map_err(|e| ImportError::InvalidJson(e.to_string()))?;
    let Value::Array(items) = value else {
        anyhow::bail!("{} is not a JSON array; only multi-conversation exports can be split", file.name);
    };

    let chunks = split_json_array_into_chunks(&items, max_bytes);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    let total = chunks.len();
    let mut written = Vec::with_capacity(total);
    for (i, chunk) in chunks.iter().enumerate() {
        let out = out_dir.join(chunk_file_name(&file.name, i + 1, total));
        let bytes = serde_json::to_vec(chunk)?;
        std::fs::write(&out, &bytes)
            .with_context(|| format!("Failed to write chunk: {}", out.display()))?;
        tracing::debug!(chunk = i + 1, total, bytes = bytes.len(), "wrote chunk");
        written.push(WrittenChunk {
            path: out,
            conversations: chunk.len(),
            bytes: array_len(chunk),
        });
    }
    Ok(written)
}

pub fn run_split(path: &Path, out_dir: &Path, max_bytes: u64) -> Result<()> {
    let written = split_file(path, out_dir, max_bytes)?;
    if written.is_empty() {
        println!("Nothing to split: the export is empty.");
        return Ok(());
    }
    for chunk in &written {
        println!(
            "{}  {} conversation(s)  {}",
            chunk.path.display(),
            chunk.conversations,
            format_bytes(chunk.bytes)
        );
    }
    println!("{} chunk(s) written to {}", written.len(), out_dir.display());
    Ok(())
}

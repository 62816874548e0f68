//! `convo inspect`: parse an export and show what would be imported.
//!
//! Prints the detected format, total / duplicate / importable counts, and a
//! filtered list of previews. Without `--offline` the destination's
//! conversation list is fetched so duplicates are marked.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use convo_import_core::dedup::mark_duplicates;
use convo_import_core::models::{ConversationPreview, ImportFormat, ImportSummary};
use convo_import_core::parser::parse_import_file_at;
use convo_import_core::selection::ConversationFilter;

use crate::cache::ConversationCache;
use crate::config::Config;
use crate::http_transport::HttpTransport;
use crate::input::{format_bytes, read_export};

/// A parsed, duplicate-marked export.
pub struct Inspection {
    pub file_name: String,
    pub size: u64,
    pub format: ImportFormat,
    pub previews: Vec<ConversationPreview>,
}

impl Inspection {
    pub fn summary(&self) -> ImportSummary {
        ImportSummary::from_previews(&self.previews)
    }
}

/// Parse `bytes` and mark duplicates against `existing`.
pub fn inspect_bytes(
    file_name: &str,
    bytes: &[u8],
    existing: &HashSet<String>,
) -> Result<Inspection> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| convo_import_core::error::ImportError::InvalidJson(e.to_string()))?;
    let parsed = parse_import_file_at(text, Utc::now())?;
    tracing::debug!(
        format = %parsed.format,
        total = parsed.total_count,
        "parsed export"
    );
    Ok(Inspection {
        file_name: file_name.to_string(),
        size: bytes.len() as u64,
        format: parsed.format,
        previews: mark_duplicates(parsed.conversations, existing),
    })
}

/// Existing source ids from the server, or none when offline.
pub async fn existing_ids(cache: Option<&ConversationCache>) -> Result<HashSet<String>> {
    match cache {
        Some(cache) => Ok(cache.ids().await?),
        None => Ok(HashSet::new()),
    }
}

pub async fn run_inspect(
    config: &Config,
    path: &Path,
    offline: bool,
    filter: &ConversationFilter,
    limit: usize,
    json: bool,
) -> Result<()> {
    let file = read_export(path)?;
    let cache = if offline {
        None
    } else {
        let transport = Arc::new(HttpTransport::new(&config.server)?);
        Some(ConversationCache::new(transport))
    };
    let existing = existing_ids(cache.as_ref()).await?;
    let inspection = inspect_bytes(&file.name, &file.bytes, &existing)?;

    let now = Utc::now();
    let visible = filter.apply(&inspection.previews, now);

    if json {
        let out = serde_json::json!({
            "file": inspection.file_name,
            "size": inspection.size,
            "format": inspection.format,
            "summary": inspection.summary(),
            "conversations": visible.iter().take(limit).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let summary = inspection.summary();
    println!("File:        {} ({})", inspection.file_name, format_bytes(inspection.size));
    println!("Format:      {}", inspection.format);
    println!("Total:       {}", summary.total);
    if offline {
        println!("Duplicates:  not checked (offline)");
    } else {
        println!("Duplicates:  {}", summary.duplicates);
    }
    println!("Importable:  {}", summary.importable);
    println!();

    if visible.is_empty() {
        println!("No conversations match.");
        return Ok(());
    }

    for preview in visible.iter().take(limit) {
        print_preview(preview);
    }
    if visible.len() > limit {
        println!("... {} more", visible.len() - limit);
    }
    Ok(())
}

fn print_preview(preview: &ConversationPreview) {
    let marker = if preview.is_duplicate { "  [exists]" } else { "" };
    println!("{}  {}{}", preview.id, preview.title, marker);
    println!(
        "    created: {}  model: {}  messages: {}",
        preview.created_at.format("%Y-%m-%d"),
        preview.model,
        preview.message_count
    );
    println!("    conversation: {}", preview.conversation_id);
    if !preview.first_message_preview.is_empty() {
        println!("    > {}", preview.first_message_preview);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_marks_duplicates() {
        let body = br#"[
            {"id": "a", "title": "First", "mapping": {}},
            {"id": "b", "title": "Second", "mapping": {}}
        ]"#;
        let existing: HashSet<String> = ["b".to_string()].into_iter().collect();
        let inspection = inspect_bytes("conversations.json", body, &existing).unwrap();
        assert_eq!(inspection.format, ImportFormat::ChatGpt);
        let summary = inspection.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.importable, 1);
    }

    #[test]
    fn inspect_rejects_garbage() {
        assert!(inspect_bytes("x.json", b"{not json", &HashSet::new()).is_err());
        assert!(inspect_bytes("x.json", br#"{"foo": 1}"#, &HashSet::new()).is_err());
    }
}

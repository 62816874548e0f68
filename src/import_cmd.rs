//! `convo import`: parse, select and upload an export.
//!
//! The command walks the same flow as the interactive import dialog, with
//! the user's choices taken from flags:
//!
//! 1. Read the file and reject anything that is not `.json`.
//! 2. Fetch existing conversation ids and mark duplicates.
//! 3. Apply the chosen mode (`full`, `batch`, `selective`) to an [`ImportFlow`].
//! 4. Hand the resulting request to the [`ImportOrchestrator`].
//!
//! `--dry-run` runs the whole pipeline against an in-memory server.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use convo_import_core::error::SelectionError;
use convo_import_core::models::{ConversationPreview, ImportSummary};
use convo_import_core::selection::{
    ConversationFilter, FlowEvent, FlowState, ImportFlow, UploadRequest, MAX_SELECTION,
};
use convo_import_core::transport::memory::InMemoryTransport;
use convo_import_core::transport::ImportTransport;
use convo_import_core::upload::UploadState;

use crate::cache::ConversationCache;
use crate::config::Config;
use crate::http_transport::HttpTransport;
use crate::input::read_export;
use crate::inspect::inspect_bytes;
use crate::orchestrator::{ImportOrchestrator, UploadOptions, UploadOutcome};
use crate::progress::ProgressMode;
use crate::timer::TokioScheduler;

/// Which conversations to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImportMode {
    /// Upload the original file unchanged.
    Full,
    /// A 1-based range over the importable conversations.
    Batch,
    /// Conversations picked by id, search, and date filter.
    Selective,
}

#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub mode: ImportMode,
    pub start: Option<usize>,
    pub end: Option<usize>,
    /// Preview ids (`chatgpt-3`) or source conversation ids.
    pub ids: Vec<String>,
    pub filter: ConversationFilter,
    pub select_all_visible: bool,
    pub dry_run: bool,
    pub retry_failed: bool,
    pub progress: ProgressMode,
}

pub async fn run_import(config: &Config, path: &Path, args: &ImportArgs) -> Result<()> {
    let file = read_export(path)?;

    let transport: Arc<dyn ImportTransport> = if args.dry_run {
        Arc::new(InMemoryTransport::new())
    } else {
        Arc::new(HttpTransport::new(&config.server)?)
    };
    let cache = Arc::new(ConversationCache::new(Arc::clone(&transport)));

    let existing = cache
        .ids()
        .await
        .context("Failed to fetch existing conversations")?;
    let inspection = inspect_bytes(&file.name, &file.bytes, &existing)?;
    let now = Utc::now();

    let mut flow = ImportFlow::new();
    flow.apply(FlowEvent::FileParsed(inspection.previews), now)?;
    print_summary(&file.name, &flow.summary());

    let events = mode_events(&flow, args)?;
    apply_mode_events(&mut flow, events, now)?;
    let request = match flow.state() {
        FlowState::UploadReady(request) => request.clone(),
        other => anyhow::bail!("Import is not ready to upload (step: {:?})", other),
    };

    let max_file_size = match config.local_max_file_size() {
        Some(limit) => Some(limit),
        None => transport.max_file_size().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read server file size limit");
            None
        }),
    };
    let options = UploadOptions {
        chunk_threshold: config.upload.chunk_threshold_bytes,
        max_file_size,
        polling: config.polling.policy(),
    };

    let mut orchestrator = ImportOrchestrator::new(
        Arc::clone(&transport),
        Arc::clone(&cache),
        Arc::new(TokioScheduler),
        options,
    )
    .with_reporter(args.progress.reporter());

    let importable = flow.summary().importable;
    let mut outcome = match request {
        UploadRequest::FullFile => {
            orchestrator
                .upload_file(&file.name, file.bytes, Some(importable))
                .await?
        }
        UploadRequest::Conversations(raw) => {
            println!("Sending {} conversation(s)", raw.len());
            orchestrator.upload_conversations(&file.name, raw).await?
        }
    };
    report_outcome(&outcome);

    if args.retry_failed && !outcome.failed_conversations().is_empty() {
        println!(
            "Retrying {} failed conversation(s)",
            outcome.failed_conversations().len()
        );
        outcome = orchestrator.retry_failed(&file.name, &outcome).await?;
        report_outcome(&outcome);
    }

    flow.apply(FlowEvent::UploadFinished, now)?;

    if let UploadState::Error(err) = &outcome.state {
        anyhow::bail!("{}", err);
    }
    Ok(())
}

/// Flow events for the chosen mode, after `FileParsed`.
fn mode_events(flow: &ImportFlow, args: &ImportArgs) -> Result<Vec<FlowEvent>> {
    let events = match args.mode {
        ImportMode::Full => vec![FlowEvent::ChooseFull],
        ImportMode::Batch => {
            let start = args.start.unwrap_or(1);
            let end = match args.end {
                Some(end) => end,
                None => anyhow::bail!("--end is required for batch imports"),
            };
            vec![FlowEvent::ChooseBatch { start, end }]
        }
        ImportMode::Selective => {
            let mut events = vec![
                FlowEvent::ChooseSelective,
                FlowEvent::SetFilter(args.filter.clone()),
            ];
            if args.select_all_visible {
                events.push(FlowEvent::SelectAllVisible);
            }
            for id in &args.ids {
                let preview = resolve_id(flow.previews(), id)
                    .with_context(|| format!("No conversation with id '{}' in this file", id))?;
                events.push(FlowEvent::Select(preview.id.clone()));
            }
            events.push(FlowEvent::ConfirmSelection);
            events
        }
    };
    Ok(events)
}

/// Feed mode events into the flow. A full selection only warns; the
/// conversations selected so far are kept.
fn apply_mode_events(
    flow: &mut ImportFlow,
    events: Vec<FlowEvent>,
    now: DateTime<Utc>,
) -> Result<()> {
    for event in events {
        match flow.apply(event.clone(), now) {
            Ok(()) => {}
            Err(SelectionError::CapReached) => {
                tracing::warn!(?event, max = MAX_SELECTION, "selection is full, skipping");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Match a preview id first, then a source conversation id.
fn resolve_id<'a>(previews: &'a [ConversationPreview], id: &str) -> Option<&'a ConversationPreview> {
    previews
        .iter()
        .find(|p| p.id == id)
        .or_else(|| previews.iter().find(|p| p.conversation_id == id))
}

fn print_summary(file_name: &str, summary: &ImportSummary) {
    println!(
        "{}: {} conversation(s), {} already imported, {} importable",
        file_name, summary.total, summary.duplicates, summary.importable
    );
}

fn report_outcome(outcome: &UploadOutcome) {
    match &outcome.state {
        UploadState::Complete => println!("Import complete."),
        UploadState::Error(err) => println!("Import failed: {}", err),
        UploadState::Idle => println!("Import still processing on the server."),
        other => println!("Import ended in state {}", other),
    }
    if let Some(total) = outcome.session.total_chunks {
        println!("Uploaded in {} chunk(s).", total);
    }
    if let Some(response) = &outcome.selective {
        println!(
            "{} succeeded, {} failed",
            response.success.len(),
            response.failed.len()
        );
        for item in &response.failed {
            println!(
                "  failed #{} {} ({}): {}",
                item.index,
                item.title,
                item.conversation_id,
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(mode: ImportMode) -> ImportArgs {
        ImportArgs {
            mode,
            start: None,
            end: None,
            ids: Vec::new(),
            filter: ConversationFilter::default(),
            select_all_visible: false,
            dry_run: true,
            retry_failed: false,
            progress: ProgressMode::Off,
        }
    }

    fn flow() -> ImportFlow {
        flow_of(3)
    }

    fn flow_of(n: usize) -> ImportFlow {
        let previews = (0..n)
            .map(|i| ConversationPreview {
                id: format!("chatgpt-{}", i),
                conversation_id: format!("conv-{}", i),
                title: format!("Chat {}", i),
                created_at: Utc::now(),
                model: "gpt-4".into(),
                message_count: 1,
                first_message_preview: String::new(),
                is_duplicate: false,
                raw_data: json!({ "id": format!("conv-{}", i) }),
            })
            .collect();
        let mut flow = ImportFlow::new();
        flow.apply(FlowEvent::FileParsed(previews), Utc::now()).unwrap();
        flow
    }

    #[test]
    fn batch_requires_end() {
        assert!(mode_events(&flow(), &args(ImportMode::Batch)).is_err());
        let mut a = args(ImportMode::Batch);
        a.end = Some(2);
        assert_eq!(
            mode_events(&flow(), &a).unwrap(),
            vec![FlowEvent::ChooseBatch { start: 1, end: 2 }]
        );
    }

    #[test]
    fn selective_ids_resolve_either_form() {
        let mut a = args(ImportMode::Selective);
        a.ids = vec!["chatgpt-0".into(), "conv-2".into()];
        let mut flow = flow();
        for event in mode_events(&flow, &a).unwrap() {
            flow.apply(event, Utc::now()).unwrap();
        }
        match flow.state() {
            FlowState::UploadReady(UploadRequest::Conversations(raw)) => {
                assert_eq!(raw, &vec![json!({"id": "conv-0"}), json!({"id": "conv-2"})]);
            }
            other => panic!("unexpected state {:?}", other),
        }

        a.ids = vec!["missing".into()];
        assert!(mode_events(&flow, &a).is_err());
    }

    fn uploaded(flow: &ImportFlow) -> Vec<serde_json::Value> {
        match flow.state() {
            FlowState::UploadReady(UploadRequest::Conversations(raw)) => raw.clone(),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn named_ids_survive_select_all_and_repeats() {
        let mut a = args(ImportMode::Selective);
        a.select_all_visible = true;
        a.ids = vec!["conv-1".into(), "chatgpt-1".into()];
        let mut flow = flow();
        let events = mode_events(&flow, &a).unwrap();
        apply_mode_events(&mut flow, events, Utc::now()).unwrap();
        assert_eq!(
            uploaded(&flow),
            vec![
                json!({"id": "conv-0"}),
                json!({"id": "conv-1"}),
                json!({"id": "conv-2"})
            ]
        );
    }

    #[test]
    fn full_selection_warns_and_keeps_what_was_picked() {
        let mut a = args(ImportMode::Selective);
        a.select_all_visible = true;
        a.ids = vec!["chatgpt-501".into()];
        let mut flow = flow_of(502);
        let events = mode_events(&flow, &a).unwrap();
        apply_mode_events(&mut flow, events, Utc::now()).unwrap();

        let raw = uploaded(&flow);
        assert_eq!(raw.len(), MAX_SELECTION);
        assert!(!raw.contains(&json!({"id": "conv-501"})));
    }
}

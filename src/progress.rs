//! Import progress reporting.
//!
//! Reports what the upload is doing so users see how far along it is, when
//! the server is still processing, and how it ended. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use convo_import_core::progress::ProgressLabel;
use convo_import_core::upload::Notice;

/// A single progress event for one upload.
#[derive(Clone, Debug)]
pub enum ImportProgressEvent {
    Started {
        file_name: String,
        total_chunks: Option<usize>,
    },
    Uploading {
        percent: u8,
        label: ProgressLabel,
        /// `(current, total)` for chunked uploads.
        chunk: Option<(usize, usize)>,
    },
    /// A poll attempt refreshed the conversation list.
    Polling { attempt: u32, max_attempts: u32 },
    Notice(Notice),
    /// The indicator was dismissed after its delay.
    Dismissed,
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// User-facing text for a notice.
pub fn notice_text(notice: &Notice) -> String {
    match notice {
        Notice::Success => "Conversations imported successfully".to_string(),
        Notice::Processing => {
            "Import started, the server is still processing your conversations".to_string()
        }
        Notice::ConnectionLost => {
            "Connection lost, checking whether the import completed".to_string()
        }
        Notice::PartialFailure { failed } => {
            format!("Import finished, {} conversation(s) failed", failed)
        }
        Notice::Failed(err) => format!("Import failed: {}", err),
        Notice::PollTimedOut => {
            "Still processing after 2 minutes. Check your conversations later.".to_string()
        }
    }
}

fn notice_kind(notice: &Notice) -> &'static str {
    match notice {
        Notice::Success => "success",
        Notice::Processing => "processing",
        Notice::ConnectionLost => "connection_lost",
        Notice::PartialFailure { .. } => "partial_failure",
        Notice::Failed(_) => "error",
        Notice::PollTimedOut => "poll_timeout",
    }
}

/// Human-friendly progress on stderr: "import conversations.json  uploading  45%  parsing conversations".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Started {
                file_name,
                total_chunks: Some(n),
            } => format!("import {}  {} chunks\n", file_name, n),
            ImportProgressEvent::Started { file_name, .. } => format!("import {}\n", file_name),
            ImportProgressEvent::Uploading {
                percent,
                label,
                chunk: Some((current, total)),
            } => format!(
                "import  uploading  {:>3}%  chunk {} / {}  {}\n",
                percent,
                current,
                total,
                label.text()
            ),
            ImportProgressEvent::Uploading { percent, label, .. } => {
                format!("import  uploading  {:>3}%  {}\n", percent, label.text())
            }
            ImportProgressEvent::Polling {
                attempt,
                max_attempts,
            } => format!("import  polling  {} / {}\n", attempt, max_attempts),
            ImportProgressEvent::Notice(notice) => format!("{}\n", notice_text(notice)),
            ImportProgressEvent::Dismissed => return,
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ImportProgressEvent) -> serde_json::Value {
        match event {
            ImportProgressEvent::Started {
                file_name,
                total_chunks,
            } => serde_json::json!({
                "event": "started",
                "file": file_name,
                "total_chunks": total_chunks
            }),
            ImportProgressEvent::Uploading {
                percent,
                label,
                chunk,
            } => serde_json::json!({
                "event": "progress",
                "phase": "uploading",
                "percent": percent,
                "label": label.text(),
                "chunk": chunk.map(|(c, _)| c),
                "total_chunks": chunk.map(|(_, t)| t)
            }),
            ImportProgressEvent::Polling {
                attempt,
                max_attempts,
            } => serde_json::json!({
                "event": "progress",
                "phase": "polling",
                "attempt": attempt,
                "max_attempts": max_attempts
            }),
            ImportProgressEvent::Notice(notice) => serde_json::json!({
                "event": "notice",
                "kind": notice_kind(notice),
                "message": notice_text(notice)
            }),
            ImportProgressEvent::Dismissed => serde_json::json!({ "event": "dismissed" }),
        }
    }
}

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse `--progress`. `None` picks the TTY default.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

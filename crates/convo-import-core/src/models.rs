//! Core data models shared by the parser, selection, and upload stages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The export schemas the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    /// The product's own single-conversation export.
    LibreChat,
    /// `conversations.json` from a ChatGPT data export.
    ChatGpt,
    /// `conversations.json` from a Claude data export.
    Claude,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::LibreChat => "librechat",
            ImportFormat::ChatGpt => "chatgpt",
            ImportFormat::Claude => "claude",
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lightweight summary of one source conversation, used to choose what to
/// import before anything is uploaded.
///
/// Every field except `is_duplicate` is fixed at parse time.
/// `is_duplicate` is assigned once by [`crate::dedup::mark_duplicates`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationPreview {
    /// Local sequence key, `"{format}-{index}"`.
    pub id: String,
    /// Conversation id as it appears in the source export.
    pub conversation_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub message_count: usize,
    /// First user message, at most 100 characters.
    pub first_message_preview: String,
    pub is_duplicate: bool,
    /// The untouched source object, sent as-is for batch and selective imports.
    #[serde(skip)]
    pub raw_data: serde_json::Value,
}

/// Output of [`crate::parser::parse_import_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub format: ImportFormat,
    pub conversations: Vec<ConversationPreview>,
    pub total_count: usize,
}

/// Counts shown before the user picks an import mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total: usize,
    pub duplicates: usize,
    pub importable: usize,
}

impl ImportSummary {
    pub fn from_previews(previews: &[ConversationPreview]) -> Self {
        let duplicates = previews.iter().filter(|p| p.is_duplicate).count();
        Self {
            total: previews.len(),
            duplicates,
            importable: previews.len() - duplicates,
        }
    }
}

/// Coarse status of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Uploading,
    Polling,
    Complete,
    Error,
}

/// Observable bookkeeping for one upload, independent of the state machine
/// internals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSession {
    pub file_name: String,
    pub total_chunks: Option<usize>,
    pub current_chunk: Option<usize>,
    pub status: UploadStatus,
}

impl UploadSession {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            total_chunks: None,
            current_chunk: None,
            status: UploadStatus::Idle,
        }
    }
}

/// How the import endpoint acknowledged a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// Stored before the response was sent.
    Success,
    /// Accepted and still being processed server-side.
    Processing,
}

/// Response body of the multipart import endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UploadReply {
    #[serde(default)]
    pub message: Option<String>,
    /// Explicit status, when the server sends one. Unknown values are
    /// treated as absent.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<ReplyStatus>,
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<ReplyStatus>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

impl UploadReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            status: None,
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            status: Some(ReplyStatus::Processing),
        }
    }

    /// Reply for a 2xx body that is not the expected JSON object. The raw
    /// text becomes the message.
    pub fn from_text(body: &str) -> Self {
        let body = body.trim();
        Self {
            message: (!body.is_empty()).then(|| body.to_string()),
            status: None,
        }
    }

    /// Resolve the reply status.
    ///
    /// An explicit `status` field wins. Otherwise a message containing
    /// "processing" (any case) means the import is still running.
    pub fn status(&self) -> ReplyStatus {
        if let Some(status) = self.status {
            return status;
        }
        let processing = self
            .message
            .as_deref()
            .map(|m| m.trim().to_lowercase().contains("processing"))
            .unwrap_or(false);
        if processing {
            ReplyStatus::Processing
        } else {
            ReplyStatus::Success
        }
    }
}

/// Per-conversation outcome reported by the selective import endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportItemResult {
    /// Position of the conversation in the submitted array.
    pub index: usize,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of the selective import endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SelectiveImportResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub success: Vec<ImportItemResult>,
    #[serde(default)]
    pub failed: Vec<ImportItemResult>,
}

impl SelectiveImportResponse {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Pick the raw conversations whose submission failed, in submission order,
/// so they can be retried on their own.
pub fn failed_subset(
    submitted: &[serde_json::Value],
    response: &SelectiveImportResponse,
) -> Vec<serde_json::Value> {
    let mut indices: Vec<usize> = response.failed.iter().map(|r| r.index).collect();
    indices.sort_unstable();
    indices.dedup();
    indices
        .into_iter()
        .filter_map(|i| submitted.get(i).cloned())
        .collect()
}

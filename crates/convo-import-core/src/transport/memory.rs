//! In-memory [`ImportTransport`] for tests and dry runs.
//!
//! Records every request, stores uploaded conversations by source id, and
//! replays scripted outcomes so failure paths can be driven without a server.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::models::{ImportItemResult, SelectiveImportResponse, UploadReply};

use super::ImportTransport;

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    Upload { file_name: String, bytes: usize },
    Selective { count: usize },
}

/// Scripted reply for the next `upload_file` call.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Store the payload and reply success.
    Accept,
    /// Reply "processing" without storing anything yet. The payload lands in
    /// the store on the next `conversation_ids` call.
    AcceptLater,
    /// Store the payload, then fail as if the reply was lost.
    StoreThenFail(TransportError),
    Fail(TransportError),
}

#[derive(Default)]
struct State {
    ids: HashSet<String>,
    pending: Vec<String>,
    requests: Vec<RecordedRequest>,
    upload_script: VecDeque<UploadOutcome>,
    reject_ids: HashSet<String>,
}

/// In-memory destination server.
pub struct InMemoryTransport {
    state: Mutex<State>,
    max_file_size: Option<u64>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_file_size: None,
        }
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = Some(limit);
        self
    }

    /// Pre-populate stored source ids.
    pub fn with_existing<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut state) = self.state.lock() {
            state.ids.extend(ids.into_iter().map(Into::into));
        }
        self
    }

    /// Queue outcomes for upcoming `upload_file` calls. Unscripted calls accept.
    pub fn script_uploads(&self, outcomes: impl IntoIterator<Item = UploadOutcome>) {
        if let Ok(mut state) = self.state.lock() {
            state.upload_script.extend(outcomes);
        }
    }

    /// Make the selective endpoint fail every conversation with this id.
    pub fn reject_id(&self, id: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.reject_ids.insert(id.into());
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn stored_ids(&self) -> HashSet<String> {
        self.state.lock().map(|s| s.ids.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Other("transport state poisoned".to_string()))
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Source id of a raw conversation object, across the known export shapes.
fn source_id(conversation: &Value) -> Option<String> {
    ["conversationId", "id", "conversation_id", "uuid"]
        .iter()
        .find_map(|key| conversation.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn ids_in_payload(bytes: &[u8]) -> Vec<String> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Array(items)) => items.iter().filter_map(source_id).collect(),
        Ok(value) => source_id(&value).into_iter().collect(),
        Err(_) => Vec::new(),
    }
}

#[async_trait]
impl ImportTransport for InMemoryTransport {
    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReply, TransportError> {
        let mut state = self.lock()?;
        state.requests.push(RecordedRequest::Upload {
            file_name: file_name.to_string(),
            bytes: bytes.len(),
        });
        let outcome = state.upload_script.pop_front().unwrap_or(UploadOutcome::Accept);
        match outcome {
            UploadOutcome::Accept => {
                state.ids.extend(ids_in_payload(&bytes));
                Ok(UploadReply::success("Conversations imported successfully"))
            }
            UploadOutcome::AcceptLater => {
                state.pending.extend(ids_in_payload(&bytes));
                Ok(UploadReply::processing("Import started, processing in background"))
            }
            UploadOutcome::StoreThenFail(err) => {
                state.ids.extend(ids_in_payload(&bytes));
                Err(err)
            }
            UploadOutcome::Fail(err) => Err(err),
        }
    }

    async fn import_selective(
        &self,
        conversations: Vec<Value>,
    ) -> Result<SelectiveImportResponse, TransportError> {
        let mut state = self.lock()?;
        state.requests.push(RecordedRequest::Selective {
            count: conversations.len(),
        });

        let mut response = SelectiveImportResponse::default();
        for (index, conversation) in conversations.iter().enumerate() {
            let conversation_id = source_id(conversation).unwrap_or_default();
            let title = conversation
                .get("title")
                .or_else(|| conversation.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if state.reject_ids.contains(&conversation_id) {
                response.failed.push(ImportItemResult {
                    index,
                    conversation_id,
                    title,
                    error: Some("rejected".to_string()),
                });
            } else {
                state.ids.insert(conversation_id.clone());
                response.success.push(ImportItemResult {
                    index,
                    conversation_id,
                    title,
                    error: None,
                });
            }
        }
        response.message = format!(
            "Imported {} of {} conversations",
            response.success.len(),
            conversations.len()
        );
        Ok(response)
    }

    async fn conversation_ids(&self) -> Result<HashSet<String>, TransportError> {
        let mut state = self.lock()?;
        let pending = std::mem::take(&mut state.pending);
        state.ids.extend(pending);
        Ok(state.ids.clone())
    }

    async fn max_file_size(&self) -> Result<Option<u64>, TransportError> {
        Ok(self.max_file_size)
    }
}

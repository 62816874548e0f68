//! Upload orchestrator.
//!
//! Drives one upload at a time through [`UploadMachine`], performing the
//! effects each transition asks for: cache invalidation, starting and
//! stopping the polling ticker, notices and dismiss delays.
//!
//! ```text
//! upload_file ──▶ preflight ──▶ single-shot ─┐
//!                         └──▶ chunk 1..N ───┤   (lost reply on chunk i: poll, then resume at i+1)
//! upload_conversations ──▶ selective ────────┤
//!                                            ▼
//!                               Complete │ Error │ Polling ──▶ Complete │ Idle
//! ```
//!
//! The polling ticker is owned by the orchestrator. At most one exists, and
//! it is dropped on completion, on fatal error, on poll exhaustion, and when
//! the orchestrator itself is dropped.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use convo_import_core::chunk::{chunk_file_name, split_json_array_into_chunks, DEFAULT_CHUNK_THRESHOLD};
use convo_import_core::error::{ImportError, SelectionError, TransportError};
use convo_import_core::models::{failed_subset, SelectiveImportResponse, UploadSession};
use convo_import_core::progress::{ProgressModel, SIMULATED_TICK};
use convo_import_core::selection::MAX_SELECTION;
use convo_import_core::transport::ImportTransport;
use convo_import_core::upload::{
    Effect, Notice, PollingPolicy, UploadEvent, UploadMachine, UploadPlan, UploadState,
};

use crate::cache::ConversationCache;
use crate::progress::{ImportProgressEvent, ImportProgressReporter, NoProgress};
use crate::timer::{Scheduler, Ticker};

/// Knobs resolved from configuration before an upload starts.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Files at or above this size are split, and no chunk exceeds it.
    pub chunk_threshold: u64,
    /// Largest accepted file. Checked before any request is made.
    pub max_file_size: Option<u64>,
    pub polling: PollingPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            max_file_size: None,
            polling: PollingPolicy::default(),
        }
    }
}

/// How one upload ended.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub state: UploadState,
    pub session: UploadSession,
    pub notices: Vec<Notice>,
    /// Per-item results of a selective upload.
    pub selective: Option<SelectiveImportResponse>,
    /// Raw conversations sent by a selective upload, in order.
    pub submitted: Vec<Value>,
}

impl UploadOutcome {
    pub fn is_complete(&self) -> bool {
        self.state == UploadState::Complete
    }

    /// Conversations a retry would resend.
    pub fn failed_conversations(&self) -> Vec<Value> {
        match &self.selective {
            Some(response) => failed_subset(&self.submitted, response),
            None => Vec::new(),
        }
    }
}

pub struct ImportOrchestrator {
    transport: Arc<dyn ImportTransport>,
    cache: Arc<ConversationCache>,
    scheduler: Arc<dyn Scheduler>,
    reporter: Box<dyn ImportProgressReporter>,
    options: UploadOptions,
    machine: UploadMachine,
    poller: Option<Box<dyn Ticker>>,
    progress: ProgressModel,
    notices: Vec<Notice>,
    baseline: Option<usize>,
    expected_new: Option<usize>,
}

impl ImportOrchestrator {
    pub fn new(
        transport: Arc<dyn ImportTransport>,
        cache: Arc<ConversationCache>,
        scheduler: Arc<dyn Scheduler>,
        options: UploadOptions,
    ) -> Self {
        let machine = UploadMachine::new("", options.polling);
        Self {
            transport,
            cache,
            scheduler,
            reporter: Box::new(NoProgress),
            options,
            machine,
            poller: None,
            progress: ProgressModel::new(),
            notices: Vec::new(),
            baseline: None,
            expected_new: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ImportProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> &UploadState {
        self.machine.state()
    }

    pub fn session(&self) -> &UploadSession {
        self.machine.session()
    }

    /// Whether a polling ticker is currently held.
    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Upload a whole export file.
    ///
    /// `expected_new` is how many conversations the destination should gain,
    /// used to confirm completion while polling. When `None` it is taken from
    /// the payload (array length, or 1 for a single object).
    pub async fn upload_file(
        &mut self,
        file_name: &str,
        bytes: Vec<u8>,
        expected_new: Option<usize>,
    ) -> Result<UploadOutcome, ImportError> {
        let size = bytes.len() as u64;
        if let Some(limit) = self.options.max_file_size {
            if size > limit {
                tracing::warn!(file = file_name, size, limit, "file exceeds size limit");
                return Err(ImportError::file_too_large(size, limit));
            }
        }

        // Parsed at most once: for chunking, or to count what was sent.
        let large = size >= self.options.chunk_threshold;
        let parsed = if large || expected_new.is_none() {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(error = %e, "payload not parseable, sending as one request");
                    None
                }
            }
        } else {
            None
        };
        let expected = expected_new.or_else(|| parsed.as_ref().and_then(payload_count));
        let chunks = match parsed {
            Some(Value::Array(items)) if large => {
                Some(split_json_array_into_chunks(&items, self.options.chunk_threshold))
                    .filter(|chunks| chunks.len() > 1)
            }
            _ => None,
        };

        self.begin(file_name, expected).await;

        match chunks {
            Some(chunks) => self.run_chunked(file_name, chunks, expected).await?,
            None => self.run_single(file_name, bytes).await?,
        }
        self.finish(None, Vec::new())
    }

    /// Send selected raw conversations to the selective endpoint.
    pub async fn upload_conversations(
        &mut self,
        file_name: &str,
        conversations: Vec<Value>,
    ) -> Result<UploadOutcome, ImportError> {
        if conversations.is_empty() {
            return Err(SelectionError::Empty.into());
        }
        if conversations.len() > MAX_SELECTION {
            return Err(SelectionError::RangeTooLarge {
                requested: conversations.len(),
            }
            .into());
        }

        let count = conversations.len();
        self.begin(file_name, Some(count)).await;
        self.apply(UploadEvent::Start(UploadPlan::Selective { count }))
            .await?;
        self.report(ImportProgressEvent::Started {
            file_name: file_name.to_string(),
            total_chunks: None,
        });

        let transport = Arc::clone(&self.transport);
        let payload = conversations.clone();
        let result = self
            .with_progress(async move { transport.import_selective(payload).await })
            .await;

        let response = match result {
            Ok(response) => {
                tracing::info!(
                    succeeded = response.success.len(),
                    failed = response.failed.len(),
                    "selective import replied"
                );
                self.apply(UploadEvent::SelectiveReplied {
                    failed: response.failed.len(),
                })
                .await?;
                Some(response)
            }
            Err(err) => {
                self.fail(err).await?;
                None
            }
        };
        self.poll_until_settled().await?;
        self.finish(response, conversations)
    }

    /// Resend only the conversations a previous selective upload reported
    /// as failed.
    pub async fn retry_failed(
        &mut self,
        file_name: &str,
        previous: &UploadOutcome,
    ) -> Result<UploadOutcome, ImportError> {
        let failed = previous.failed_conversations();
        tracing::info!(count = failed.len(), "retrying failed conversations");
        self.upload_conversations(file_name, failed).await
    }

    /// Stop everything and return to idle. Safe to call in any state.
    pub fn teardown(&mut self) {
        if let Err(err) = self.machine.apply(UploadEvent::Teardown) {
            tracing::error!(error = %err, "teardown rejected");
        }
        self.poller = None;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Upload paths
    // ═══════════════════════════════════════════════════════════════════════

    async fn begin(&mut self, file_name: &str, expected_new: Option<usize>) {
        self.poller = None;
        self.machine = UploadMachine::new(file_name, self.options.polling);
        self.progress = ProgressModel::new();
        self.notices.clear();
        self.expected_new = expected_new;
        self.baseline = match self.cache.count().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "could not read conversation count before upload");
                None
            }
        };
        tracing::debug!(file = file_name, baseline = ?self.baseline, expected = ?expected_new, "upload starting");
    }

    async fn run_single(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<(), ImportError> {
        self.apply(UploadEvent::Start(UploadPlan::SingleShot)).await?;
        self.report(ImportProgressEvent::Started {
            file_name: file_name.to_string(),
            total_chunks: None,
        });
        tracing::info!(file = file_name, bytes = bytes.len(), "uploading file");

        let transport = Arc::clone(&self.transport);
        let name = file_name.to_string();
        let result = self
            .with_progress(async move { transport.upload_file(&name, bytes).await })
            .await;

        match result {
            Ok(reply) => self.apply(UploadEvent::Replied(reply.status())).await?,
            Err(err) => self.fail(err).await?,
        }
        self.poll_until_settled().await
    }

    /// Send chunks in order. A lost reply is followed up by polling until the
    /// conversations through that chunk show up, then sending resumes.
    async fn run_chunked(
        &mut self,
        file_name: &str,
        chunks: Vec<Vec<Value>>,
        expected_total: Option<usize>,
    ) -> Result<(), ImportError> {
        let total = chunks.len();
        self.apply(UploadEvent::Start(UploadPlan::Chunked { total }))
            .await?;
        self.report(ImportProgressEvent::Started {
            file_name: file_name.to_string(),
            total_chunks: Some(total),
        });

        let mut sent = 0;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let index = i + 1;
            sent += chunk.len();
            self.apply(UploadEvent::ChunkStarted(index)).await?;
            self.progress.set_chunk(index, total);
            self.report_progress();

            let bytes = serde_json::to_vec(&chunk)
                .map_err(|e| ImportError::InvalidJson(e.to_string()))?;
            let name = chunk_file_name(file_name, index, total);
            tracing::info!(chunk = index, total, bytes = bytes.len(), file = %name, "uploading chunk");

            match self.transport.upload_file(&name, bytes).await {
                // A chunk still processing server-side counts as delivered.
                Ok(_) => self.apply(UploadEvent::ChunkSucceeded(index)).await?,
                Err(err) => {
                    tracing::error!(chunk = index, total, error = %err, "chunk upload failed");
                    // Conversations the server should hold once this chunk is in.
                    self.expected_new = Some(match expected_total {
                        Some(n) => sent.min(n),
                        None => sent,
                    });
                    self.fail(err).await?;
                    self.poll_until_settled().await?;
                    if !matches!(self.machine.state(), UploadState::ChunkUploading { .. }) {
                        break;
                    }
                    tracing::info!(chunk = index, total, "chunk confirmed, resuming");
                }
            }
        }
        Ok(())
    }

    async fn fail(&mut self, err: TransportError) -> Result<(), ImportError> {
        tracing::warn!(error = %err, class = ?err.classify(), "upload request failed");
        self.apply(UploadEvent::Failed(err)).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Polling
    // ═══════════════════════════════════════════════════════════════════════

    /// Run the polling loop until the machine leaves `Polling`.
    async fn poll_until_settled(&mut self) -> Result<(), ImportError> {
        while let Some((attempt, max_attempts)) = self.machine.state().poll_attempts() {
            let Some(ticker) = self.poller.as_mut() else {
                tracing::error!("polling without a ticker");
                self.teardown();
                break;
            };
            ticker.tick().await;

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, "polling gave up");
                self.apply(UploadEvent::PollExhausted).await?;
                break;
            }

            self.apply(UploadEvent::PollTick).await?;
            self.report(ImportProgressEvent::Polling {
                attempt: attempt + 1,
                max_attempts,
            });
            if self.confirmed().await {
                tracing::info!(attempt = attempt + 1, "import confirmed by conversation count");
                self.apply(UploadEvent::PollConfirmed).await?;
            }
        }
        Ok(())
    }

    /// Whether the refreshed conversation count shows the import landed.
    async fn confirmed(&self) -> bool {
        // Nothing new was expected, so nothing is left to wait for.
        if self.expected_new == Some(0) {
            return true;
        }
        let Some(baseline) = self.baseline else {
            return false;
        };
        match self.cache.count().await {
            Ok(count) => {
                let grown = count.saturating_sub(baseline);
                tracing::debug!(count, baseline, grown, "poll refreshed conversation count");
                match self.expected_new {
                    Some(expected) => grown >= expected,
                    None => grown > 0,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "poll refresh failed");
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Effects
    // ═══════════════════════════════════════════════════════════════════════

    async fn apply(&mut self, event: UploadEvent) -> Result<(), ImportError> {
        let from = self.machine.state().to_string();
        let effects = self
            .machine
            .apply(event)
            .map_err(|e| ImportError::Upload(e.to_string()))?;
        tracing::debug!(from = %from, to = %self.machine.state(), effects = effects.len(), "transition");
        for effect in effects {
            self.perform(effect).await;
        }
        Ok(())
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::InvalidateConversations => self.cache.invalidate(),
            Effect::StartPolling => {
                if self.poller.is_some() {
                    tracing::warn!("replacing active polling timer");
                }
                self.poller = Some(self.scheduler.interval(self.options.polling.interval));
            }
            Effect::StopPolling => self.poller = None,
            Effect::Notify(notice) => {
                if notice == Notice::Success {
                    self.progress.complete();
                    self.report_progress();
                }
                self.notices.push(notice.clone());
                self.report(ImportProgressEvent::Notice(notice));
            }
            Effect::ScheduleDismiss(delay) => {
                self.scheduler.sleep(delay).await;
                self.report(ImportProgressEvent::Dismissed);
            }
        }
    }

    fn finish(
        &mut self,
        selective: Option<SelectiveImportResponse>,
        submitted: Vec<Value>,
    ) -> Result<UploadOutcome, ImportError> {
        self.poller = None;
        Ok(UploadOutcome {
            state: self.machine.state().clone(),
            session: self.machine.session().clone(),
            notices: self.notices.clone(),
            selective,
            submitted,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Progress
    // ═══════════════════════════════════════════════════════════════════════

    /// Await `fut` while the cosmetic progress bar advances.
    async fn with_progress<F, T>(&mut self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        tokio::pin!(fut);
        let mut ticker = self.scheduler.interval(SIMULATED_TICK);
        ticker.tick().await;
        self.report_progress();
        loop {
            tokio::select! {
                biased;
                out = &mut fut => return out,
                _ = ticker.tick() => {
                    self.progress.tick();
                    self.report_progress();
                }
            }
        }
    }

    fn report_progress(&self) {
        self.reporter.report(ImportProgressEvent::Uploading {
            percent: self.progress.display_percent(),
            label: self.progress.label(),
            chunk: self.progress.chunk(),
        });
    }

    fn report(&self, event: ImportProgressEvent) {
        self.reporter.report(event);
    }
}

impl Drop for ImportOrchestrator {
    fn drop(&mut self) {
        if self.poller.is_some() {
            tracing::debug!("dropping orchestrator with an active polling timer");
        }
        self.teardown();
    }
}

/// Conversations in a payload: array length, or 1 for a single object.
fn payload_count(payload: &Value) -> Option<usize> {
    match payload {
        Value::Array(items) => Some(items.len()),
        Value::Object(_) => Some(1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_counts() {
        assert_eq!(payload_count(&json!([{"a": 1}, {"b": 2}])), Some(2));
        assert_eq!(payload_count(&json!({"conversationId": "x"})), Some(1));
        assert_eq!(payload_count(&json!("text")), None);
    }
}

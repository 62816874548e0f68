//! Network abstraction for the import pipeline.
//!
//! The [`ImportTransport`] trait is everything the upload orchestrator needs
//! from the destination server: the multipart import endpoint, the selective
//! JSON endpoint, the existing conversation list (for duplicate marking and
//! poll confirmation), and the advertised file size limit.
//!
//! Implementations must be `Send + Sync` so an orchestrator can hold one
//! behind an `Arc` across await points.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::models::{SelectiveImportResponse, UploadReply};

/// Abstract destination server.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upload_file`](ImportTransport::upload_file) | One multipart request with a `file` field |
/// | [`import_selective`](ImportTransport::import_selective) | JSON array of raw conversations |
/// | [`conversation_ids`](ImportTransport::conversation_ids) | Source ids already stored |
/// | [`conversation_count`](ImportTransport::conversation_count) | Stored conversation count |
/// | [`max_file_size`](ImportTransport::max_file_size) | Server-advertised single file limit |
#[async_trait]
pub trait ImportTransport: Send + Sync {
    /// Send `bytes` as one file under `file_name`.
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>)
        -> Result<UploadReply, TransportError>;

    /// Send raw conversation objects to the selective endpoint.
    async fn import_selective(
        &self,
        conversations: Vec<Value>,
    ) -> Result<SelectiveImportResponse, TransportError>;

    /// Source conversation ids that already exist at the destination.
    async fn conversation_ids(&self) -> Result<HashSet<String>, TransportError>;

    /// Number of stored conversations.
    async fn conversation_count(&self) -> Result<usize, TransportError> {
        Ok(self.conversation_ids().await?.len())
    }

    /// Maximum accepted single file size in bytes, if advertised.
    async fn max_file_size(&self) -> Result<Option<u64>, TransportError>;
}

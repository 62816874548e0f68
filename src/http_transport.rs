//! reqwest-backed [`ImportTransport`].
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `upload_file` | `POST {import_path}`, multipart with one `file` part |
//! | `import_selective` | `POST {selective_path}`, JSON `{"conversations": [...]}` |
//! | `conversation_ids` | `GET {conversations_path}`, following `nextCursor` |
//! | `max_file_size` | `GET {startup_config_path}`, `conversationImportMaxFileSize` |
//!
//! A bearer token is sent when the variable named by `server.token_env` is set.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use convo_import_core::error::TransportError;
use convo_import_core::models::{SelectiveImportResponse, UploadReply};
use convo_import_core::transport::ImportTransport;

use crate::config::ServerConfig;

/// Stop following cursors after this many pages.
const MAX_LIST_PAGES: usize = 1000;

pub struct HttpTransport {
    client: Client,
    server: ServerConfig,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(server.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            server: server.clone(),
            token: server.token(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = self.authorized(builder).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(rejection(status.as_u16(), body))
    }
}

/// Sort a reqwest failure into the transient/fatal taxonomy.
fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    let chain = error_chain(&err);
    if chain.contains("connection reset") || chain.contains("econnreset") {
        return TransportError::ConnectionReset;
    }
    if err.is_connect() || err.is_request() || err.is_body() {
        return TransportError::Network(err.to_string());
    }
    TransportError::from_message(err.to_string())
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string().to_lowercase();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string().to_lowercase());
        source = inner.source();
    }
    out
}

/// Build the error for a non-success reply. Bodies are usually
/// `{"message": ...}` or `{"error": ...}`.
fn rejection(status: u16, body: String) -> TransportError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);
    if message.contains("Unsupported import type") {
        TransportError::UnsupportedImportType(message)
    } else {
        TransportError::Rejected { status, message }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, TransportError> {
    serde_json::from_str(body).map_err(|e| TransportError::Other(format!("invalid response body: {}", e)))
}

/// Read a 2xx import reply. The upload was accepted either way, so a body
/// that is not the expected JSON is kept as a plain message.
fn upload_reply(body: &str) -> UploadReply {
    match serde_json::from_str::<UploadReply>(body) {
        Ok(reply) => reply,
        Err(e) => {
            if !body.trim().is_empty() {
                tracing::debug!(error = %e, "import reply is not JSON, reading it as text");
            }
            UploadReply::from_text(body)
        }
    }
}

/// Pull source conversation ids out of one page of the conversation list.
/// Accepts a bare array or `{"conversations": [...], "nextCursor": ...}`.
fn page_ids(page: &Value) -> (Vec<String>, Option<String>) {
    let items = page
        .as_array()
        .or_else(|| page.get("conversations").and_then(Value::as_array));
    let ids = items
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("conversationId").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let cursor = page
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    (ids, cursor)
}

#[async_trait]
impl ImportTransport for HttpTransport {
    async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReply, TransportError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/json")
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let form = Form::new().part("file", part);
        let url = self.server.url(&self.server.import_path);
        tracing::debug!(%url, file = file_name, bytes = size, "POST import");

        let response = self.send(self.client.post(&url).multipart(form)).await?;
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(upload_reply(&body))
    }

    async fn import_selective(
        &self,
        conversations: Vec<Value>,
    ) -> Result<SelectiveImportResponse, TransportError> {
        let url = self.server.url(&self.server.selective_path);
        tracing::debug!(%url, count = conversations.len(), "POST selective import");
        let body = serde_json::json!({ "conversations": conversations });
        let response = self.send(self.client.post(&url).json(&body)).await?;
        let text = response.text().await.map_err(map_reqwest_error)?;
        decode(&text)
    }

    async fn conversation_ids(&self) -> Result<HashSet<String>, TransportError> {
        let url = self.server.url(&self.server.conversations_path);
        let mut ids = HashSet::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut request = self.client.get(&url);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }
            let response = self.send(request).await?;
            let text = response.text().await.map_err(map_reqwest_error)?;
            let page: Value = decode(&text)?;
            let (page_ids, next) = page_ids(&page);
            ids.extend(page_ids);
            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => return Ok(ids),
            }
        }
        tracing::warn!(pages = MAX_LIST_PAGES, "conversation list truncated");
        Ok(ids)
    }

    async fn max_file_size(&self) -> Result<Option<u64>, TransportError> {
        let url = self.server.url(&self.server.startup_config_path);
        let response = self.send(self.client.get(&url)).await?;
        let text = response.text().await.map_err(map_reqwest_error)?;
        let config: Value = decode(&text)?;
        Ok(config
            .get("conversationImportMaxFileSize")
            .and_then(Value::as_u64)
            .filter(|n| *n > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_import_core::models::ReplyStatus;
    use serde_json::json;

    #[test]
    fn rejection_recognizes_unsupported_type() {
        let err = rejection(400, r#"{"message":"Unsupported import type"}"#.to_string());
        assert!(matches!(err, TransportError::UnsupportedImportType(_)));

        let err = rejection(500, "boom".to_string());
        assert_eq!(
            err,
            TransportError::Rejected {
                status: 500,
                message: "boom".into()
            }
        );
    }

    #[test]
    fn upload_reply_accepts_any_success_body() {
        assert_eq!(
            upload_reply("Import started, processing in background").status(),
            ReplyStatus::Processing
        );
        assert_eq!(
            upload_reply(r#"{"message":"ok","status":"done"}"#).status(),
            ReplyStatus::Success
        );
        assert_eq!(upload_reply("").status(), ReplyStatus::Success);
        assert_eq!(
            upload_reply(r#"{"message":"Conversations imported"}"#).message.as_deref(),
            Some("Conversations imported")
        );
    }

    #[test]
    fn page_ids_handles_both_shapes() {
        let (ids, cursor) = page_ids(&json!([{"conversationId": "a"}, {"title": "no id"}]));
        assert_eq!(ids, vec!["a".to_string()]);
        assert_eq!(cursor, None);

        let (ids, cursor) = page_ids(&json!({
            "conversations": [{"conversationId": "b"}],
            "nextCursor": "2024-01-01"
        }));
        assert_eq!(ids, vec!["b".to_string()]);
        assert_eq!(cursor.as_deref(), Some("2024-01-01"));
    }
}

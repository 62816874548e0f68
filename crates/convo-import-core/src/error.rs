use thiserror::Error;

use crate::selection::MAX_SELECTION;

/// Everything that can stop or redirect an import.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("Invalid JSON file: {0}")]
    InvalidJson(String),

    #[error("Unsupported import format")]
    UnsupportedFormat,

    #[error("File is too large: the maximum import size is {limit_mb} MB")]
    FileTooLarge { size: u64, limit: u64, limit_mb: String },

    #[error("Unsupported import type: {0}")]
    UnsupportedImportType(String),

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Chunk {index} of {total} failed: {message}")]
    ChunkUploadFailure {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("Import failed: {0}")]
    Upload(String),

    #[error(transparent)]
    SelectionValidation(#[from] SelectionError),
}

impl ImportError {
    pub fn file_too_large(size: u64, limit: u64) -> Self {
        ImportError::FileTooLarge {
            size,
            limit,
            limit_mb: format!("{:.2}", limit as f64 / (1024.0 * 1024.0)),
        }
    }

    /// Fatal errors end the session. Transient network errors and selection
    /// validation errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ImportError::TransientNetwork(_) | ImportError::SelectionValidation(_)
        )
    }
}

/// Local validation failures from the selection dialogs. None of these
/// change state; the user is re-prompted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Range must be between 1 and {total}")]
    RangeOutOfBounds { total: usize },

    #[error("Start position cannot be greater than end position")]
    StartAfterEnd,

    #[error("A single import can select at most {max} conversations", max = MAX_SELECTION)]
    RangeTooLarge { requested: usize },

    #[error("At most {max} conversations can be selected", max = MAX_SELECTION)]
    CapReached,

    #[error("Conversation {0} already exists and cannot be selected")]
    Duplicate(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("No conversations selected")]
    Empty,

    #[error("Action not available in the current step")]
    WrongStep,
}

/// Failure reported by an [`ImportTransport`](crate::transport::ImportTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server explicitly refused the file's content type.
    #[error("Unsupported import type: {0}")]
    UnsupportedImportType(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection reset")]
    ConnectionReset,

    #[error("network error: {0}")]
    Network(String),

    /// Any other non-success reply.
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

/// Whether a failure proves the request was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The server may have stored the upload before the reply was lost.
    Transient,
    Fatal,
}

impl TransportError {
    pub fn classify(&self) -> FailureClass {
        match self {
            TransportError::Timeout | TransportError::ConnectionReset | TransportError::Network(_) => {
                FailureClass::Transient
            }
            _ => FailureClass::Fatal,
        }
    }

    /// Some transports only hand back a message. Recognize the unsupported
    /// type signal and the usual network failure wording.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if message.contains("Unsupported import type") {
            TransportError::UnsupportedImportType(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            TransportError::Timeout
        } else if lower.contains("econnreset") || lower.contains("connection reset") {
            TransportError::ConnectionReset
        } else if lower.contains("network error") || lower.contains("failed to fetch") {
            TransportError::Network(message)
        } else {
            TransportError::Other(message)
        }
    }
}

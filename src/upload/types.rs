//! Ingest types

use serde::{Deserialize, Serialize};

use crate::expiry::ExpiryError;
use crate::index::{EntryKind, IndexEntry, IndexError};
use crate::storage::StoreError;

// ============================================================================
// Request / Outcome
// ============================================================================

/// What the client asked for, minus the bytes
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Requested retention class
    pub kind: EntryKind,

    /// File name supplied by the client, used only for its extension
    pub original_name: Option<String>,
}

impl IngestRequest {
    pub fn new(kind: EntryKind, original_name: Option<String>) -> Self {
        Self {
            kind,
            original_name,
        }
    }
}

/// Whether an upload produced a new object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    /// Stored as a new object
    Created,
    /// Identical content was already stored
    Exists,
}

/// Result of a completed ingest
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: IngestStatus,

    /// Entry the client should be pointed at. On a dedupe hit this is the
    /// existing entry, whatever kind it has.
    pub entry: IndexEntry,
}

impl IngestOutcome {
    pub fn is_created(&self) -> bool {
        self.status == IngestStatus::Created
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Ingest errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("File too large (max: {max} bytes)")]
    PayloadTooLarge { max: u64 },

    #[error("No file provided")]
    MissingFile,

    #[error("Failed to read upload body: {0}")]
    Body(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Failed to expire stale entry: {0}")]
    Expiry(#[from] ExpiryError),

    #[error("Ingest task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MissingFile => StatusCode::BAD_REQUEST,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Expiry(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::MissingFile => "MISSING_FILE",
            Self::Body(_) => "INVALID_BODY",
            Self::Store(_) => "STORAGE_ERROR",
            Self::Index(_) => "INDEX_ERROR",
            Self::Expiry(_) => "EXPIRY_ERROR",
            Self::Join(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure is the server's fault
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }
}

//! Upload Routes
//!
//! Endpoints:
//! - POST /upload?mode=permanent|temporary - Store a file, or point at an
//!   identical one already stored
//!
//! The file travels as a multipart field named `file` or `image`. Requests
//! must carry a registered `x-api-key` header.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::require_api_key;
use crate::index::EntryKind;
use crate::state::AppState;
use crate::upload::{IngestError, IngestOutcome, IngestRequest, IngestStatus};

/// Room for multipart framing on top of the largest file ceiling
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Multipart field names accepted as the file
const FILE_FIELDS: &[&str] = &["file", "image"];

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Retention class, permanent when absent
    #[serde(default)]
    pub mode: Option<EntryKind>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub status: IngestStatus,
    pub file_url: String,
    pub digest: String,
    pub kind: EntryKind,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_notice: Option<String>,
}

impl UploadResponse {
    fn from_outcome(state: &AppState, requested: EntryKind, outcome: IngestOutcome) -> Self {
        let message = match outcome.status {
            IngestStatus::Created => "File uploaded successfully",
            IngestStatus::Exists => "File already exists",
        };
        let entry = outcome.entry;

        Self {
            message: message.to_string(),
            status: outcome.status,
            file_url: state.object_url(&entry),
            digest: entry.digest,
            kind: entry.kind,
            size: entry.size,
            expiry_notice: expiry_notice(requested, entry.expires_at),
            expires_at: entry.expires_at,
        }
    }
}

/// Notice for temporary requests, and for any answer pointing at a
/// temporary object
fn expiry_notice(requested: EntryKind, expires_at: Option<DateTime<Utc>>) -> Option<String> {
    match (requested, expires_at) {
        (_, Some(at)) => Some(format!(
            "This file is temporary and will be deleted at {}",
            at.to_rfc3339()
        )),
        (EntryKind::Temporary, None) => {
            Some("Identical content is already stored permanently; this file will not expire".to_string())
        }
        (EntryKind::Permanent, None) => None,
    }
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        if self.is_internal() {
            tracing::error!(error = %self, "Upload failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.config().limits.largest() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/upload", post(upload))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload
async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), IngestError> {
    let kind = query.mode.unwrap_or_default();
    let max = state.ingest().max_size(kind);

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::PayloadTooLarge { max }
        } else {
            IngestError::Body(e.body_text())
        }
    })? {
        let name = field.name().unwrap_or("").to_string();
        if !FILE_FIELDS.contains(&name.as_str()) {
            tracing::debug!(field = %name, "Skipping multipart field");
            continue;
        }

        let original_name = field.file_name().map(|s| s.to_string());
        tracing::debug!(
            kind = %kind,
            original_name = ?original_name,
            "Receiving upload"
        );

        let outcome = state
            .ingest()
            .ingest(IngestRequest::new(kind, original_name), field)
            .await?;

        let status = if outcome.is_created() {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };

        return Ok((status, Json(UploadResponse::from_outcome(&state, kind, outcome))));
    }

    tracing::warn!("No file field found in multipart upload");
    Err(IngestError::MissingFile)
}

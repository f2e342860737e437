//! File serving routes
//!
//! Serves stored objects by their stored name. An object is only served
//! while the index holds an entry for it in the requested area, so expired
//! temporary files disappear from the URL space at their deadline even if
//! the bytes have not been swept yet.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::index::IndexEntry;
use crate::state::AppState;
use crate::storage::{StorageArea, StoreError};

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/uploads/:name", get(serve_permanent))
        .route("/temp/:name", get(serve_temporary))
}

/// GET /uploads/:name
async fn serve_permanent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    serve_object(&state, StorageArea::Permanent, &name).await
}

/// GET /temp/:name
async fn serve_temporary(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    serve_object(&state, StorageArea::Temporary, &name).await
}

async fn serve_object(state: &AppState, area: StorageArea, name: &str) -> Result<Response> {
    let not_found = || AppError::NotFound(format!("File not found: {}", name));

    let entry = state.index().find_by_name(area, name).ok_or_else(not_found)?;
    if entry.is_expired() {
        return Err(not_found());
    }

    let reader = match state.store().read(area, name).await {
        Ok(reader) => reader,
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(
                digest = %entry.digest,
                stored_name = %name,
                area = %area,
                "Indexed object missing from storage"
            );
            return Err(not_found());
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = mime_guess::from_path(name).first_or_octet_stream();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, reader.size())
        .header(header::CACHE_CONTROL, cache_control(&entry))
        .header(header::ETAG, format!("\"{}\"", entry.digest))
        .body(Body::from_stream(reader.into_stream()))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Permanent objects never change; temporary ones only until their deadline
fn cache_control(entry: &IndexEntry) -> String {
    match entry.remaining(Utc::now()) {
        None => "public, max-age=31536000, immutable".to_string(),
        Some(remaining) => format!("public, max-age={}", remaining.as_secs()),
    }
}

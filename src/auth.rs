//! API key authentication
//!
//! Upload routes require an `x-api-key` header naming one of the registered
//! keys. Rejection happens before the body is read.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the client's API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without a registered API key
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !state.config().auth.is_registered(key) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            key_present = !key.is_empty(),
            "Rejected request with unregistered API key"
        );
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

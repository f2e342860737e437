//! Keepsake Server Library
//!
//! Content-addressed file uploads. Every accepted file is fingerprinted with
//! SHA-256; identical content is stored once and every uploader gets the
//! same URL back. Uploads are either permanent or temporary, and temporary
//! ones are deleted once their lifetime runs out.
//!
//! # Modules
//!
//! - `index`: Digest index (digest -> stored object), persisted as JSON
//! - `storage`: Object store over the permanent and temporary directories
//! - `upload`: Ingest pipeline (size limit, hashing, dedupe, store)
//! - `expiry`: Expiry scheduler for temporary uploads
//! - `reconcile`: Startup reconciliation, checksum backfill, duplicate report
//! - `routes`: HTTP surface

pub mod auth;
pub mod config;
pub mod digest;
pub mod error;
pub mod expiry;
pub mod index;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::upload::router(state.clone()))
        .merge(routes::files::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

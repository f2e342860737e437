//! Upload ingest
//!
//! Receives an upload, fingerprints it, and either points the client at an
//! identical object already stored or stores it as a new one.

pub mod pipeline;
pub mod types;

pub use pipeline::IngestService;
pub use types::{IngestError, IngestOutcome, IngestRequest, IngestStatus};

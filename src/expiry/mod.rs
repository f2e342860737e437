//! Expiry of temporary uploads

pub mod scheduler;

pub use scheduler::{ExpiryError, ExpiryOutcome, ExpiryScheduler, ScheduleSummary};

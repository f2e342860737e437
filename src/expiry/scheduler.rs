//! Expiry Scheduler
//!
//! Deletes temporary objects once their deadline passes.
//!
//! The schedule is durable: every temporary entry carries its `expiresAt`
//! in the persisted index. Live timers are armed for fresh uploads, startup
//! reconciliation re-derives them after a restart, and a periodic sweep
//! catches anything a lost timer would have missed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::index::{DigestIndex, DigestLocks, IndexEntry, IndexError};
use crate::storage::{ObjectStore, StoreError};

/// Result of an expiry attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// Object and entry removed
    Expired,
    /// Deadline not reached; time left
    NotDue(Duration),
    /// Entry is permanent
    NotTemporary,
    /// No entry for the digest (already expired or never indexed)
    Absent,
}

/// Expiry errors. Never escape background tasks; logged and retried by the
/// next sweep.
#[derive(Debug, thiserror::Error)]
pub enum ExpiryError {
    #[error("Failed to delete expired object: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to update index: {0}")]
    Index(#[from] IndexError),
}

/// Counts from a startup reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub expired: usize,
    pub armed: usize,
    pub failed: usize,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Schedules and performs deletion of temporary objects
#[derive(Clone)]
pub struct ExpiryScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    index: DigestIndex,
    store: ObjectStore,
    locks: DigestLocks,
    sweep_interval: Duration,
}

impl ExpiryScheduler {
    pub fn new(
        index: DigestIndex,
        store: ObjectStore,
        locks: DigestLocks,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                index,
                store,
                locks,
                sweep_interval,
            }),
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Arm a one-shot timer that expires `digest` no earlier than `delay`
    /// from now.
    ///
    /// When the timer fires it re-reads the entry; if the persisted deadline
    /// is still ahead it sleeps again for the remainder.
    pub fn arm(&self, digest: &str, delay: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let digest = digest.to_string();

        tracing::debug!(digest = %digest, delay_secs = delay.as_secs(), "Armed expiry timer");

        tokio::spawn(async move {
            let mut delay = delay;
            loop {
                tokio::time::sleep(delay).await;

                match scheduler.expire(&digest).await {
                    Ok(ExpiryOutcome::NotDue(remaining)) => {
                        delay = remaining.max(Duration::from_millis(10));
                    }
                    Ok(outcome) => {
                        tracing::debug!(digest = %digest, outcome = ?outcome, "Expiry timer fired");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            digest = %digest,
                            error = %e,
                            "Expiry timer failed, leaving entry for the next sweep"
                        );
                        break;
                    }
                }
            }
        })
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Expire `digest` if it is a temporary entry past its deadline
    pub async fn expire(&self, digest: &str) -> Result<ExpiryOutcome, ExpiryError> {
        let _guard = self.inner.locks.lock(digest).await;

        match self.inner.index.lookup(digest) {
            Some(entry) => self.expire_locked(&entry, Utc::now()).await,
            None => Ok(ExpiryOutcome::Absent),
        }
    }

    /// Expire an entry. The caller must hold the digest's lock.
    ///
    /// Deletes the object first, then the entry. An object that is already
    /// gone counts as deleted.
    pub async fn expire_locked(
        &self,
        entry: &IndexEntry,
        now: DateTime<Utc>,
    ) -> Result<ExpiryOutcome, ExpiryError> {
        if !entry.is_temporary() {
            return Ok(ExpiryOutcome::NotTemporary);
        }

        if !entry.is_expired_at(now) {
            return Ok(ExpiryOutcome::NotDue(entry.remaining(now).unwrap_or_default()));
        }

        match self.inner.store.delete(entry.area, &entry.stored_name).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(
                    digest = %entry.digest,
                    stored_name = %entry.stored_name,
                    "Expired object already absent"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.inner.index.remove(&entry.digest).await?;

        tracing::info!(
            digest = %entry.digest,
            stored_name = %entry.stored_name,
            "Expired temporary upload"
        );

        Ok(ExpiryOutcome::Expired)
    }

    /// Expire every temporary entry that is due. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let due: Vec<String> = self
            .inner
            .index
            .entries()
            .into_iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.digest)
            .collect();

        let mut expired = 0;
        for digest in due {
            match self.expire(&digest).await {
                Ok(ExpiryOutcome::Expired) => expired += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(digest = %digest, error = %e, "Sweep failed to expire entry");
                }
            }
        }

        if expired > 0 {
            tracing::info!(count = expired, "Expiry sweep removed temporary uploads");
        }

        expired
    }

    /// Rebuild the schedule from the persisted index.
    ///
    /// Past-due entries are expired now; the rest get timers for their
    /// remaining time.
    pub async fn reconcile(&self) -> ScheduleSummary {
        let now = Utc::now();
        let mut summary = ScheduleSummary::default();

        for entry in self.inner.index.entries() {
            if !entry.is_temporary() {
                continue;
            }

            if entry.is_expired_at(now) {
                match self.expire(&entry.digest).await {
                    Ok(ExpiryOutcome::Expired) => summary.expired += 1,
                    Ok(_) => {}
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(digest = %entry.digest, error = %e, "Failed to expire entry at startup");
                    }
                }
            } else {
                self.arm(&entry.digest, entry.remaining(now).unwrap_or_default());
                summary.armed += 1;
            }
        }

        tracing::info!(
            expired = summary.expired,
            armed = summary.armed,
            failed = summary.failed,
            "Expiry schedule reconciled"
        );

        summary
    }

    /// Start the periodic sweep
    pub fn start_sweeper(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.inner.sweep_interval);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

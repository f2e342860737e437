//! Per-digest locks
//!
//! Serializes every check-then-act sequence on a single digest (ingest
//! lookup/commit/insert, expiry delete/remove) while leaving unrelated
//! digests free to proceed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Lock table keyed by digest
#[derive(Clone, Default)]
pub struct DigestLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held lock on one digest. Released on drop.
pub struct DigestGuard {
    digest: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl DigestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `digest`
    pub async fn lock(&self, digest: &str) -> DigestGuard {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.entry(digest.to_string()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;

        DigestGuard {
            digest: digest.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of digests currently held or waited on
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for DigestGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Forget the digest once nobody holds or waits for it
        let mut locks = self.locks.lock();
        if let Some(mutex) = locks.get(&self.digest) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(&self.digest);
            }
        }
    }
}

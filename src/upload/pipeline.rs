//! Ingest Pipeline
//!
//! One pass over the upload body does three things at once:
//! - enforces the size ceiling for the requested kind
//! - computes the SHA-256 digest
//! - stages the bytes on disk
//!
//! The digest-locked section (lookup, commit, insert, arm) runs as its own
//! task so a client disconnect after the body has been received cannot
//! cancel it half-way.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};

use super::types::{IngestError, IngestOutcome, IngestRequest, IngestStatus};
use crate::config::UploadLimits;
use crate::expiry::ExpiryScheduler;
use crate::index::{DigestIndex, DigestLocks, EntryKind, IndexEntry, IndexError};
use crate::storage::{allocate_name, ObjectStore, StagedObject, StorageArea, StoreError};

/// Upload ingest service
#[derive(Clone)]
pub struct IngestService {
    inner: Arc<IngestInner>,
}

struct IngestInner {
    index: DigestIndex,
    store: ObjectStore,
    locks: DigestLocks,
    scheduler: ExpiryScheduler,
    limits: UploadLimits,
    ttl: Duration,
}

/// A fully received upload, waiting for the digest lock
struct Received {
    request: IngestRequest,
    digest: String,
    size: u64,
    staged: StagedObject,
}

impl IngestService {
    pub fn new(
        index: DigestIndex,
        store: ObjectStore,
        locks: DigestLocks,
        scheduler: ExpiryScheduler,
        limits: UploadLimits,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(IngestInner {
                index,
                store,
                locks,
                scheduler,
                limits,
                ttl,
            }),
        }
    }

    /// Size ceiling for an upload of the given kind
    pub fn max_size(&self, kind: EntryKind) -> u64 {
        self.inner.limits.max_for(kind)
    }

    /// Ingest an upload body.
    ///
    /// Exceeding the ceiling fails before a digest is produced; the staged
    /// bytes are dropped and nothing is indexed.
    pub async fn ingest<S, E>(
        &self,
        request: IngestRequest,
        body: S,
    ) -> Result<IngestOutcome, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let received = self.receive(request, body).await?;

        let service = self.clone();
        tokio::spawn(async move { service.store_or_dedupe(received).await }).await?
    }

    // ========================================================================
    // Received -> Hashed
    // ========================================================================

    async fn receive<S, E>(&self, request: IngestRequest, body: S) -> Result<Received, IngestError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let max = self.max_size(request.kind);
        let mut staged = self.inner.store.stage().await?;
        let mut hasher = Sha256::new();
        let mut body = pin!(body);

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| IngestError::Body(e.to_string()))?;

            if staged.size() + chunk.len() as u64 > max {
                tracing::info!(
                    kind = %request.kind,
                    max_bytes = max,
                    "Rejected upload over size limit"
                );
                return Err(IngestError::PayloadTooLarge { max });
            }

            hasher.update(&chunk);
            staged.write(&chunk).await?;
        }

        let digest = hex::encode(hasher.finalize());
        let size = staged.size();

        tracing::debug!(digest = %digest, size = size, "Upload received and hashed");

        Ok(Received {
            request,
            digest,
            size,
            staged,
        })
    }

    // ========================================================================
    // Hashed -> Deduped | Stored
    // ========================================================================

    async fn store_or_dedupe(&self, received: Received) -> Result<IngestOutcome, IngestError> {
        let Received {
            request,
            digest,
            size,
            staged,
        } = received;

        let _guard = self.inner.locks.lock(&digest).await;

        if let Some(existing) = self.inner.index.lookup(&digest) {
            let now = Utc::now();
            if existing.is_expired_at(now) {
                // Stale temporary entry: finish its expiry and store afresh
                self.inner.scheduler.expire_locked(&existing, now).await?;
            } else {
                staged.discard().await;
                tracing::info!(
                    digest = %digest,
                    stored_name = %existing.stored_name,
                    kind = %existing.kind,
                    "Duplicate upload, reusing stored object"
                );
                return Ok(IngestOutcome {
                    status: IngestStatus::Exists,
                    entry: existing,
                });
            }
        }

        let kind = request.kind;
        let area = kind.area();
        let stored_name = allocate_name(request.original_name.as_deref());

        staged.commit(area, &stored_name).await?;

        let entry = match kind {
            EntryKind::Permanent => {
                IndexEntry::permanent(digest.clone(), stored_name.clone(), size, request.original_name)
            }
            EntryKind::Temporary => IndexEntry::temporary(
                digest.clone(),
                stored_name.clone(),
                size,
                request.original_name,
                self.inner.ttl,
            ),
        };

        match self.inner.index.insert(entry.clone()).await {
            Ok(()) => {}
            Err(IndexError::Conflict(_)) => {
                self.remove_object(area, &stored_name).await;
                if let Some(winner) = self.inner.index.lookup(&digest) {
                    return Ok(IngestOutcome {
                        status: IngestStatus::Exists,
                        entry: winner,
                    });
                }
                return Err(IngestError::Index(IndexError::Conflict(digest)));
            }
            Err(e) => {
                self.remove_object(area, &stored_name).await;
                return Err(e.into());
            }
        }

        if let Some(remaining) = entry.remaining(Utc::now()) {
            self.inner.scheduler.arm(&digest, remaining);
        }

        tracing::info!(
            digest = %digest,
            stored_name = %stored_name,
            kind = %kind,
            size = size,
            "Stored new upload"
        );

        Ok(IngestOutcome {
            status: IngestStatus::Created,
            entry,
        })
    }

    /// Undo a commit whose index entry could not be written
    async fn remove_object(&self, area: StorageArea, stored_name: &str) {
        match self.inner.store.delete(area, stored_name).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                tracing::error!(
                    area = %area,
                    stored_name = %stored_name,
                    error = %e,
                    "Failed to remove unindexed object"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

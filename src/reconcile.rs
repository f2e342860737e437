//! Startup reconciliation and checksum maintenance
//!
//! Brings the index and the storage directories back into agreement after a
//! restart or a crash:
//! - leftover staging files are removed
//! - entries whose object has vanished are dropped
//! - temporary files nobody indexes are deleted
//! - permanent files nobody indexes are hashed and adopted (backfill)
//! - the expiry schedule is rebuilt from the persisted deadlines
//!
//! Also hosts the duplicate report used by the admin CLI.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use serde::Serialize;
use tokio::fs;

use crate::digest::hash_file;
use crate::expiry::{ExpiryScheduler, ScheduleSummary};
use crate::index::{DigestIndex, IndexEntry, IndexError};
use crate::storage::{ObjectStore, StorageArea, StoreError};

/// Reconciliation errors
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Files sharing one digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub digest: String,
    pub files: Vec<String>,
}

/// Outcome of a backfill pass
#[derive(Debug, Clone, Default)]
pub struct AdoptReport {
    /// Files newly indexed as permanent entries
    pub adopted: usize,

    /// Untracked files whose content is already indexed under another name.
    /// Each group lists the indexed name first.
    pub duplicates: Vec<DuplicateGroup>,
}

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub staging_cleared: usize,
    pub missing_dropped: usize,
    pub orphans_removed: usize,
    pub adopt: AdoptReport,
    pub schedule: ScheduleSummary,
}

// ============================================================================
// Startup
// ============================================================================

/// Run every reconciliation step in order
pub async fn run_startup(
    index: &DigestIndex,
    store: &ObjectStore,
    scheduler: &ExpiryScheduler,
    adopt: bool,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport {
        staging_cleared: store.clear_staging().await?,
        missing_dropped: drop_missing(index, store).await?,
        orphans_removed: remove_temporary_orphans(index, store).await?,
        ..Default::default()
    };

    if adopt {
        report.adopt = adopt_untracked(index, store).await?;
    }

    report.schedule = scheduler.reconcile().await;

    tracing::info!(
        staging_cleared = report.staging_cleared,
        missing_dropped = report.missing_dropped,
        orphans_removed = report.orphans_removed,
        adopted = report.adopt.adopted,
        duplicates = report.adopt.duplicates.len(),
        "Startup reconciliation complete"
    );

    Ok(report)
}

/// Drop index entries whose object no longer exists. Persists once.
pub async fn drop_missing(index: &DigestIndex, store: &ObjectStore) -> Result<usize, IndexError> {
    let mut missing = Vec::new();

    for entry in index.entries() {
        if !store.exists(entry.area, &entry.stored_name).await {
            tracing::warn!(
                digest = %entry.digest,
                stored_name = %entry.stored_name,
                area = %entry.area,
                "Indexed object missing from storage, dropping entry"
            );
            missing.push(entry.digest);
        }
    }

    Ok(index.remove_many(&missing).await?.len())
}

/// Delete temporary-area files without an index entry
pub async fn remove_temporary_orphans(
    index: &DigestIndex,
    store: &ObjectStore,
) -> Result<usize, StoreError> {
    let mut removed = 0;

    for name in store.list(StorageArea::Temporary).await? {
        if index.find_by_name(StorageArea::Temporary, &name).is_some() {
            continue;
        }

        match store.delete(StorageArea::Temporary, &name).await {
            Ok(()) => {
                tracing::info!(stored_name = %name, "Removed orphaned temporary file");
                removed += 1;
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(stored_name = %name, error = %e, "Failed to remove orphaned temporary file");
            }
        }
    }

    Ok(removed)
}

// ============================================================================
// Backfill
// ============================================================================

/// Hash permanent-area files without an index entry and adopt them.
///
/// A file whose digest is already indexed is reported as a duplicate and
/// left untouched.
pub async fn adopt_untracked(
    index: &DigestIndex,
    store: &ObjectStore,
) -> Result<AdoptReport, ReconcileError> {
    let mut report = AdoptReport::default();
    let mut duplicates: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let dir = store.area_dir(StorageArea::Permanent);

    for name in store.list(StorageArea::Permanent).await? {
        if index.find_by_name(StorageArea::Permanent, &name).is_some() {
            continue;
        }

        let (digest, size) = hash_file(&dir.join(&name)).await?;

        if let Some(existing) = index.lookup(&digest) {
            tracing::warn!(
                digest = %digest,
                file = %name,
                indexed_as = %existing.stored_name,
                "Untracked file duplicates indexed content"
            );
            duplicates
                .entry(digest)
                .or_insert_with(|| vec![existing.stored_name.clone()])
                .push(name);
            continue;
        }

        index
            .insert(IndexEntry::permanent(digest.clone(), name.clone(), size, None))
            .await?;
        tracing::info!(digest = %digest, stored_name = %name, "Adopted untracked file");
        report.adopted += 1;
    }

    report.duplicates = duplicates
        .into_iter()
        .map(|(digest, files)| DuplicateGroup { digest, files })
        .collect();

    Ok(report)
}

// ============================================================================
// Duplicate Report
// ============================================================================

/// Group the regular files in `dir` by SHA-256, keeping digests shared by
/// more than one file. Groups are ordered by digest, files by name.
pub async fn find_duplicates(dir: &Path) -> io::Result<Vec<DuplicateGroup>> {
    let mut by_digest: HashMap<String, Vec<String>> = HashMap::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let (digest, _) = hash_file(&entry.path()).await?;
        by_digest.entry(digest).or_default().push(name);
    }

    let mut groups: Vec<DuplicateGroup> = by_digest
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(digest, mut files)| {
            files.sort();
            DuplicateGroup { digest, files }
        })
        .collect();
    groups.sort_by(|a, b| a.digest.cmp(&b.digest));

    Ok(groups)
}

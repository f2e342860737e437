//! Digest Index
//!
//! Process-wide mapping from content digest to stored object.
//!
//! - Lookups are served from memory and never touch the disk
//! - Every mutation is persisted before it is reported as successful
//! - Mutations are serialized by a single writer lock; readers only take a
//!   short in-memory read lock
//! - Persistence is pluggable: a JSON file for production, an in-memory
//!   backend for tests

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::types::{IndexEntry, IndexError};
use crate::digest::is_valid_digest;
use crate::storage::StorageArea;

/// Serialized form of the whole index: digest -> entry
pub type IndexSnapshot = BTreeMap<String, IndexEntry>;

// ============================================================================
// Backend Trait
// ============================================================================

/// Persistence backend for the digest index.
///
/// The index is always loaded and saved wholesale.
#[async_trait::async_trait]
pub trait IndexBackend: Send + Sync {
    /// Load the persisted index. A missing index is an empty one.
    async fn load(&self) -> Result<IndexSnapshot, IndexError>;

    /// Durably replace the persisted index
    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), IndexError>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}

// ============================================================================
// JSON File Backend
// ============================================================================

/// Index stored as one pretty-printed JSON object
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
    }
}

#[async_trait::async_trait]
impl IndexBackend for JsonFileBackend {
    async fn load(&self) -> Result<IndexSnapshot, IndexError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted index, starting empty");
                return Ok(IndexSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(IndexSnapshot::new());
        }

        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), IndexError> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write aside, then swap in
        let temp_path = self.temp_path();
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// Memory Backend
// ============================================================================

/// In-memory backend for tests
#[derive(Default)]
pub struct MemoryBackend {
    snapshot: Mutex<IndexSnapshot>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a pre-populated snapshot
    pub fn with_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let backend = Self::new();
        {
            let mut snapshot = backend.snapshot.lock();
            for entry in entries {
                snapshot.insert(entry.digest.clone(), entry);
            }
        }
        backend
    }

    /// Make subsequent saves fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> IndexSnapshot {
        self.snapshot.lock().clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IndexBackend for MemoryBackend {
    async fn load(&self) -> Result<IndexSnapshot, IndexError> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &IndexSnapshot) -> Result<(), IndexError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(IndexError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated save failure",
            )));
        }
        *self.snapshot.lock() = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Digest Index
// ============================================================================

/// Shared digest -> object mapping
#[derive(Clone)]
pub struct DigestIndex {
    inner: Arc<DigestIndexInner>,
}

struct DigestIndexInner {
    backend: Arc<dyn IndexBackend>,

    /// In-memory view, authoritative for lookups
    state: RwLock<IndexState>,

    /// Serializes mutate + persist
    writer: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct IndexState {
    by_digest: HashMap<String, IndexEntry>,

    /// (area, stored name) -> digest, for retrieval
    by_name: HashMap<(StorageArea, String), String>,
}

impl IndexState {
    fn insert(&mut self, entry: IndexEntry) {
        self.by_name
            .insert((entry.area, entry.stored_name.clone()), entry.digest.clone());
        self.by_digest.insert(entry.digest.clone(), entry);
    }

    fn remove(&mut self, digest: &str) -> Option<IndexEntry> {
        let entry = self.by_digest.remove(digest)?;
        self.by_name.remove(&(entry.area, entry.stored_name.clone()));
        Some(entry)
    }

    fn snapshot(&self) -> IndexSnapshot {
        self.by_digest
            .iter()
            .map(|(digest, entry)| (digest.clone(), entry.clone()))
            .collect()
    }
}

impl DigestIndex {
    /// Load the index from a backend
    pub async fn load(backend: Arc<dyn IndexBackend>) -> Result<Self, IndexError> {
        let snapshot = backend.load().await?;
        let mut state = IndexState::default();

        for (key, mut entry) in snapshot {
            if !is_valid_digest(&key) {
                tracing::warn!(key = %key, "Skipping index entry with malformed digest");
                continue;
            }
            if entry.digest != key {
                tracing::warn!(
                    key = %key,
                    digest = %entry.digest,
                    "Index entry digest does not match its key, using key"
                );
                entry.digest = key;
            }
            state.insert(entry);
        }

        tracing::info!(
            backend = %backend.describe(),
            entries = state.by_digest.len(),
            "Loaded digest index"
        );

        Ok(Self {
            inner: Arc::new(DigestIndexInner {
                backend,
                state: RwLock::new(state),
                writer: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Open the index persisted at a JSON file path
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        Self::load(Arc::new(JsonFileBackend::new(path))).await
    }

    /// Empty index with an in-memory backend
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(DigestIndexInner {
                backend: Arc::new(MemoryBackend::new()),
                state: RwLock::new(IndexState::default()),
                writer: tokio::sync::Mutex::new(()),
            }),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current entry for a digest
    pub fn lookup(&self, digest: &str) -> Option<IndexEntry> {
        self.inner.state.read().by_digest.get(digest).cloned()
    }

    /// Entry whose object is stored under `name` in `area`
    pub fn find_by_name(&self, area: StorageArea, name: &str) -> Option<IndexEntry> {
        let state = self.inner.state.read();
        let digest = state.by_name.get(&(area, name.to_string()))?;
        state.by_digest.get(digest).cloned()
    }

    /// Copy of every entry
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.inner.state.read().by_digest.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add an entry and persist.
    ///
    /// Fails with `Conflict` if the digest is already indexed. If the index
    /// cannot be persisted the entry is rolled back.
    pub async fn insert(&self, entry: IndexEntry) -> Result<(), IndexError> {
        let _writer = self.inner.writer.lock().await;
        let digest = entry.digest.clone();

        {
            let mut state = self.inner.state.write();
            if state.by_digest.contains_key(&digest) {
                return Err(IndexError::Conflict(digest));
            }
            state.insert(entry);
        }

        if let Err(e) = self.persist_locked().await {
            self.inner.state.write().remove(&digest);
            tracing::error!(digest = %digest, error = %e, "Failed to persist index, insert rolled back");
            return Err(e);
        }

        tracing::debug!(digest = %digest, "Indexed digest");
        Ok(())
    }

    /// Remove an entry and persist. Removing an absent digest is a no-op.
    ///
    /// The in-memory removal stands even when persisting fails, since the
    /// caller has already deleted the bytes.
    pub async fn remove(&self, digest: &str) -> Result<Option<IndexEntry>, IndexError> {
        let _writer = self.inner.writer.lock().await;

        let removed = self.inner.state.write().remove(digest);
        if removed.is_none() {
            return Ok(None);
        }

        self.persist_locked().await?;
        tracing::debug!(digest = %digest, "Removed digest from index");
        Ok(removed)
    }

    /// Remove several entries with a single persist
    pub async fn remove_many(&self, digests: &[String]) -> Result<Vec<IndexEntry>, IndexError> {
        let _writer = self.inner.writer.lock().await;

        let removed: Vec<IndexEntry> = {
            let mut state = self.inner.state.write();
            digests.iter().filter_map(|d| state.remove(d)).collect()
        };

        if !removed.is_empty() {
            self.persist_locked().await?;
        }

        Ok(removed)
    }

    /// Write the full index to the backend
    pub async fn persist(&self) -> Result<(), IndexError> {
        let _writer = self.inner.writer.lock().await;
        self.persist_locked().await
    }

    async fn persist_locked(&self) -> Result<(), IndexError> {
        let snapshot = self.inner.state.read().snapshot();
        self.inner.backend.save(&snapshot).await
    }
}

// ============================================================================
// Tests
// ============================================================================

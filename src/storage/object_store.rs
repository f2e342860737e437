//! Object Store
//!
//! Physical placement of accepted files on the local filesystem.
//!
//! - Permanent and temporary objects live in separate directories
//! - Writes land in a private staging directory first and are renamed into
//!   place, so a reader never sees a partially written object
//! - Stored names are random, never derived from the client's file name

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures::stream::{self, Stream};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::types::{StorageArea, StoreError};
use crate::config::StorageConfig;

// ============================================================================
// Constants
// ============================================================================

/// Chunk size used when streaming objects back to clients
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Longest extension carried over from the client's file name
const MAX_EXTENSION_LEN: usize = 16;

/// Longest stored name accepted on lookup
const MAX_STORED_NAME_LEN: usize = 255;

/// Suffix of in-flight staging files
const STAGING_SUFFIX: &str = "part";

// ============================================================================
// Naming
// ============================================================================

/// Derive a collision-resistant stored name for an upload.
///
/// The body is a v4 UUID (122 random bits from the OS RNG). The original
/// extension is kept only when it is a short ASCII alphanumeric token, so
/// traversal sequences and separators never reach the filesystem.
pub fn allocate_name(original_name: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    match original_name.and_then(sanitize_extension) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id,
    }
}

/// Extract a safe, lowercased extension from a client file name
pub fn sanitize_extension(original_name: &str) -> Option<String> {
    // Clients on Windows send backslash separators
    let base = original_name.rsplit(['/', '\\']).next()?;
    let ext = Path::new(base).extension()?.to_str()?;

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}

/// Check that a stored name is a single, visible path component
pub fn is_valid_stored_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_STORED_NAME_LEN
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

// ============================================================================
// Object Store
// ============================================================================

/// Filesystem-backed store for permanent and temporary objects
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<ObjectStoreInner>,
}

struct ObjectStoreInner {
    permanent_dir: PathBuf,
    temporary_dir: PathBuf,
    staging_dir: PathBuf,
}

impl ObjectStore {
    /// Create a store over the given directories.
    ///
    /// The staging directory must be on the same filesystem as both areas so
    /// the final rename is atomic.
    pub fn new(permanent_dir: PathBuf, temporary_dir: PathBuf, staging_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(ObjectStoreInner {
                permanent_dir,
                temporary_dir,
                staging_dir,
            }),
        }
    }

    /// Create a store from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.permanent_dir.clone(),
            config.temporary_dir.clone(),
            config.staging_dir.clone(),
        )
    }

    /// Create all directories the store writes into
    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.inner.permanent_dir).await?;
        fs::create_dir_all(&self.inner.temporary_dir).await?;
        fs::create_dir_all(&self.inner.staging_dir).await?;
        Ok(())
    }

    /// Directory backing an area
    pub fn area_dir(&self, area: StorageArea) -> &Path {
        match area {
            StorageArea::Permanent => &self.inner.permanent_dir,
            StorageArea::Temporary => &self.inner.temporary_dir,
        }
    }

    fn object_path(&self, area: StorageArea, name: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_stored_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.area_dir(area).join(name))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Open a private staging file for an incoming object
    pub async fn stage(&self) -> Result<StagedObject, StoreError> {
        let path = self
            .inner
            .staging_dir
            .join(format!("{}.{}", Uuid::new_v4().simple(), STAGING_SUFFIX));
        let file = File::create(&path).await?;

        Ok(StagedObject {
            file: Some(file),
            path,
            store: self.clone(),
            size: 0,
            finished: false,
        })
    }

    /// Write a complete object atomically
    pub async fn write(
        &self,
        area: StorageArea,
        name: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let mut staged = self.stage().await?;
        staged.write(data).await?;
        staged.commit(area, name).await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Open an object for streaming
    pub async fn read(&self, area: StorageArea, name: &str) -> Result<ObjectReader, StoreError> {
        let path = self.object_path(area, name)?;

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        Ok(ObjectReader {
            file,
            size: metadata.len(),
        })
    }

    /// Check whether an object is present
    pub async fn exists(&self, area: StorageArea, name: &str) -> bool {
        match self.object_path(area, name) {
            Ok(path) => fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// List stored names in an area (regular, visible files only)
    pub async fn list(&self, area: StorageArea) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.area_dir(area)).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) if is_valid_stored_name(name) => names.push(name.to_string()),
                _ => {
                    tracing::debug!(path = %entry.path().display(), "Skipping unlisted file");
                }
            }
        }

        names.sort();
        Ok(names)
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Remove an object. Fails with `NotFound` if it is already gone.
    pub async fn delete(&self, area: StorageArea, name: &str) -> Result<(), StoreError> {
        let path = self.object_path(area, name)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove leftover staging files from an earlier run
    pub async fn clear_staging(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        let mut entries = fs::read_dir(&self.inner.staging_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(count = count, "Removed leftover staging files");
        }

        Ok(count)
    }
}

// ============================================================================
// Staged Object
// ============================================================================

/// An object being received into the staging directory.
///
/// Dropping a staged object without committing it removes the staging file,
/// so an aborted upload leaves nothing behind.
pub struct StagedObject {
    file: Option<File>,
    path: PathBuf,
    store: ObjectStore,
    size: u64,
    finished: bool,
}

impl StagedObject {
    /// Append bytes
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "staged object already closed"))?;
        file.write_all(data).await?;
        self.size += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush to stable storage and move into place under `name`.
    ///
    /// Refuses to replace an existing object.
    pub async fn commit(mut self, area: StorageArea, name: &str) -> Result<(), StoreError> {
        let target = self.store.object_path(area, name)?;

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }

        if fs::try_exists(&target).await? {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("object already exists: {}", name),
            )));
        }

        fs::rename(&self.path, &target).await?;
        self.finished = true;

        tracing::debug!(
            area = %area,
            stored_name = %name,
            size = self.size,
            "Committed object"
        );

        Ok(())
    }

    /// Throw the staged bytes away
    pub async fn discard(mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
        }
        self.finished = true;
    }
}

impl Drop for StagedObject {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// ============================================================================
// Object Reader
// ============================================================================

/// An open object ready to be streamed
pub struct ObjectReader {
    file: File,
    size: u64,
}

impl ObjectReader {
    /// Object size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Stream the object in fixed-size chunks
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::try_unfold(self.file, |mut file| async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, io::Error>(None);
            }
            buf.truncate(n);
            Ok::<_, io::Error>(Some((Bytes::from(buf), file)))
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

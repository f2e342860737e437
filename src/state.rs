//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::expiry::ExpiryScheduler;
use crate::index::{DigestIndex, DigestLocks, IndexEntry, IndexError};
use crate::storage::{ObjectStore, StoreError};
use crate::upload::IngestService;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to prepare storage directories: {0}")]
    Storage(#[from] StoreError),

    #[error("Failed to load digest index: {0}")]
    Index(#[from] IndexError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    index: DigestIndex,
    store: ObjectStore,
    locks: DigestLocks,
    scheduler: ExpiryScheduler,
    ingest: IngestService,
}

impl AppState {
    /// Create the application state from configuration.
    ///
    /// Creates the storage directories and loads the persisted index.
    pub async fn new(config: Config) -> Result<Self, StateError> {
        let store = ObjectStore::from_config(&config.storage);
        store.init().await?;

        let index = DigestIndex::open(&config.storage.index_path).await?;

        Ok(Self::with_parts(config, index, store))
    }

    /// Assemble state around an existing index and store
    pub fn with_parts(config: Config, index: DigestIndex, store: ObjectStore) -> Self {
        let locks = DigestLocks::new();
        let scheduler = ExpiryScheduler::new(
            index.clone(),
            store.clone(),
            locks.clone(),
            config.expiry.sweep_interval,
        );
        let ingest = IngestService::new(
            index.clone(),
            store.clone(),
            locks.clone(),
            scheduler.clone(),
            config.limits.clone(),
            config.expiry.ttl,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                index,
                store,
                locks,
                scheduler,
                ingest,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the digest index
    pub fn index(&self) -> &DigestIndex {
        &self.inner.index
    }

    /// Get the object store
    pub fn store(&self) -> &ObjectStore {
        &self.inner.store
    }

    /// Get the per-digest lock table
    pub fn locks(&self) -> &DigestLocks {
        &self.inner.locks
    }

    /// Get the expiry scheduler
    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.inner.scheduler
    }

    /// Get the ingest service
    pub fn ingest(&self) -> &IngestService {
        &self.inner.ingest
    }

    /// Public URL an entry's object is served at
    pub fn object_url(&self, entry: &IndexEntry) -> String {
        format!(
            "{}/{}/{}",
            self.inner.config.server.public_url.trim_end_matches('/'),
            entry.area.url_prefix(),
            urlencoding::encode(&entry.stored_name)
        )
    }
}

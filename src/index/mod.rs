//! Digest index
//!
//! The persistent mapping from content digest to stored object, and the
//! per-digest locks that keep concurrent uploads and expiries of the same
//! content from racing.

pub mod digest_index;
pub mod locks;
pub mod types;

pub use digest_index::{DigestIndex, IndexBackend, IndexSnapshot, JsonFileBackend, MemoryBackend};
pub use locks::{DigestGuard, DigestLocks};
pub use types::{EntryKind, IndexEntry, IndexError};

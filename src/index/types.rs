//! Digest index types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::storage::StorageArea;

// ============================================================================
// Entry Kind
// ============================================================================

/// Retention class of an indexed object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Permanent,
    Temporary,
}

impl EntryKind {
    /// Storage area objects of this kind are placed in
    pub fn area(&self) -> StorageArea {
        match self {
            EntryKind::Permanent => StorageArea::Permanent,
            EntryKind::Temporary => StorageArea::Temporary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Permanent => "permanent",
            EntryKind::Temporary => "temporary",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Index Entry
// ============================================================================

/// Metadata for one stored object, keyed by its content digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// SHA-256 of the contents, hex encoded
    pub digest: String,

    /// File name in the storage area
    pub stored_name: String,

    /// Retention class
    pub kind: EntryKind,

    /// Storage area holding the bytes
    pub area: StorageArea,

    /// Size in bytes
    pub size: u64,

    /// Name the client uploaded the file as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Deletion deadline, temporary entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IndexEntry {
    /// Entry for a permanent object
    pub fn permanent(
        digest: String,
        stored_name: String,
        size: u64,
        original_name: Option<String>,
    ) -> Self {
        Self {
            digest,
            stored_name,
            kind: EntryKind::Permanent,
            area: StorageArea::Permanent,
            size,
            original_name,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Entry for a temporary object expiring `ttl` from now
    pub fn temporary(
        digest: String,
        stored_name: String,
        size: u64,
        original_name: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            digest,
            stored_name,
            kind: EntryKind::Temporary,
            area: StorageArea::Temporary,
            size,
            original_name,
            created_at: now,
            expires_at: Some(expires_at),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == EntryKind::Temporary
    }

    /// Whether a temporary entry is due for deletion at `now`.
    ///
    /// A temporary entry without a deadline counts as due.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_temporary() && self.expires_at.map_or(true, |deadline| deadline <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time left before a temporary entry is due, zero once it is
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_temporary() {
            return None;
        }
        let deadline = self.expires_at.unwrap_or(now);
        Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Digest index errors
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Internal: the digest is already indexed. Callers treat this as a
    /// dedupe hit.
    #[error("Digest already indexed: {0}")]
    Conflict(String),

    #[error("Index IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_entry_expiry() {
        let entry = IndexEntry::temporary(
            "d".repeat(64),
            "name".to_string(),
            5,
            None,
            Duration::from_secs(60),
        );
        let deadline = entry.expires_at.unwrap();

        assert_eq!(entry.area, StorageArea::Temporary);
        assert!(!entry.is_expired_at(deadline - chrono::Duration::seconds(1)));
        assert!(entry.is_expired_at(deadline));
        assert!(entry.is_expired_at(deadline + chrono::Duration::seconds(1)));

        let remaining = entry.remaining(deadline - chrono::Duration::seconds(10)).unwrap();
        assert_eq!(remaining, Duration::from_secs(10));
        assert_eq!(entry.remaining(deadline + chrono::Duration::hours(1)), Some(Duration::ZERO));
    }

    #[test]
    fn test_permanent_entry_never_expires() {
        let entry = IndexEntry::permanent("d".repeat(64), "name".to_string(), 5, None);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired_at(Utc::now() + chrono::Duration::days(3650)));
        assert_eq!(entry.remaining(Utc::now()), None);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = IndexEntry::permanent(
            "d".repeat(64),
            "abc.txt".to_string(),
            5,
            Some("hello.txt".to_string()),
        );
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["storedName"], "abc.txt");
        assert_eq!(json["kind"], "permanent");
        assert_eq!(json["area"], "permanent");
        assert!(json.get("expiresAt").is_none());
    }
}

//! Object store types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical area an object is stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    /// Kept until removed by an administrator
    Permanent,
    /// Removed by the expiry scheduler
    Temporary,
}

impl StorageArea {
    /// Path segment objects in this area are served under
    pub fn url_prefix(&self) -> &'static str {
        match self {
            StorageArea::Permanent => "uploads",
            StorageArea::Temporary => "temp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Permanent => "permanent",
            StorageArea::Temporary => "temporary",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid stored name: {0}")]
    InvalidName(String),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

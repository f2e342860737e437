//! Content digests
//!
//! SHA-256 over the full file contents, hex encoded. The digest is the key of
//! the index and the only identity two uploads are compared by.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Read buffer used when hashing files already on disk
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check that a string looks like a lowercase hex SHA-256 digest
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == DIGEST_HEX_LEN
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Hash a file on disk in a single streaming pass.
///
/// Returns the hex digest and the number of bytes read.
pub async fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_compute_hash_known_value() {
        assert_eq!(compute_hash(b"hello"), HELLO_SHA256);
        assert_eq!(compute_hash(b"hello").len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_is_valid_digest() {
        assert!(is_valid_digest(HELLO_SHA256));
        assert!(!is_valid_digest("abc123"));
        assert!(!is_valid_digest(&HELLO_SHA256.to_uppercase()));
        assert!(!is_valid_digest(&format!("{}g", &HELLO_SHA256[..63])));
    }

    #[tokio::test]
    async fn test_hash_file_matches_in_memory_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sample.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let (digest, size) = hash_file(&path).await.unwrap();
        assert_eq!(digest, compute_hash(&data));
        assert_eq!(size, data.len() as u64);
    }
}

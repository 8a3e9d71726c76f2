//! SHA-256 content checksums.
//!
//! The dev-mode watcher compares checksums of the notebook file so that a
//! save which leaves the bytes untouched does not trigger a reload.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Read a file and return the SHA-256 hex digest of its contents.
pub async fn checksum_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha256_hex(&bytes))
}

//! Host identity fingerprint.
//!
//! A host is "the same logical host" across reconnects when it runs from the
//! same working directory.  Both sides derive the fingerprint the same way so
//! the hub can map a registry entry (which carries the path) to a live
//! session (which carries the hash).

use std::path::Path;

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Fingerprint a host path.  Trailing separators are ignored so `/a/b/` and
/// `/a/b` map to the same identity.
pub fn host_identity_hash(host_path: &str) -> String {
    let trimmed = host_path.trim_end_matches(['/', '\\']);
    let normalized = if trimmed.is_empty() { host_path } else { trimmed };
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}

/// Fingerprint a directory on disk, canonicalizing it first when possible.
pub fn identity_for_dir(dir: &Path) -> String {
    let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    host_identity_hash(&canonical.to_string_lossy())
}

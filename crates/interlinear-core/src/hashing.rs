//! Content addressing for the result cache.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `content`.
///
/// Cache keys embed this hash, so any edit to a unit's source text produces a
/// different key and a natural cache miss.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

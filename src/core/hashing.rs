//! Content hashing shared by layers, compiled prompts and template bundles.

use sha2::{Digest, Sha256};

/// Separator fed between parts so that `["ab", "c"]` and `["a", "bc"]` differ.
const PART_SEPARATOR: [u8; 1] = [0x1f];

/// SHA-256 over an ordered list of parts, hex encoded.
pub fn content_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(PART_SEPARATOR);
    }
    hex::encode(hasher.finalize())
}

/// First 12 hex characters, for log lines and artifact names.
pub fn short_hash(hash: &str) -> &str {
    let end = hash.len().min(12);
    &hash[..end]
}

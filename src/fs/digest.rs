use sha2::{Digest, Sha256};

/// Storage key for a logical path: hex SHA-256 of its `/`-separated form.
/// Used to name attribute files and version directories so that arbitrary
/// path characters never reach the host filesystem.
pub fn path_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hash_hex(&hasher.finalize())
}

/// Format a hash as a hex string.
pub fn hash_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

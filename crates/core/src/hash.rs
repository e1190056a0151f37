use sha2::{Digest, Sha256};

/// Hex SHA-256 over the serialized snapshot bytes.
pub fn snapshot_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}

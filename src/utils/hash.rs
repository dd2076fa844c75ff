use sha2::{Digest, Sha256};

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// First 8 hex characters of the SHA-256, used for generated file names
pub fn short_digest(data: &[u8]) -> String {
    let mut full = calculate_hash(data);
    full.truncate(8);
    full
}

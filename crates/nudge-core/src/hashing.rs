use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|value| format!("{value:02x}"))
        .collect::<String>()
}

/// Hashes an ordered list of strings by content.
///
/// Every part is length-prefixed, so `["a,b"]` and `["a", "b"]` produce
/// different digests.
pub fn content_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    hasher
        .finalize()
        .iter()
        .map(|value| format!("{value:02x}"))
        .collect::<String>()
}

//! # Hashing Utilities
//!
//! Ember has exactly one content hash: SHA-256, rendered as lowercase hex.
//! Transaction ids, block header hashes, Merkle nodes and the empty Merkle
//! root all come out of [`sha256_hex`]. Using a text digest keeps the wire
//! format readable and makes the proof-of-work rule a plain string prefix
//! check.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data` as a fixed-size array.
///
/// # Example
///
/// ```
/// use ember_protocol::crypto::sha256;
///
/// let digest = sha256(b"ember");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the SHA-256 digest of `data` and encode it as 64 lowercase hex
/// characters.
///
/// # Example
///
/// ```
/// use ember_protocol::crypto::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash the concatenation of string parts without an intermediate allocation.
///
/// `hash_concat(&["ab", "cd"]) == sha256_hex(b"abcd")`. Used wherever the
/// protocol defines a digest over `a ‖ b ‖ ...`.
pub fn hash_concat(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

//! # Cryptographic Primitives for Ember
//!
//! Every hash and every signature in the system flows through here:
//!
//! - **SHA-256** (hex text) for transaction ids, header hashes and Merkle nodes.
//! - **ECDSA P-256** with a SHA-256 prehash for transaction signatures.
//!
//! Everything is a thin wrapper around audited RustCrypto implementations.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{hash_concat, sha256, sha256_hex};
pub use keys::{decode_public_key, encode_public_key, KeyError, Wallet};
pub use signatures::{sign, verify};

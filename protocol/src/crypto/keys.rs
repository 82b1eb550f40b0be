//! # Key Management
//!
//! P-256 (secp256r1) wallets for Ember nodes.
//!
//! Every node owns exactly one [`Wallet`], created at construction and never
//! replaced. Its public half travels on the wire as base64 text of the X.509
//! SubjectPublicKeyInfo DER encoding, which is what ends up in
//! `Transaction::sender_public_key`.
//!
//! Key bytes are never logged. The `Debug` impl of [`Wallet`] prints only
//! the public key.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: not a valid P-256 scalar")]
    InvalidSecretKey,

    #[error("malformed public key: {reason}")]
    MalformedPublicKey { reason: String },
}

/// A node's identity keypair.
///
/// Deliberately not `Serialize`: exporting secret material has to go through
/// [`Wallet::secret_key_bytes`] explicitly.
pub struct Wallet {
    signing_key: SigningKey,
    /// Cached wire encoding of the public key; every transaction carries it.
    public_key_b64: String,
}

impl Wallet {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Rebuild a wallet from a 32-byte big-endian secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key_b64 = encode_public_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key_b64,
        }
    }

    /// The verifying (public) key.
    pub fn public_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Base64 SPKI encoding of the public key, as carried in transactions.
    pub fn public_key_base64(&self) -> &str {
        &self.public_key_b64
    }

    /// Raw 32-byte secret scalar. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("public_key", &self.public_key_b64)
            .finish_non_exhaustive()
    }
}

/// Encode a public key as base64 SPKI DER.
///
/// Encoding a valid point cannot fail; the fallback to an empty string only
/// exists so this stays infallible and such a key would never verify anything.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    key.to_public_key_der()
        .map(|der| BASE64.encode(der.as_bytes()))
        .unwrap_or_default()
}

/// Decode a base64 SPKI DER public key received from the wire.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let der = BASE64
        .decode(encoded)
        .map_err(|e| KeyError::MalformedPublicKey {
            reason: format!("base64: {e}"),
        })?;
    VerifyingKey::from_public_key_der(&der).map_err(|e| KeyError::MalformedPublicKey {
        reason: format!("spki: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_wallets() {
        let a = Wallet::generate();
        let b = Wallet::generate();
        assert_ne!(a.public_key_base64(), b.public_key_base64());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let wallet = Wallet::generate();
        let decoded = decode_public_key(wallet.public_key_base64()).unwrap();
        assert_eq!(&decoded, wallet.public_key());
        assert_eq!(encode_public_key(&decoded), wallet.public_key_base64());
    }

    #[test]
    fn test_secret_bytes_restore_same_identity() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_secret_bytes(&wallet.secret_key_bytes()).unwrap();
        assert_eq!(restored.public_key_base64(), wallet.public_key_base64());
    }

    #[test]
    fn test_zero_secret_is_rejected() {
        assert!(matches!(
            Wallet::from_secret_bytes(&[0u8; 32]),
            Err(KeyError::InvalidSecretKey)
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_public_key("not base64 at all!").is_err());
        assert!(decode_public_key("AAAA").is_err());
        assert!(decode_public_key("").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let wallet = Wallet::generate();
        let rendered = format!("{wallet:?}");
        assert!(!rendered.contains(&hex::encode(wallet.secret_key_bytes())));
    }
}

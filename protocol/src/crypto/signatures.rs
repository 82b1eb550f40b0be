//! # Digital Signatures
//!
//! ECDSA over P-256 with a SHA-256 prehash. Signatures are DER-encoded, the
//! same byte layout most ECDSA libraries emit for this curve.
//!
//! Verification answers a plain `bool`. Whether the key was wrong, the
//! message was altered, or the bytes were not even DER, the answer is "no".

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, VerifyingKey};

use super::keys::Wallet;

/// Sign `message` with the wallet's key and return the DER signature bytes.
///
/// # Example
///
/// ```
/// use ember_protocol::crypto::{sign, verify, Wallet};
///
/// let wallet = Wallet::generate();
/// let signature = sign(&wallet, b"hello");
/// assert!(verify(wallet.public_key(), b"hello", &signature));
/// ```
pub fn sign(wallet: &Wallet, message: &[u8]) -> Vec<u8> {
    let signature: Signature = wallet.signing_key().sign(message);
    signature.to_der().as_bytes().to_vec()
}

/// Verify a DER-encoded signature over `message`.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature_der: &[u8]) -> bool {
    let Ok(signature) = Signature::from_der(signature_der) else {
        return false;
    };
    public_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let wallet = Wallet::generate();
        let sig = sign(&wallet, b"hello, world");
        assert!(verify(wallet.public_key(), b"hello, world", &sig));
    }

    #[test]
    fn test_wrong_message_fails() {
        let wallet = Wallet::generate();
        let sig = sign(&wallet, b"correct message");
        assert!(!verify(wallet.public_key(), b"wrong message", &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = Wallet::generate();
        let other = Wallet::generate();
        let sig = sign(&signer, b"test message");
        assert!(!verify(other.public_key(), b"test message", &sig));
    }

    #[test]
    fn test_garbage_signature_fails_without_panic() {
        let wallet = Wallet::generate();
        assert!(!verify(wallet.public_key(), b"msg", &[]));
        assert!(!verify(wallet.public_key(), b"msg", &[0x30, 0x02, 0x00]));
        assert!(!verify(wallet.public_key(), b"msg", &[0xFF; 72]));
    }

    #[test]
    fn test_empty_message() {
        let wallet = Wallet::generate();
        let sig = sign(&wallet, b"");
        assert!(verify(wallet.public_key(), b"", &sig));
    }

    #[test]
    fn test_signature_is_der_sequence() {
        let wallet = Wallet::generate();
        let sig = sign(&wallet, b"der please");
        // DER SEQUENCE tag, and r||s never exceeds 72 bytes for P-256.
        assert_eq!(sig[0], 0x30);
        assert!(sig.len() <= 72);
    }
}

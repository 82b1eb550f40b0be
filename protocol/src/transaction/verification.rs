//! Transaction verification: structural checks and cryptographic validation.
//!
//! Every transaction arriving in a `TX` message must pass
//! [`verify_transaction`] before it may enter the mempool. The checks run
//! cheapest first: key decoding and id recomputation before the ECDSA check.

use p256::ecdsa::VerifyingKey;
use thiserror::Error;

use super::types::Transaction;
use crate::crypto::{decode_public_key, encode_public_key, verify, KeyError};

/// Reasons a transaction is refused.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The embedded sender key is not a base64 SPKI P-256 key.
    #[error("sender public key is malformed: {0}")]
    MalformedPublicKey(#[from] KeyError),

    /// The id does not match the hash of the signed fields.
    #[error("transaction ID mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    /// No signature was attached.
    #[error("transaction is unsigned")]
    MissingSignature,

    /// The signature does not verify against the embedded sender key.
    #[error("invalid signature on transaction {id}")]
    InvalidSignature { id: String },
}

impl Transaction {
    /// Check the signature against a specific key.
    ///
    /// Returns `false` when `key` is not the key named in `sender_public_key`,
    /// even if the signature itself would verify under `key`.
    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        if !self.is_signed() || encode_public_key(key) != self.sender_public_key {
            return false;
        }
        verify(key, self.signing_payload().as_bytes(), &self.signature)
    }
}

/// Full acceptance check for a transaction received from a peer.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    let key = decode_public_key(&tx.sender_public_key)?;

    let expected = tx.compute_id();
    if expected != tx.id {
        return Err(TransactionError::IdMismatch {
            expected,
            actual: tx.id.clone(),
        });
    }

    if !tx.is_signed() {
        return Err(TransactionError::MissingSignature);
    }

    if !tx.verify_signature(&key) {
        return Err(TransactionError::InvalidSignature { id: tx.id.clone() });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Wallet;
    use crate::transaction::sign_transaction;

    fn signed(wallet: &Wallet) -> Transaction {
        let mut tx = Transaction::with_timestamp(wallet.public_key_base64(), "bob", "payload", 1_000);
        sign_transaction(&mut tx, wallet);
        tx
    }

    // -- signature round-trip --

    #[test]
    fn valid_transaction_passes() {
        let wallet = Wallet::generate();
        let tx = signed(&wallet);
        assert!(tx.verify_signature(wallet.public_key()));
        verify_transaction(&tx).unwrap();
    }

    #[test]
    fn different_key_fails() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let tx = signed(&wallet);
        assert!(!tx.verify_signature(other.public_key()));
    }

    #[test]
    fn signed_by_other_wallet_is_rejected() {
        let claimed = Wallet::generate();
        let actual = Wallet::generate();
        let mut tx = Transaction::new(claimed.public_key_base64(), "bob", "x");
        sign_transaction(&mut tx, &actual);

        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::InvalidSignature { .. })
        ));
    }

    // -- tampering --

    #[test]
    fn mutated_data_fails_signature() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.data = "tampered".into();
        assert!(!tx.verify_signature(wallet.public_key()));
    }

    #[test]
    fn mutated_recipient_fails_signature() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.recipient_address = "mallory".into();
        assert!(!tx.verify_signature(wallet.public_key()));
    }

    #[test]
    fn mutated_timestamp_fails_signature() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.timestamp += 1;
        assert!(!tx.verify_signature(wallet.public_key()));
    }

    #[test]
    fn mutated_field_with_stale_id_is_id_mismatch() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.data = "tampered".into();
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::IdMismatch { .. })
        ));
    }

    #[test]
    fn mutated_field_with_recomputed_id_is_invalid_signature() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.data = "tampered".into();
        tx.id = tx.compute_id();
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::InvalidSignature { .. })
        ));
    }

    // -- structural --

    #[test]
    fn unsigned_is_rejected() {
        let wallet = Wallet::generate();
        let tx = Transaction::new(wallet.public_key_base64(), "bob", "x");
        assert!(!tx.verify_signature(wallet.public_key()));
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::MissingSignature)
        ));
    }

    #[test]
    fn malformed_sender_key_is_rejected() {
        let tx = Transaction::new("definitely-not-a-key", "bob", "x");
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::MalformedPublicKey(_))
        ));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let wallet = Wallet::generate();
        let mut tx = signed(&wallet);
        tx.signature = vec![0xAB; 16];
        assert!(matches!(
            verify_transaction(&tx),
            Err(TransactionError::InvalidSignature { .. })
        ));
    }
}

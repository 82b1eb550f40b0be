//! The [`Transaction`] record and its content address.
//!
//! A transaction is an authenticated, opaque data record: who sent it, an
//! address string it is meant for, a payload, and when it was made. There is
//! no amount and no balance. Two transactions are the same transaction iff
//! their ids match.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::crypto::hash_concat;

/// A signed, content-addressed data record.
///
/// `id = sha256_hex(sender_public_key ‖ recipient_address ‖ data ‖ timestamp)`.
/// The signature covers the same byte string, so any edit to a signed field
/// breaks both the id and the signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash of the signed fields.
    #[serde(rename = "transactionID")]
    pub id: String,
    /// Base64 SPKI DER public key of the sender.
    #[serde(rename = "senderPublicKey")]
    pub sender_public_key: String,
    /// Opaque destination string. Not validated as a key.
    #[serde(rename = "recipientAddress")]
    pub recipient_address: String,
    /// Arbitrary payload.
    pub data: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
    /// DER ECDSA signature; empty until [`sign_transaction`](super::sign_transaction).
    #[serde(default, with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Build an unsigned transaction stamped with the current time.
    pub fn new(
        sender_public_key: impl Into<String>,
        recipient_address: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::with_timestamp(sender_public_key, recipient_address, data, now)
    }

    /// Build an unsigned transaction with an explicit timestamp.
    pub fn with_timestamp(
        sender_public_key: impl Into<String>,
        recipient_address: impl Into<String>,
        data: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let mut tx = Self {
            id: String::new(),
            sender_public_key: sender_public_key.into(),
            recipient_address: recipient_address.into(),
            data: data.into(),
            timestamp,
            signature: Vec::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// The exact bytes that are hashed into the id and signed.
    pub fn signing_payload(&self) -> String {
        format!(
            "{}{}{}{}",
            self.sender_public_key, self.recipient_address, self.data, self.timestamp
        )
    }

    /// Recompute the id from the current field values.
    pub fn compute_id(&self) -> String {
        let timestamp = self.timestamp.to_string();
        hash_concat(&[
            self.sender_public_key.as_str(),
            self.recipient_address.as_str(),
            self.data.as_str(),
            timestamp.as_str(),
        ])
    }

    /// Whether a signature has been attached.
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// First ten characters of the id, for log lines.
    pub fn short_id(&self) -> &str {
        let end = self.id.char_indices().nth(10).map_or(self.id.len(), |(i, _)| i);
        &self.id[..end]
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Serde adapter carrying signature bytes as base64 text.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256_hex;

    #[test]
    fn test_id_is_hash_of_concatenated_fields() {
        let tx = Transaction::with_timestamp("PUB", "bob", "hello", 42);
        assert_eq!(tx.id, sha256_hex(b"PUBbobhello42"));
        assert_eq!(tx.signing_payload(), "PUBbobhello42");
    }

    #[test]
    fn test_new_stamps_current_time() {
        let before = chrono::Utc::now().timestamp_millis() as u64;
        let tx = Transaction::new("PUB", "bob", "x");
        assert!(tx.timestamp >= before);
        assert!(!tx.is_signed());
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = Transaction::with_timestamp("PUB", "bob", "hello", 1);
        let mut b = a.clone();
        b.signature = vec![1, 2, 3];
        assert_eq!(a, b);

        let c = Transaction::with_timestamp("PUB", "bob", "hello", 2);
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_field_names() {
        let mut tx = Transaction::with_timestamp("PUB", "bob", "hello", 7);
        tx.signature = vec![0xDE, 0xAD];
        let value = serde_json::to_value(&tx).unwrap();

        assert_eq!(value["transactionID"], tx.id.as_str());
        assert_eq!(value["senderPublicKey"], "PUB");
        assert_eq!(value["recipientAddress"], "bob");
        assert_eq!(value["data"], "hello");
        assert_eq!(value["timestamp"], 7);
        assert_eq!(value["signature"], "3q0=");
    }

    #[test]
    fn test_json_roundtrip_preserves_signature() {
        let mut tx = Transaction::with_timestamp("PUB", "bob", "hello", 7);
        tx.signature = vec![9, 8, 7, 6];
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signature, tx.signature);
        assert_eq!(back.id, tx.id);
    }

    #[test]
    fn test_missing_signature_decodes_as_unsigned() {
        let json = r#"{"transactionID":"x","senderPublicKey":"p","recipientAddress":"r","data":"d","timestamp":1}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert!(!tx.is_signed());
    }

    #[test]
    fn test_missing_required_field_fails_to_decode() {
        let json = r#"{"transactionID":"x","senderPublicKey":"p","data":"d","timestamp":1}"#;
        assert!(serde_json::from_str::<Transaction>(json).is_err());
    }

    #[test]
    fn test_short_id() {
        let tx = Transaction::with_timestamp("PUB", "bob", "hello", 7);
        assert_eq!(tx.short_id().len(), 10);
        assert!(tx.id.starts_with(tx.short_id()));
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        let mut tx = Transaction::with_timestamp("PUB", "bob", "hello", 7);
        tx.id = "ééééééééééé".into();
        assert_eq!(tx.short_id().chars().count(), 10);
        tx.id = "abc".into();
        assert_eq!(tx.short_id(), "abc");
    }
}

//! Wire protocol: newline-delimited JSON envelopes.
//!
//! Every message on a peer link is one line holding
//! `{"type": <kind>, "jsonData": <string>}`. The payload is itself JSON text
//! whose shape depends on the kind:
//!
//! | type          | jsonData                 |
//! |---------------|--------------------------|
//! | `TX`          | a transaction object     |
//! | `BLOCK`       | a block object           |
//! | `GET_CHAIN`   | empty string             |
//! | `REPLY_CHAIN` | array of block objects   |
//!
//! There is no length prefix; the line break is the frame boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::Block;
use crate::transaction::Transaction;

/// Decoding failures. All of them drop the message, never the connection.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed {kind:?} payload: {source}")]
    Payload {
        kind: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected a {expected:?} envelope, got {actual:?}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The four message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Tx,
    Block,
    GetChain,
    ReplyChain,
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "jsonData")]
    pub json_data: String,
}

impl Envelope {
    fn wrap<T: Serialize + ?Sized>(kind: MessageType, payload: &T) -> Result<Self, WireError> {
        let json_data = serde_json::to_string(payload).map_err(WireError::Encode)?;
        Ok(Self { kind, json_data })
    }

    pub fn transaction(tx: &Transaction) -> Result<Self, WireError> {
        Self::wrap(MessageType::Tx, tx)
    }

    pub fn block(block: &Block) -> Result<Self, WireError> {
        Self::wrap(MessageType::Block, block)
    }

    pub fn get_chain() -> Self {
        Self {
            kind: MessageType::GetChain,
            json_data: String::new(),
        }
    }

    pub fn reply_chain(blocks: &[Block]) -> Result<Self, WireError> {
        Self::wrap(MessageType::ReplyChain, blocks)
    }

    /// Render as a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Parse one received line.
    pub fn decode(line: &str) -> Result<Self, WireError> {
        serde_json::from_str(line.trim()).map_err(WireError::Envelope)
    }

    fn payload<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T, WireError> {
        if self.kind != expected {
            return Err(WireError::UnexpectedType {
                expected,
                actual: self.kind,
            });
        }
        serde_json::from_str(&self.json_data).map_err(|source| WireError::Payload {
            kind: self.kind,
            source,
        })
    }

    pub fn decode_transaction(&self) -> Result<Transaction, WireError> {
        self.payload(MessageType::Tx)
    }

    pub fn decode_block(&self) -> Result<Block, WireError> {
        self.payload(MessageType::Block)
    }

    pub fn decode_chain(&self) -> Result<Vec<Block>, WireError> {
        self.payload(MessageType::ReplyChain)
    }
}

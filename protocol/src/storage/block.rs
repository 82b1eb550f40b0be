//! # Block Structure
//!
//! A block is the unit of consensus in Ember: a header that links to its
//! parent and commits to a transaction list, the header hash snapshotted at
//! construction, and the transactions themselves.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── parentHash: String                     │
//! │  ├── transactionsRoot: String (Merkle root) │
//! │  ├── timestamp: u64                         │
//! │  ├── number: u64                            │
//! │  ├── difficulty: usize                      │
//! │  └── nonce: u64          (mined)            │
//! ├─────────────────────────────────────────────┤
//! │  hash: String            (SHA-256 of header)│
//! │  transactions: Vec<Transaction>             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The header hash is `sha256_hex(parentHash ‖ transactionsRoot ‖ timestamp
//! ‖ number ‖ difficulty ‖ nonce)` with the integers in decimal.

use serde::{Deserialize, Serialize};

use super::merkle::merkle_root;
use crate::config::{GENESIS_PARENT_HASH, GENESIS_TIMESTAMP_MS};
use crate::crypto::{hash_concat, sha256_hex};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

/// Everything that is hashed. `nonce` is the only field the miner touches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Hash of the previous block; `"0"` for genesis.
    pub parent_hash: String,
    /// Merkle root of the block's transaction ids.
    pub transactions_root: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Height of the block, genesis = 0.
    pub number: u64,
    /// Difficulty the miner targeted. Informational; validation uses the
    /// chain's own target.
    pub difficulty: usize,
    /// Proof-of-work counter.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header for the block that would follow `parent`, with nonce 0.
    pub fn successor(parent: &Block, transactions: &[Transaction], difficulty: usize) -> Self {
        Self {
            parent_hash: parent.hash.clone(),
            transactions_root: merkle_root(transactions),
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            number: parent.header.number + 1,
            difficulty,
            nonce: 0,
        }
    }

    /// Recompute the header hash from the current field values.
    ///
    /// Never cached: the miner calls this once per nonce.
    pub fn calculate_hash(&self) -> String {
        let timestamp = self.timestamp.to_string();
        let number = self.number.to_string();
        let difficulty = self.difficulty.to_string();
        let nonce = self.nonce.to_string();
        hash_concat(&[
            self.parent_hash.as_str(),
            self.transactions_root.as_str(),
            timestamp.as_str(),
            number.as_str(),
            difficulty.as_str(),
            nonce.as_str(),
        ])
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A sealed block. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Header hash captured by [`Block::new`].
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Seal a header and its transactions, snapshotting the header hash.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let hash = header.calculate_hash();
        Self {
            header,
            hash,
            transactions,
        }
    }

    /// The fixed first block of every chain built with `difficulty`.
    ///
    /// Genesis is identical on every node with the same difficulty and is
    /// exempt from proof-of-work.
    pub fn genesis(difficulty: usize) -> Self {
        let header = BlockHeader {
            parent_hash: GENESIS_PARENT_HASH.to_string(),
            transactions_root: sha256_hex(b""),
            timestamp: GENESIS_TIMESTAMP_MS,
            number: 0,
            difficulty,
            nonce: 0,
        };
        Self::new(header, Vec::new())
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// First ten characters of the hash, for log lines.
    pub fn short_hash(&self) -> &str {
        let end = self.hash.char_indices().nth(10).map_or(self.hash.len(), |(i, _)| i);
        &self.hash[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> Transaction {
        Transaction::with_timestamp("PUB", "bob", "payload", n)
    }

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::genesis(4);
        assert_eq!(genesis.number(), 0);
        assert_eq!(genesis.header.parent_hash, "0");
        assert_eq!(genesis.header.timestamp, 1_678_886_400_000);
        assert_eq!(genesis.header.transactions_root, sha256_hex(b""));
        assert_eq!(genesis.header.nonce, 0);
        assert!(genesis.transactions.is_empty());
    }

    #[test]
    fn genesis_hash_is_deterministic() {
        assert_eq!(Block::genesis(4).hash, Block::genesis(4).hash);
        assert_ne!(Block::genesis(4).hash, Block::genesis(3).hash);
    }

    #[test]
    fn header_hash_covers_every_field() {
        let base = Block::genesis(2).header;
        let h = base.calculate_hash();

        let mut changed = base.clone();
        changed.nonce = 1;
        assert_ne!(changed.calculate_hash(), h);

        let mut changed = base.clone();
        changed.timestamp += 1;
        assert_ne!(changed.calculate_hash(), h);

        let mut changed = base.clone();
        changed.transactions_root = "x".into();
        assert_ne!(changed.calculate_hash(), h);

        let mut changed = base;
        changed.number = 9;
        assert_ne!(changed.calculate_hash(), h);
    }

    #[test]
    fn header_hash_is_sha256_of_decimal_concatenation() {
        let header = BlockHeader {
            parent_hash: "p".into(),
            transactions_root: "r".into(),
            timestamp: 10,
            number: 2,
            difficulty: 4,
            nonce: 77,
        };
        assert_eq!(header.calculate_hash(), sha256_hex(b"pr102477"));
    }

    #[test]
    fn successor_links_to_parent() {
        let genesis = Block::genesis(4);
        let txs = vec![tx(1), tx(2)];
        let header = BlockHeader::successor(&genesis, &txs, 4);

        assert_eq!(header.parent_hash, genesis.hash);
        assert_eq!(header.number, 1);
        assert_eq!(header.nonce, 0);
        assert_eq!(header.transactions_root, merkle_root(&txs));
    }

    #[test]
    fn new_snapshots_hash() {
        let genesis = Block::genesis(4);
        let block = Block::new(BlockHeader::successor(&genesis, &[], 4), vec![]);
        assert_eq!(block.hash, block.header.calculate_hash());
    }

    #[test]
    fn json_uses_wire_field_names() {
        let value = serde_json::to_value(Block::genesis(4)).unwrap();
        let header = &value["header"];
        assert_eq!(header["parentHash"], "0");
        assert!(header["transactionsRoot"].is_string());
        assert_eq!(header["number"], 0);
        assert_eq!(header["difficulty"], 4);
        assert_eq!(header["nonce"], 0);
        assert!(value["hash"].is_string());
        assert!(value["transactions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn block_serialization_roundtrip() {
        let genesis = Block::genesis(4);
        let block = Block::new(BlockHeader::successor(&genesis, &[tx(1)], 4), vec![tx(1)]);
        let json = serde_json::to_string(&block).unwrap();
        let recovered: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, recovered);
    }
}

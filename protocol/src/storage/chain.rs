//! # Chain
//!
//! The validated, ordered block sequence of one node plus its fork rule.
//!
//! A [`Chain`] is never empty: it is born holding the genesis block and only
//! changes through [`Chain::add_block`] (extend by one) or
//! [`Chain::replace_chain`] (swap for a strictly longer, fully valid
//! sequence). Both either succeed completely or leave the chain untouched.
//!
//! Every block after genesis must satisfy, against its predecessor:
//!
//! 1. `parentHash` equals the predecessor's hash,
//! 2. `number` is the predecessor's number plus one,
//! 3. the recomputed header hash starts with the difficulty target,
//! 4. `transactionsRoot` equals the Merkle root of its transactions,
//!
//! and its stored `hash` must be the hash of its header.
//!
//! The chain itself holds no lock. The node wraps it in
//! `Arc<parking_lot::RwLock<Chain>>` and mutates it only under the write
//! guard, which makes each check-and-append atomic.

use thiserror::Error;
use tracing::{debug, info};

use super::block::Block;
use super::merkle::merkle_root;

/// Why a block or candidate chain was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("block {number}: parent hash {actual} does not match tip {expected}")]
    ParentHashMismatch {
        number: u64,
        expected: String,
        actual: String,
    },

    #[error("block number {actual} does not follow {previous}")]
    NonSequentialNumber { previous: u64, actual: u64 },

    #[error("block {number}: hash {hash} does not meet target {target}")]
    InsufficientWork {
        number: u64,
        hash: String,
        target: String,
    },

    #[error("block {number}: transactions root {actual} does not match {expected}")]
    MerkleRootMismatch {
        number: u64,
        expected: String,
        actual: String,
    },

    #[error("block {number}: stored hash does not match its header")]
    HashMismatch { number: u64 },

    #[error("candidate chain is empty")]
    EmptyChain,

    #[error("candidate chain does not start with our genesis block")]
    GenesisMismatch,

    #[error("candidate length {candidate} is not longer than ours ({current})")]
    NotLonger { candidate: usize, current: usize },

    #[error("invalid block at index {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<ChainError>,
    },
}

/// A node's local chain.
#[derive(Debug, Clone)]
pub struct Chain {
    /// Never empty; index 0 is genesis.
    blocks: Vec<Block>,
    difficulty: usize,
    target: String,
}

impl Chain {
    /// A chain holding only the genesis block for `difficulty`.
    pub fn new(difficulty: usize) -> Self {
        Self {
            blocks: vec![Block::genesis(difficulty)],
            difficulty,
            target: "0".repeat(difficulty),
        }
    }

    // -- accessors --

    pub fn last_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; present for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of the tip block.
    pub fn height(&self) -> u64 {
        self.last_block().header.number
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// The required hash prefix: `difficulty` zero characters.
    pub fn difficulty_target(&self) -> &str {
        &self.target
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, number: u64) -> Option<&Block> {
        usize::try_from(number).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    /// Whether a header hash satisfies this chain's proof-of-work rule.
    pub fn meets_target(&self, hash: &str) -> bool {
        hash.starts_with(&self.target)
    }

    // -- validation --

    /// Check `candidate` as the direct successor of `previous`.
    pub fn check_successor(&self, previous: &Block, candidate: &Block) -> Result<(), ChainError> {
        let header = &candidate.header;

        if header.parent_hash != previous.hash {
            return Err(ChainError::ParentHashMismatch {
                number: header.number,
                expected: previous.hash.clone(),
                actual: header.parent_hash.clone(),
            });
        }

        if header.number != previous.header.number + 1 {
            return Err(ChainError::NonSequentialNumber {
                previous: previous.header.number,
                actual: header.number,
            });
        }

        let hash = header.calculate_hash();
        if !self.meets_target(&hash) {
            return Err(ChainError::InsufficientWork {
                number: header.number,
                hash,
                target: self.target.clone(),
            });
        }

        let expected_root = merkle_root(&candidate.transactions);
        if header.transactions_root != expected_root {
            return Err(ChainError::MerkleRootMismatch {
                number: header.number,
                expected: expected_root,
                actual: header.transactions_root.clone(),
            });
        }

        if candidate.hash != hash {
            return Err(ChainError::HashMismatch {
                number: header.number,
            });
        }

        Ok(())
    }

    /// Validate a whole candidate sequence from genesis to tip.
    pub fn validate_chain(&self, blocks: &[Block]) -> Result<(), ChainError> {
        let (first, rest) = blocks.split_first().ok_or(ChainError::EmptyChain)?;
        if first != self.genesis() {
            return Err(ChainError::GenesisMismatch);
        }

        let mut previous = first;
        for (offset, block) in rest.iter().enumerate() {
            self.check_successor(previous, block)
                .map_err(|e| ChainError::AtIndex {
                    index: offset + 1,
                    source: Box::new(e),
                })?;
            previous = block;
        }
        Ok(())
    }

    // -- mutation --

    /// Append `block` if it extends the current tip. See [`Chain::add_block`].
    pub fn try_add_block(&mut self, block: Block) -> Result<(), ChainError> {
        self.check_successor(self.last_block(), &block)?;
        debug!(number = block.header.number, hash = %block.short_hash(), "block appended");
        self.blocks.push(block);
        Ok(())
    }

    /// Append `block` if it extends the current tip; `false` leaves the
    /// chain unchanged.
    pub fn add_block(&mut self, block: Block) -> bool {
        let number = block.header.number;
        match self.try_add_block(block) {
            Ok(()) => true,
            Err(reason) => {
                debug!(number, %reason, "block rejected");
                false
            }
        }
    }

    /// Swap in `candidate` if it is strictly longer and fully valid.
    pub fn try_replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), ChainError> {
        if candidate.len() <= self.blocks.len() {
            return Err(ChainError::NotLonger {
                candidate: candidate.len(),
                current: self.blocks.len(),
            });
        }
        self.validate_chain(&candidate)?;

        info!(
            from = self.blocks.len(),
            to = candidate.len(),
            "chain replaced"
        );
        self.blocks = candidate;
        Ok(())
    }

    /// Longest-valid-chain rule. Compares length only.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        match self.try_replace_chain(candidate) {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, "candidate chain rejected");
                false
            }
        }
    }
}

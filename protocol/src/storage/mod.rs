//! # Storage Module
//!
//! In-memory block storage for an Ember node. Nothing here touches disk: a
//! node that restarts begins again from genesis and catches up from peers.
//!
//! ```text
//! block.rs : BlockHeader, Block, genesis, header hashing
//! merkle.rs: Merkle commitment over transaction ids
//! chain.rs : the validated block sequence and the longest-chain rule
//! ```

pub mod block;
pub mod chain;
pub mod merkle;

pub use block::{Block, BlockHeader};
pub use chain::{Chain, ChainError};
pub use merkle::merkle_root;

//! # Network Module
//!
//! Everything that turns a [`Chain`](crate::storage::Chain) into a network
//! participant: the TCP peer protocol, gossip, the mempool, the miner and the
//! node that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! message.rs   : Newline-delimited JSON envelopes (TX, BLOCK, GET_CHAIN, REPLY_CHAIN)
//! peers.rs     : Outbound channel per connected peer, broadcast with exclusion
//! session.rs   : Per-connection reader and message dispatch
//! mempool.rs   : Pending transactions, deduplicated by id, FIFO drain
//! miner.rs     : Proof-of-work loop on a dedicated thread
//! events.rs    : Bounded history ring plus a broadcast event channel
//! node.rs      : Composition root: listener, sessions, miner, commands
//! directory.rs : In-process registry of nodes for simulations
//! ```
//!
//! ## Concurrency
//!
//! - The chain sits behind a `parking_lot::RwLock`. Sessions and the miner
//!   take the write lock for the whole validate-then-append step, so two
//!   blocks at the same height can never both land.
//! - The mempool is a `DashMap` plus an arrival index with its own locking.
//!   It is never touched while the chain lock is held.
//! - Each peer gets an unbounded `mpsc` queue drained by a writer task, so a
//!   broadcast never blocks on a slow socket.

pub mod directory;
pub mod events;
pub mod mempool;
pub mod message;
pub mod miner;
pub mod node;
pub mod peers;
pub mod session;

pub use directory::{NodeDirectory, NodeId};
pub use events::{ChainUpdate, EventLog, NodeEvent};
pub use mempool::{Mempool, MempoolConfig, MempoolError};
pub use message::{Envelope, MessageType, WireError};
pub use miner::{mine_block, Miner, MiningOutcome};
pub use node::{Node, NodeError, NodeSnapshot};
pub use peers::{PeerId, PeerRegistry};
pub use session::{Dispatch, PeerSession};

//! # Protocol Configuration & Constants
//!
//! Every magic number in Ember lives here. The constants describe the shape
//! of the chain every node agrees on (genesis, difficulty); [`NodeConfig`]
//! carries the knobs that may legitimately differ from one node to the next.
//!
//! Two nodes only share a genesis block if they share a difficulty, since the
//! difficulty is committed into the genesis header. Keep that in mind before
//! mixing difficulties inside one simulated network.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::mempool::MempoolConfig;

// ---------------------------------------------------------------------------
// Chain Parameters
// ---------------------------------------------------------------------------

/// Default proof-of-work difficulty: the number of leading `'0'` characters a
/// block hash must carry. Hashes are lowercase hex, so the expected work is
/// `16^difficulty` header hashes (65 536 at the default).
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Parent hash recorded in the genesis header. Not a real hash on purpose,
/// so it can never collide with one.
pub const GENESIS_PARENT_HASH: &str = "0";

/// Genesis timestamp (epoch milliseconds). Fixed so that every node derives
/// a byte-identical genesis block: 2023-03-15T13:20:00Z.
pub const GENESIS_TIMESTAMP_MS: u64 = 1_678_886_400_000;

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Maximum number of pending transactions the miner drains per candidate block.
pub const MINING_BATCH_SIZE: usize = 10;

/// Pause between two mining attempts. Keeps the cooperative stop flag
/// responsive without spinning a core when nothing changes.
pub const MINING_IDLE_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Node Runtime
// ---------------------------------------------------------------------------

/// Number of history lines a node keeps before evicting the oldest.
pub const HISTORY_CAPACITY: usize = 50;

/// Maximum number of pending transactions a node stages.
pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;

/// Capacity of the event broadcast channel. Slow subscribers that fall
/// further behind than this observe a `Lagged` error and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default P2P listening port; simulated networks count upwards from here.
pub const DEFAULT_P2P_PORT: u16 = 8000;

/// Number of peers a freshly bootstrapped node dials.
pub const INITIAL_CONNECTIONS: usize = 3;

/// Default size of a simulated network.
pub const DEFAULT_SIMULATION_NODES: usize = 20;

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Per-node runtime configuration.
///
/// Defaults describe a node listening on `127.0.0.1:8000` with no peers,
/// mining at the default difficulty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the accept loop binds to. Port 0 asks the OS for a free port.
    pub listen_addr: SocketAddr,

    /// Peers dialled at startup. Unreachable peers are skipped silently.
    pub peers: Vec<SocketAddr>,

    /// Proof-of-work difficulty (leading zero hex characters).
    pub difficulty: usize,

    /// Transactions drained from the mempool per mining attempt.
    pub mining_batch_size: usize,

    /// Sleep between mining attempts, in milliseconds.
    pub mining_interval_ms: u64,

    /// Bounded history ring size.
    pub history_capacity: usize,

    /// Event broadcast channel capacity.
    pub event_channel_capacity: usize,

    /// Send `GET_CHAIN` on every outbound connection so a joining node
    /// adopts the longest chain among the peers it dials.
    pub sync_on_connect: bool,

    /// Mempool limits.
    pub mempool: MempoolConfig,
}

impl NodeConfig {
    /// Convenience constructor for a node bound to `listen_addr` with
    /// everything else left at the defaults.
    pub fn with_listen_addr(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }

    /// Mining idle interval as a [`Duration`].
    pub fn mining_interval(&self) -> Duration {
        Duration::from_millis(self.mining_interval_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_P2P_PORT)),
            peers: Vec::new(),
            difficulty: DEFAULT_DIFFICULTY,
            mining_batch_size: MINING_BATCH_SIZE,
            mining_interval_ms: MINING_IDLE_INTERVAL.as_millis() as u64,
            history_capacity: HISTORY_CAPACITY,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            sync_on_connect: true,
            mempool: MempoolConfig::default(),
        }
    }
}

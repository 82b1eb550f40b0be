//! # Ember Node
//!
//! [`Node`] is the composition root of one network participant. It owns the
//! wallet, the chain, the mempool, the peer registry and the event log, and
//! it runs three kinds of workers:
//!
//! - one accept loop (tokio task) spawned by [`Node::listen`],
//! - one [`PeerSession`] task per connection, inbound or outbound,
//! - at most one miner thread, toggled by [`Node::start_mining`] and
//!   [`Node::stop_mining`].
//!
//! `Node` is a cheap `Clone` handle; every clone drives the same node.
//!
//! ```text
//! new() -> listen() -> connect()* -> [start_mining() / stop_mining()]* -> shutdown()
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::directory::NodeId;
use super::events::{ChainUpdate, EventLog, NodeEvent};
use super::mempool::{Mempool, MempoolError};
use super::message::{Envelope, WireError};
use super::miner::Miner;
use super::peers::PeerRegistry;
use super::session::PeerSession;
use crate::config::NodeConfig;
use crate::crypto::Wallet;
use crate::storage::{Block, Chain};
use crate::transaction::{sign_transaction, Transaction};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the node command surface.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transaction not staged: {0}")]
    Mempool(#[from] MempoolError),

    #[error("wire encoding failed: {0}")]
    Wire(#[from] WireError),
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// State shared by the node handle, its sessions and its miner thread.
#[derive(Debug)]
pub(crate) struct NodeContext {
    pub(crate) port: u16,
    pub(crate) config: NodeConfig,
    pub(crate) chain: Arc<RwLock<Chain>>,
    pub(crate) mempool: Mempool,
    pub(crate) peers: PeerRegistry,
    pub(crate) events: EventLog,
}

impl NodeContext {
    /// Tell subscribers where the tip is now.
    pub(crate) fn announce_chain(&self, cause: ChainUpdate) {
        let (height, tip) = {
            let chain = self.chain.read();
            (chain.height(), chain.last_block().hash.clone())
        };
        self.events.emit(NodeEvent::ChainUpdated { height, tip, cause });
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a node for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub address: Option<SocketAddr>,
    pub public_key: String,
    pub height: u64,
    pub chain_length: usize,
    pub tip: String,
    pub difficulty: usize,
    pub mempool_size: usize,
    pub peers: usize,
    pub mining: bool,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

struct NodeInner {
    ctx: Arc<NodeContext>,
    wallet: Wallet,
    miner: Miner,
    local_addr: OnceLock<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

/// Handle to a running Ember node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("height", &self.height())
            .field("peers", &self.peer_count())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Build a node with a freshly generated wallet. Nothing is bound yet.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_wallet(config, Wallet::generate())
    }

    /// Build a node around an existing identity.
    pub fn with_wallet(config: NodeConfig, wallet: Wallet) -> Self {
        let port = config.listen_addr.port();
        let ctx = NodeContext {
            port,
            chain: Arc::new(RwLock::new(Chain::new(config.difficulty))),
            mempool: Mempool::new(config.mempool.clone()),
            peers: PeerRegistry::new(),
            events: EventLog::new(port, config.history_capacity, config.event_channel_capacity),
            config,
        };
        info!(node = port, public_key = %wallet.public_key_base64(), "node created");

        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(NodeInner {
                ctx: Arc::new(ctx),
                wallet,
                miner: Miner::new(),
                local_addr: OnceLock::new(),
                shutdown,
            }),
        }
    }

    // -- networking ----------------------------------------------------------

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address, which differs from the configured one when port 0 was asked.
    pub async fn listen(&self) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.inner.ctx.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        let _ = self.inner.local_addr.set(addr);
        info!(node = self.inner.ctx.port, %addr, "listening for peers");

        let node = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => node.spawn_session(stream, remote, false),
                        Err(e) => warn!(node = node.inner.ctx.port, error = %e, "accept failed"),
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!(node = node.inner.ctx.port, "accept loop stopped");
        });
        Ok(addr)
    }

    /// Dial a peer. Failure is logged and otherwise ignored.
    pub async fn connect(&self, addr: SocketAddr) -> bool {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                self.spawn_session(stream, addr, true);
                true
            }
            Err(e) => {
                debug!(node = self.inner.ctx.port, %addr, error = %e, "dial failed");
                false
            }
        }
    }

    /// Dial every address in turn; returns how many connected.
    pub async fn connect_all(&self, peers: &[SocketAddr]) -> usize {
        let mut connected = 0;
        for &addr in peers {
            if self.connect(addr).await {
                connected += 1;
            }
        }
        connected
    }

    fn spawn_session(&self, stream: TcpStream, remote: SocketAddr, outbound: bool) {
        let ctx = &self.inner.ctx;
        let (sender, receiver) = mpsc::unbounded_channel();
        let peer = ctx.peers.register(sender);
        info!(node = ctx.port, %peer, %remote, outbound, "peer connected");

        if outbound && ctx.config.sync_on_connect {
            if let Ok(line) = Envelope::get_chain().encode() {
                ctx.peers.send_to(peer, &line);
            }
        }

        let session = PeerSession::new(Arc::clone(ctx), peer, Some(remote));
        tokio::spawn(session.run(stream, receiver, self.inner.shutdown.subscribe()));
    }

    /// Register an in-process link and return its session together with the
    /// receiving end of everything the node sends to that link.
    pub fn open_session(&self) -> (PeerSession, mpsc::UnboundedReceiver<String>) {
        let ctx = &self.inner.ctx;
        let (sender, receiver) = mpsc::unbounded_channel();
        let peer = ctx.peers.register(sender);
        (PeerSession::new(Arc::clone(ctx), peer, None), receiver)
    }

    // -- commands ------------------------------------------------------------

    /// Build, sign, stage and broadcast a transaction from this node's wallet.
    pub fn submit_transaction(
        &self,
        recipient: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<Transaction, NodeError> {
        let ctx = &self.inner.ctx;
        let mut tx = Transaction::new(self.inner.wallet.public_key_base64(), recipient, data);
        sign_transaction(&mut tx, &self.inner.wallet);

        let line = Envelope::transaction(&tx)?.encode()?;
        ctx.mempool.submit(tx.clone())?;
        let reached = ctx.peers.broadcast(&line, None);
        debug!(node = ctx.port, id = tx.short_id(), reached, "transaction broadcast");
        ctx.events.emit(NodeEvent::TransactionAccepted { id: tx.id.clone() });
        Ok(tx)
    }

    /// Start the miner. `false` if it was already running.
    pub fn start_mining(&self) -> bool {
        self.inner.miner.start(Arc::clone(&self.inner.ctx))
    }

    /// Ask the miner to stop. `false` if it was not running.
    pub fn stop_mining(&self) -> bool {
        self.inner.miner.stop()
    }

    pub fn is_mining(&self) -> bool {
        self.inner.miner.is_running()
    }

    /// Replace the local chain with `blocks` if they form a longer valid
    /// chain. Used when a joining node copies its best neighbour's chain.
    pub fn adopt_chain(&self, blocks: Vec<Block>) -> bool {
        let ctx = &self.inner.ctx;
        let committed: Vec<Transaction> = blocks
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect();
        let length = blocks.len();
        if !ctx.chain.write().replace_chain(blocks) {
            return false;
        }
        ctx.mempool.purge(&committed);
        ctx.events
            .record(format!("Synced longest chain. New length: {length}"));
        ctx.announce_chain(ChainUpdate::Replaced);
        true
    }

    /// Stop the miner, the accept loop and every session.
    pub fn shutdown(&self) {
        self.inner.miner.stop();
        self.inner.shutdown.send_replace(true);
        info!(node = self.inner.ctx.port, "node shut down");
    }

    /// Record an operator-facing line in the node history.
    pub fn record(&self, line: impl Into<String>) {
        self.inner.ctx.events.record(line);
    }

    // -- queries -------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        NodeId(self.local_addr().map_or(self.inner.ctx.port, |a| a.port()))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn public_key(&self) -> &str {
        self.inner.wallet.public_key_base64()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.ctx.config
    }

    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.inner.ctx.chain.read().blocks().to_vec()
    }

    pub fn block(&self, number: u64) -> Option<Block> {
        self.inner.ctx.chain.read().get(number).cloned()
    }

    pub fn last_block(&self) -> Block {
        self.inner.ctx.chain.read().last_block().clone()
    }

    pub fn height(&self) -> u64 {
        self.inner.ctx.chain.read().height()
    }

    pub fn chain_len(&self) -> usize {
        self.inner.ctx.chain.read().len()
    }

    pub fn history(&self) -> Vec<String> {
        self.inner.ctx.events.history()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.ctx.events.subscribe()
    }

    pub fn mempool_len(&self) -> usize {
        self.inner.ctx.mempool.len()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.ctx.mempool.pending()
    }

    pub fn peer_count(&self) -> usize {
        self.inner.ctx.peers.len()
    }

    pub fn miner(&self) -> &Miner {
        &self.inner.miner
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let (height, chain_length, tip, difficulty) = {
            let chain = self.inner.ctx.chain.read();
            (
                chain.height(),
                chain.len(),
                chain.last_block().hash.clone(),
                chain.difficulty(),
            )
        };
        NodeSnapshot {
            id: self.id(),
            address: self.local_addr(),
            public_key: self.public_key().to_owned(),
            height,
            chain_length,
            tip,
            difficulty,
            mempool_size: self.mempool_len(),
            peers: self.peer_count(),
            mining: self.is_mining(),
        }
    }

    pub(crate) fn context(&self) -> &Arc<NodeContext> {
        &self.inner.ctx
    }
}

//! Proof-of-work mining loop.
//!
//! ```text
//! Idle ──start──▶ Mining ──stop──▶ Idle
//!                   │
//!                   ▼
//!     ┌──▶ assemble candidate at height H+1
//!     │         │
//!     │         ▼
//!     │     Searching ──tip reached H+1──▶ Preempted ─┐
//!     │         │                                     │
//!     │      hash ok                                  │
//!     │         ▼                                     │
//!     │   add_block ─ok─▶ broadcast, "MINED"          │
//!     │         └─lost race─▶ discard                 │
//!     └──────────── sleep(interval) ◀─────────────────┘
//! ```
//!
//! The loop runs on its own OS thread: the nonce search is CPU-bound and
//! must not starve the async runtime that serves peer sessions. Stopping is
//! cooperative through an `AtomicBool`, polled at every nonce and at every
//! iteration boundary.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::events::ChainUpdate;
use super::message::Envelope;
use super::node::NodeContext;
use crate::storage::{Block, BlockHeader};
use crate::transaction::Transaction;

/// Search nonces upward from `header.nonce` until the header hash starts
/// with `target`.
///
/// `keep_going` is consulted before every hash; returning `false` abandons
/// the search and yields `None`.
pub fn mine_block(
    mut header: BlockHeader,
    target: &str,
    mut keep_going: impl FnMut() -> bool,
) -> Option<BlockHeader> {
    loop {
        if !keep_going() {
            return None;
        }
        if header.calculate_hash().starts_with(target) {
            return Some(header);
        }
        header.nonce = header.nonce.wrapping_add(1);
    }
}

/// Result of one pass through the mining state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    /// Our block was appended and broadcast.
    Mined(Block),
    /// We found a solution but the tip had already moved.
    Discarded { number: u64 },
    /// A peer's block reached our target height first.
    Preempted { number: u64 },
    /// The stop flag was cleared mid-search.
    Stopped,
}

/// Handle to a node's mining thread. At most one is active at a time.
#[derive(Debug, Default)]
pub struct Miner {
    /// Stop flag of the current run. Each start gets a fresh flag so a
    /// thread that is still winding down can never be revived.
    active: Mutex<Option<Arc<AtomicBool>>>,
    /// Every thread not yet joined, including stopped ones still winding down.
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Miner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Spawn the mining thread. Returns `false` if one is already running.
    pub(crate) fn start(&self, ctx: Arc<NodeContext>) -> bool {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
        {
            ctx.events.record("Miner is already running.");
            return false;
        }

        let flag = Arc::new(AtomicBool::new(true));
        let thread_flag = Arc::clone(&flag);
        let thread_ctx = Arc::clone(&ctx);
        ctx.events.record("Miner Started.");
        let spawned = thread::Builder::new()
            .name(format!("miner-{}", ctx.port))
            .spawn(move || run(&thread_ctx, &thread_flag));

        match spawned {
            Ok(handle) => {
                *active = Some(flag);
                let mut handles = self.handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                true
            }
            Err(e) => {
                warn!(node = ctx.port, error = %e, "failed to spawn miner thread");
                ctx.events.record("Miner Stopped.");
                false
            }
        }
    }

    /// Clear the stop flag. Returns `false` if nothing was running.
    ///
    /// The thread exits at its next check; use [`Miner::join`] to wait.
    pub fn stop(&self) -> bool {
        match self.active.lock().take() {
            Some(flag) => flag.swap(false, Ordering::AcqRel),
            None => false,
        }
    }

    /// Block until every spawned thread has exited.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("miner thread panicked");
            }
        }
    }
}

fn run(ctx: &NodeContext, active: &AtomicBool) {
    let interval = ctx.config.mining_interval();
    while active.load(Ordering::Acquire) {
        attempt(ctx, active);
        sleep_unless_stopped(active, interval);
    }
    ctx.events.record("Miner Stopped.");
}

fn sleep_unless_stopped(active: &AtomicBool, interval: Duration) {
    if active.load(Ordering::Acquire) {
        thread::sleep(interval);
    }
}

/// One pass: assemble a candidate on the current tip and search for it.
pub(crate) fn attempt(ctx: &NodeContext, active: &AtomicBool) -> MiningOutcome {
    attempt_with(ctx, active, |header, target, keep_going| {
        mine_block(header, target, keep_going)
    })
}

/// [`attempt`] with the nonce search supplied by the caller.
pub(crate) fn attempt_with<S>(ctx: &NodeContext, active: &AtomicBool, search: S) -> MiningOutcome
where
    S: FnOnce(BlockHeader, &str, &mut dyn FnMut() -> bool) -> Option<BlockHeader>,
{
    let (parent, target) = {
        let chain = ctx.chain.read();
        (chain.last_block().clone(), chain.difficulty_target().to_owned())
    };
    let transactions = ctx.mempool.drain_up_to(ctx.config.mining_batch_size);
    let header = BlockHeader::successor(&parent, &transactions, ctx.config.difficulty);
    let number = header.number;

    let mut keep_going =
        || active.load(Ordering::Relaxed) && ctx.chain.read().height() < number;
    let solved = search(header, &target, &mut keep_going);

    let Some(header) = solved else {
        requeue(ctx, transactions);
        if active.load(Ordering::Relaxed) {
            debug!(node = ctx.port, number, "preempted by peer block");
            return MiningOutcome::Preempted { number };
        }
        return MiningOutcome::Stopped;
    };

    let block = Block::new(header, transactions);
    let accepted = ctx.chain.write().add_block(block.clone());
    if !accepted {
        ctx.events.record(format!("Discarded own Block #{number}"));
        requeue(ctx, block.transactions);
        return MiningOutcome::Discarded { number };
    }

    info!(node = ctx.port, number, hash = %block.short_hash(), txs = block.tx_count(), "block mined");
    ctx.events.record(format!("MINED Block #{number}"));
    match Envelope::block(&block).and_then(|e| e.encode()) {
        Ok(line) => {
            ctx.peers.broadcast(&line, None);
        }
        Err(e) => warn!(error = %e, "failed to encode mined block"),
    }
    ctx.announce_chain(ChainUpdate::Mined);
    MiningOutcome::Mined(block)
}

/// Put drained transactions back unless the current chain already commits
/// them.
///
/// The whole chain is scanned: a replacement adopted mid-search may commit
/// a drained transaction below the candidate height, and the session's
/// purge never saw it because the miner was holding it.
fn requeue(ctx: &NodeContext, transactions: Vec<Transaction>) {
    if transactions.is_empty() {
        return;
    }
    let committed: HashSet<String> = {
        let chain = ctx.chain.read();
        chain
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id.clone()))
            .collect()
    };
    for tx in transactions {
        if !committed.contains(&tx.id) {
            let _ = ctx.mempool.submit(tx);
        }
    }
}

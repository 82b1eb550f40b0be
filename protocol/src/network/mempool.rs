//! Deduplicated staging pool for pending transactions.
//!
//! Thread-safe pool shared by every peer session (inserts from `TX`
//! messages, purges after accepted blocks) and the miner (drains). Callers
//! never hold an external lock.
//!
//! ## Design
//!
//! - `DashMap` keyed by transaction id gives concurrent duplicate detection
//!   and O(1) removal.
//! - A `parking_lot::Mutex<BTreeMap>` keyed by an arrival sequence number
//!   lets the miner drain oldest first.
//! - A DashMap guard is never held while the arrival index is locked, so the
//!   two locks cannot be taken in opposite orders.
//! - Draining removes entries from the map, so a transaction is handed to
//!   at most one caller. The index may briefly point at ids that were purged
//!   in between; drain skips them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DEFAULT_MEMPOOL_SIZE;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for mempool behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of transactions the pool will hold.
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MEMPOOL_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// MempoolError
// ---------------------------------------------------------------------------

/// Why a transaction was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MempoolError {
    /// A transaction with the same id is already pending.
    #[error("transaction {id} is already pending")]
    Duplicate { id: String },

    /// The pool is at capacity.
    #[error("mempool is full ({capacity} transactions)")]
    Full { capacity: usize },
}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

struct MempoolEntry {
    transaction: Transaction,
    seq: u64,
}

/// A thread-safe, deduplicating transaction pool.
pub struct Mempool {
    /// Pending transactions by id.
    transactions: DashMap<String, MempoolEntry>,
    /// Arrival order: sequence number to id.
    arrival: Mutex<BTreeMap<u64, String>>,
    next_seq: AtomicU64,
    config: MempoolConfig,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("size", &self.transactions.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            transactions: DashMap::new(),
            arrival: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    /// Admit a transaction unless its id is already pending or the pool is
    /// full. Signature checks are the caller's job.
    pub fn submit(&self, tx: Transaction) -> Result<(), MempoolError> {
        if self.transactions.contains_key(&tx.id) {
            return Err(MempoolError::Duplicate { id: tx.id });
        }
        // Checked before taking the entry guard: `len` reads every shard.
        if self.transactions.len() >= self.config.max_size {
            return Err(MempoolError::Full {
                capacity: self.config.max_size,
            });
        }

        let id = tx.id.clone();
        let seq = match self.transactions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(MempoolError::Duplicate { id }),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(MempoolEntry {
                    transaction: tx,
                    seq,
                });
                seq
            }
        };

        self.arrival.lock().insert(seq, id);
        Ok(())
    }

    /// Remove and return up to `max` pending transactions, oldest first.
    pub fn drain_up_to(&self, max: usize) -> Vec<Transaction> {
        let mut drained = Vec::with_capacity(max.min(self.transactions.len()));
        while drained.len() < max {
            let next = self.arrival.lock().pop_first();
            let Some((_, id)) = next else {
                break;
            };
            if let Some((_, entry)) = self.transactions.remove(&id) {
                drained.push(entry.transaction);
            }
        }
        drained
    }

    /// Drop every pending transaction whose id appears in `committed`.
    /// Returns how many were removed.
    pub fn purge(&self, committed: &[Transaction]) -> usize {
        let mut removed = 0;
        for tx in committed {
            if let Some((_, entry)) = self.transactions.remove(&tx.id) {
                self.arrival.lock().remove(&entry.seq);
                removed += 1;
            }
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Snapshot of the pending transactions in arrival order.
    pub fn pending(&self) -> Vec<Transaction> {
        let mut entries: Vec<(u64, Transaction)> = self
            .transactions
            .iter()
            .map(|e| (e.value().seq, e.value().transaction.clone()))
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, tx)| tx).collect()
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn tx(n: u64) -> Transaction {
        Transaction::with_timestamp("PUB", "bob", "payload", n)
    }

    // -- Submit / contains ---------------------------------------------------

    #[test]
    fn submit_and_contains() {
        let pool = Mempool::default();
        let t = tx(1);
        pool.submit(t.clone()).unwrap();
        assert!(pool.contains(&t.id));
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_empty());
    }

    #[test]
    fn duplicate_is_rejected_and_size_unchanged() {
        let pool = Mempool::default();
        pool.submit(tx(1)).unwrap();
        let err = pool.submit(tx(1)).unwrap_err();
        assert!(matches!(err, MempoolError::Duplicate { .. }));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn full_pool_rejects() {
        let pool = Mempool::new(MempoolConfig { max_size: 2 });
        pool.submit(tx(1)).unwrap();
        pool.submit(tx(2)).unwrap();
        assert_eq!(
            pool.submit(tx(3)),
            Err(MempoolError::Full { capacity: 2 })
        );
        assert_eq!(pool.len(), 2);
    }

    // -- Drain ---------------------------------------------------------------

    #[test]
    fn drain_returns_oldest_first_and_removes() {
        let pool = Mempool::default();
        for n in 1..=5 {
            pool.submit(tx(n)).unwrap();
        }

        let first = pool.drain_up_to(3);
        assert_eq!(first, vec![tx(1), tx(2), tx(3)]);
        assert_eq!(pool.len(), 2);

        let rest = pool.drain_up_to(10);
        assert_eq!(rest, vec![tx(4), tx(5)]);
        assert!(pool.is_empty());
        assert!(pool.drain_up_to(10).is_empty());
    }

    #[test]
    fn drain_skips_purged_entries() {
        let pool = Mempool::default();
        for n in 1..=3 {
            pool.submit(tx(n)).unwrap();
        }
        pool.purge(&[tx(1)]);
        assert_eq!(pool.drain_up_to(2), vec![tx(2), tx(3)]);
    }

    #[test]
    fn drained_transaction_can_be_resubmitted() {
        let pool = Mempool::default();
        pool.submit(tx(1)).unwrap();
        let drained = pool.drain_up_to(1);
        pool.submit(drained[0].clone()).unwrap();
        assert_eq!(pool.len(), 1);
    }

    // -- Purge ---------------------------------------------------------------

    #[test]
    fn purge_removes_exactly_matching_ids() {
        let pool = Mempool::default();
        for n in 1..=4 {
            pool.submit(tx(n)).unwrap();
        }
        let removed = pool.purge(&[tx(2), tx(4), tx(99)]);
        assert_eq!(removed, 2);
        assert_eq!(pool.pending(), vec![tx(1), tx(3)]);
    }

    #[test]
    fn pending_is_in_arrival_order() {
        let pool = Mempool::default();
        for n in [5, 3, 9] {
            pool.submit(tx(n)).unwrap();
        }
        assert_eq!(pool.pending(), vec![tx(5), tx(3), tx(9)]);
    }

    // -- Concurrency ---------------------------------------------------------

    #[test]
    fn concurrent_drains_never_share_a_transaction() {
        let pool = Arc::new(Mempool::default());
        for n in 0..400 {
            pool.submit(tx(n)).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    loop {
                        let batch = pool.drain_up_to(7);
                        if batch.is_empty() {
                            break mine;
                        }
                        mine.extend(batch);
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for t in handle.join().unwrap() {
                total += 1;
                assert!(seen.insert(t.id), "transaction drained twice");
            }
        }
        assert_eq!(total, 400);
    }

    #[test]
    fn concurrent_duplicate_submits_admit_one() {
        let pool = Arc::new(Mempool::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.submit(tx(42)).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(pool.len(), 1);
    }
}

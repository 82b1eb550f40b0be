//! Registry of open peer channels and flood broadcast.
//!
//! Each connection, inbound or outbound, registers the sending half of an
//! unbounded channel. Its writer task owns the socket and drains the
//! channel, so a broadcast never blocks on a slow peer and may be called
//! from async tasks and from the miner thread alike.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// Locally unique identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// The set of currently open outbound channels.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    channels: DashMap<PeerId, UnboundedSender<String>>,
    next_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel and hand back the id it is known by.
    pub fn register(&self, sender: UnboundedSender<String>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.channels.insert(id, sender);
        id
    }

    /// Remove a channel. Returns whether it was still registered.
    pub fn unregister(&self, id: PeerId) -> bool {
        self.channels.remove(&id).is_some()
    }

    /// Queue one message for a single peer. A closed channel is pruned.
    pub fn send_to(&self, id: PeerId, line: &str) -> bool {
        let delivered = match self.channels.get(&id) {
            Some(sender) => sender.send(line.to_owned()).is_ok(),
            None => return false,
        };
        if !delivered {
            self.channels.remove(&id);
        }
        delivered
    }

    /// Queue `line` for every peer except `exclude`.
    ///
    /// Works on a snapshot of the membership, so connects and disconnects
    /// racing with the broadcast are harmless. Channels whose receiver is
    /// gone are pruned; delivery to the others continues. Returns the
    /// number of peers the line was queued for.
    pub fn broadcast(&self, line: &str, exclude: Option<PeerId>) -> usize {
        let targets: Vec<(PeerId, UnboundedSender<String>)> = self
            .channels
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in targets {
            if sender.send(line.to_owned()).is_ok() {
                delivered += 1;
            } else {
                trace!(peer = %id, "pruning closed channel");
                self.channels.remove(&id);
            }
        }
        trace!(delivered, "broadcast");
        delivered
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.channels.iter().map(|entry| *entry.key()).collect()
    }
}

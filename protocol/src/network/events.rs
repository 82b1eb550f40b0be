//! Node notifications: a bounded history ring plus a fan-out event channel.
//!
//! Observers either poll [`EventLog::history`] or hold a
//! [`broadcast::Receiver`] from [`EventLog::subscribe`]. Any number of
//! subscribers may exist, including none. A subscriber that falls behind by
//! more than the channel capacity sees `RecvError::Lagged` and resumes from
//! the oldest retained event.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

/// Something observable happened on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A line was appended to the node history.
    History { line: String },
    /// The local chain was extended or replaced.
    ChainUpdated {
        height: u64,
        tip: String,
        cause: ChainUpdate,
    },
    /// A transaction entered the mempool.
    TransactionAccepted { id: String },
}

/// How the tip moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainUpdate {
    /// This node mined the new tip.
    Mined,
    /// A peer's block extended the tip.
    Received,
    /// A longer chain replaced ours wholesale.
    Replaced,
}

/// History ring and event channel of one node.
#[derive(Debug)]
pub struct EventLog {
    node: u16,
    capacity: usize,
    history: Mutex<VecDeque<String>>,
    sender: broadcast::Sender<NodeEvent>,
}

impl EventLog {
    pub fn new(node: u16, history_capacity: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            node,
            capacity: history_capacity,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            sender,
        }
    }

    /// Append a history line, evicting the oldest beyond capacity.
    pub fn record(&self, line: impl Into<String>) {
        let line = line.into();
        info!(node = self.node, "{line}");
        {
            let mut history = self.history.lock();
            history.push_back(line.clone());
            while history.len() > self.capacity {
                history.pop_front();
            }
        }
        self.emit(NodeEvent::History { line });
    }

    /// Publish an event to current subscribers. Having none is fine.
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

//! Registry of the nodes running in one process.
//!
//! Used by the simulation to keep handles to every node, remember who dialed
//! whom, and pick peers for a joining node. Links are undirected: a TCP
//! connection carries traffic both ways.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::node::Node;

/// A node's identity inside a directory: its listening port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct NodeDirectory {
    nodes: DashMap<NodeId, Node>,
    adjacency: DashMap<NodeId, BTreeSet<NodeId>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under its own id. Replaces any previous entry.
    pub fn insert(&self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        self.adjacency.entry(id).or_default();
        id
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).map(|entry| entry.value().clone())
    }

    /// Forget a node and every link touching it.
    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let removed = self.nodes.remove(&id).map(|(_, node)| node);
        if let Some((_, links)) = self.adjacency.remove(&id) {
            for other in links {
                if let Some(mut set) = self.adjacency.get_mut(&other) {
                    set.remove(&id);
                }
            }
        }
        removed
    }

    /// Record a link between two known nodes. `false` for self-links,
    /// unknown ids and links that already exist.
    pub fn connect(&self, a: NodeId, b: NodeId) -> bool {
        if a == b || !self.nodes.contains_key(&a) || !self.nodes.contains_key(&b) {
            return false;
        }
        let added = self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
        added
    }

    /// Dial `b` from `a` and record the link if the dial succeeded.
    pub async fn dial(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return false;
        }
        let (Some(from), Some(addr)) = (self.get(a), self.address(b)) else {
            return false;
        };
        from.connect(addr).await && self.connect(a, b)
    }

    pub fn neighbours(&self, id: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Every link once, lower id first.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> = self
            .adjacency
            .iter()
            .flat_map(|entry| {
                let a = *entry.key();
                entry
                    .value()
                    .iter()
                    .filter(move |&&b| a < b)
                    .map(move |&b| (a, b))
                    .collect::<Vec<_>>()
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn address(&self, id: NodeId) -> Option<SocketAddr> {
        self.nodes.get(&id).and_then(|entry| entry.value().local_addr())
    }

    /// Up to `count` distinct nodes other than `id` and not yet linked to it.
    pub fn pick_peers<R: Rng + ?Sized>(&self, id: NodeId, count: usize, rng: &mut R) -> Vec<NodeId> {
        let linked: BTreeSet<NodeId> = self.neighbours(id).into_iter().collect();
        let candidates: Vec<NodeId> = self
            .ids()
            .into_iter()
            .filter(|other| *other != id && !linked.contains(other))
            .collect();
        candidates.choose_multiple(rng, count).copied().collect()
    }

    /// The neighbour of `id` holding the longest chain, if any neighbour's
    /// chain is longer than the one `id` holds.
    pub fn longest_chain_neighbour(&self, id: NodeId) -> Option<Node> {
        let own = self.get(id)?.chain_len();
        self.neighbours(id)
            .into_iter()
            .filter_map(|n| self.get(n))
            .max_by_key(Node::chain_len)
            .filter(|best| best.chain_len() > own)
    }
}

//! # Prometheus Metrics
//!
//! Operational metrics for one node, served at `/metrics`. Counters follow
//! the node's event stream; the gauges that have no event (mempool size,
//! peer count) are sampled on a timer.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the `ember`
//! prefix so they never collide with the default global registry.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use ember_protocol::network::{ChainUpdate, Node, NodeEvent};

/// How often the collector samples mempool and peer gauges.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Metric handles of one node. Cheap to clone.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub chain_height: IntGauge,
    pub blocks_mined_total: IntCounter,
    pub blocks_accepted_total: IntCounter,
    pub chain_replacements_total: IntCounter,
    pub transactions_accepted_total: IntCounter,
    pub mempool_size: IntGauge,
    pub connected_peers: IntGauge,
}

impl NodeMetrics {
    /// Create and register every metric.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ember".into()), None)?;

        let chain_height = IntGauge::new("chain_height", "Number of the current tip block")?;
        registry.register(Box::new(chain_height.clone()))?;

        let blocks_mined_total =
            IntCounter::new("blocks_mined_total", "Blocks mined by this node")?;
        registry.register(Box::new(blocks_mined_total.clone()))?;

        let blocks_accepted_total = IntCounter::new(
            "blocks_accepted_total",
            "Blocks received from peers and appended to the tip",
        )?;
        registry.register(Box::new(blocks_accepted_total.clone()))?;

        let chain_replacements_total = IntCounter::new(
            "chain_replacements_total",
            "Times the local chain was replaced by a longer one",
        )?;
        registry.register(Box::new(chain_replacements_total.clone()))?;

        let transactions_accepted_total = IntCounter::new(
            "transactions_accepted_total",
            "Transactions admitted to the mempool",
        )?;
        registry.register(Box::new(transactions_accepted_total.clone()))?;

        let mempool_size = IntGauge::new("mempool_size", "Pending transactions in the mempool")?;
        registry.register(Box::new(mempool_size.clone()))?;

        let connected_peers = IntGauge::new("connected_peers", "Open peer connections")?;
        registry.register(Box::new(connected_peers.clone()))?;

        Ok(Self {
            registry,
            chain_height,
            blocks_mined_total,
            blocks_accepted_total,
            chain_replacements_total,
            transactions_accepted_total,
            mempool_size,
            connected_peers,
        })
    }

    /// Fold one node event into the counters.
    pub fn observe(&self, event: &NodeEvent) {
        match event {
            NodeEvent::ChainUpdated { height, cause, .. } => {
                self.chain_height.set(i64::try_from(*height).unwrap_or(i64::MAX));
                match cause {
                    ChainUpdate::Mined => self.blocks_mined_total.inc(),
                    ChainUpdate::Received => self.blocks_accepted_total.inc(),
                    ChainUpdate::Replaced => self.chain_replacements_total.inc(),
                }
            }
            NodeEvent::TransactionAccepted { .. } => self.transactions_accepted_total.inc(),
            NodeEvent::History { .. } => {}
        }
    }

    /// Refresh the gauges that have no event of their own.
    pub fn sample(&self, node: &Node) {
        self.mempool_size.set(node.mempool_len() as i64);
        self.connected_peers.set(node.peer_count() as i64);
        self.chain_height
            .set(i64::try_from(node.height()).unwrap_or(i64::MAX));
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Keep `metrics` in step with `node`. Runs until aborted.
pub fn spawn_collector(metrics: SharedMetrics, node: Node) -> JoinHandle<()> {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => metrics.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "metrics collector lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => metrics.sample(&node),
            }
        }
    })
}

/// `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_updated(height: u64, cause: ChainUpdate) -> NodeEvent {
        NodeEvent::ChainUpdated {
            height,
            tip: "00ab".into(),
            cause,
        }
    }

    #[test]
    fn events_drive_counters() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe(&chain_updated(1, ChainUpdate::Mined));
        metrics.observe(&chain_updated(2, ChainUpdate::Received));
        metrics.observe(&chain_updated(5, ChainUpdate::Replaced));
        metrics.observe(&NodeEvent::TransactionAccepted { id: "t".into() });
        metrics.observe(&NodeEvent::History { line: "x".into() });

        assert_eq!(metrics.blocks_mined_total.get(), 1);
        assert_eq!(metrics.blocks_accepted_total.get(), 1);
        assert_eq!(metrics.chain_replacements_total.get(), 1);
        assert_eq!(metrics.transactions_accepted_total.get(), 1);
        assert_eq!(metrics.chain_height.get(), 5);
    }

    #[test]
    fn encoded_names_carry_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.blocks_mined_total.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("ember_blocks_mined_total 1"));
        assert!(text.contains("ember_mempool_size"));
        assert!(text.contains("ember_connected_peers"));
    }

    #[test]
    fn sample_reads_node_state() {
        let node = Node::new(ember_protocol::config::NodeConfig {
            difficulty: 1,
            ..Default::default()
        });
        node.submit_transaction("bob", "x").unwrap();

        let metrics = NodeMetrics::new().unwrap();
        metrics.sample(&node);
        assert_eq!(metrics.mempool_size.get(), 1);
        assert_eq!(metrics.connected_peers.get(), 0);
        assert_eq!(metrics.chain_height.get(), 0);
    }
}

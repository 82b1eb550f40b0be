//! # CLI Interface
//!
//! Command-line surface of `ember-node`, built with `clap` derive. Four
//! subcommands: `run`, `simulate`, `keygen` and `version`. Every `run` and
//! `simulate` option can also come from an `EMBER_*` environment variable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Parser, Subcommand};

use ember_protocol::config::{
    NodeConfig, DEFAULT_DIFFICULTY, DEFAULT_P2P_PORT, DEFAULT_SIMULATION_NODES,
    INITIAL_CONNECTIONS,
};

use crate::logging::LogFormat;

/// Ember proof-of-work node.
///
/// Runs a single peer, or a whole simulated network inside one process, and
/// serves a small HTTP API plus Prometheus metrics next to it.
#[derive(Parser, Debug)]
#[command(
    name = "ember-node",
    about = "Ember proof-of-work node",
    version,
    propagate_version = true
)]
pub struct EmberNodeCli {
    /// Log output format: `pretty` or `json`.
    #[arg(long, global = true, env = "EMBER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl EmberNodeCli {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.log_format)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start one node.
    Run(RunArgs),
    /// Start a network of nodes inside this process.
    Simulate(SimulateArgs),
    /// Print a fresh keypair and exit.
    Keygen,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address the peer listener binds to.
    #[arg(long, env = "EMBER_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port for peer connections.
    #[arg(long, short = 'p', env = "EMBER_P2P_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub p2p_port: u16,

    /// Peer to dial at startup. Repeatable, or comma-separated in the env var.
    #[arg(long = "peer", env = "EMBER_PEERS", value_delimiter = ',')]
    pub peers: Vec<SocketAddr>,

    /// Leading zero hex characters required in a block hash.
    #[arg(long, env = "EMBER_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Start mining immediately.
    #[arg(long, env = "EMBER_MINE")]
    pub mine: bool,

    /// Port for the HTTP/WS API. 0 disables it.
    #[arg(long, env = "EMBER_API_PORT", default_value_t = 9080)]
    pub api_port: u16,

    /// Port for the Prometheus endpoint. 0 disables it.
    #[arg(long, env = "EMBER_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Hex-encoded 32-byte P-256 secret key. A fresh key is generated when
    /// omitted.
    #[arg(long, env = "EMBER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Do not ask dialed peers for their chain.
    #[arg(long, env = "EMBER_NO_SYNC")]
    pub no_sync: bool,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    pub no_console: bool,
}

impl RunArgs {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen_addr: SocketAddr::new(self.bind, self.p2p_port),
            peers: self.peers.clone(),
            difficulty: self.difficulty,
            sync_on_connect: !self.no_sync,
            ..NodeConfig::default()
        }
    }
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Number of nodes to start.
    #[arg(long, short = 'n', env = "EMBER_SIM_NODES", default_value_t = DEFAULT_SIMULATION_NODES)]
    pub nodes: usize,

    /// Port of the first node; the others count upwards.
    #[arg(long, env = "EMBER_SIM_BASE_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub base_port: u16,

    /// Random peers each node dials.
    #[arg(long, env = "EMBER_SIM_CONNECTIONS", default_value_t = INITIAL_CONNECTIONS)]
    pub connections: usize,

    /// How many of the first nodes start mining.
    #[arg(long, env = "EMBER_SIM_MINERS", default_value_t = 1)]
    pub miners: usize,

    /// Leading zero hex characters required in a block hash.
    #[arg(long, env = "EMBER_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Seconds between status lines.
    #[arg(long, env = "EMBER_SIM_STATUS_SECS", default_value_t = 10)]
    pub status_interval: u64,

    /// Port for an HTTP/WS API bound to the first node. 0 disables it.
    #[arg(long, env = "EMBER_API_PORT", default_value_t = 0)]
    pub api_port: u16,
}

impl SimulateArgs {
    /// Configuration of the `index`-th simulated node.
    pub fn node_config(&self, index: usize) -> Option<NodeConfig> {
        let offset = u16::try_from(index).ok()?;
        let port = self.base_port.checked_add(offset)?;
        Some(NodeConfig {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            difficulty: self.difficulty,
            ..NodeConfig::default()
        })
    }
}

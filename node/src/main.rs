// Copyright (c) 2026 Ember Contributors. MIT License.
// See LICENSE for details.

//! # Ember Node
//!
//! Entry point for the `ember-node` binary. Parses CLI arguments, installs
//! logging, then runs one of:
//!
//! - `run`     : a single node with API, metrics and an stdin console
//! - `simulate`: a whole network of nodes inside this process
//! - `keygen`  : print a fresh keypair
//! - `version` : print build version information

mod api;
mod cli;
mod console;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use ember_protocol::crypto::Wallet;
use ember_protocol::network::{Node, NodeDirectory, NodeId};

use cli::{Commands, EmberNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EmberNodeCli::parse();

    match cli.command {
        Commands::Run(ref args) => {
            logging::init_logging(logging::DEFAULT_FILTER, cli.log_format());
            run_node(args).await
        }
        Commands::Simulate(ref args) => {
            logging::init_logging(logging::DEFAULT_FILTER, cli.log_format());
            simulate(args).await
        }
        Commands::Keygen => {
            keygen();
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Start one node and keep it up until Ctrl+C, SIGTERM or `quit`.
async fn run_node(args: &cli::RunArgs) -> Result<()> {
    let config = args.node_config();
    let wallet = match &args.secret_key {
        Some(secret) => {
            let bytes = hex::decode(secret.trim()).context("secret key is not valid hex")?;
            Wallet::from_secret_bytes(&bytes).context("secret key is not a P-256 scalar")?
        }
        None => Wallet::generate(),
    };
    let peers = config.peers.clone();
    let node = Node::with_wallet(config, wallet);

    let p2p_addr = node
        .listen()
        .await
        .with_context(|| format!("failed to bind peer listener on port {}", args.p2p_port))?;
    let connected = node.connect_all(&peers).await;
    tracing::info!(
        %p2p_addr,
        public_key = node.public_key(),
        connected,
        dialed = peers.len(),
        "ember-node started"
    );

    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let collector = metrics::spawn_collector(Arc::clone(&node_metrics), node.clone());

    let mut servers = tokio::task::JoinSet::new();
    if args.api_port != 0 {
        let router = api::create_router(api::AppState {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            node: node.clone(),
        });
        let addr = SocketAddr::new(args.bind, args.api_port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind API listener on {addr}"))?;
        tracing::info!(%addr, "API server listening");
        servers.spawn(async move { axum::serve(listener, router).await });
    }
    if args.metrics_port != 0 {
        let router = axum::Router::new()
            .route("/metrics", axum::routing::get(metrics::metrics_handler))
            .with_state(Arc::clone(&node_metrics));
        let addr = SocketAddr::new(args.bind, args.metrics_port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
        tracing::info!(%addr, "metrics server listening");
        servers.spawn(async move { axum::serve(listener, router).await });
    }

    if args.mine {
        node.start_mining();
    }

    let console = async {
        if args.no_console {
            std::future::pending::<()>().await;
        } else {
            console::run(node.clone()).await;
        }
    };

    tokio::select! {
        Some(res) = servers.join_next() => match res {
            Ok(Err(e)) => tracing::error!(error = %e, "server error"),
            Err(e) => tracing::error!(error = %e, "server task failed"),
            Ok(Ok(())) => {}
        },
        _ = console => tracing::info!("console quit"),
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    node.shutdown();
    servers.abort_all();
    collector.abort();
    let miner = node.clone();
    tokio::task::spawn_blocking(move || miner.miner().join())
        .await
        .context("miner thread join failed")?;
    tracing::info!(height = node.height(), "ember-node stopped");
    Ok(())
}

/// Run `args.nodes` nodes on consecutive ports, wire them up at random and
/// let the first `args.miners` of them mine.
async fn simulate(args: &cli::SimulateArgs) -> Result<()> {
    let directory = Arc::new(NodeDirectory::new());

    for index in 0..args.nodes {
        let config = args
            .node_config(index)
            .with_context(|| format!("port range exhausted at node {index}"))?;
        let node = Node::new(config);
        node.listen()
            .await
            .with_context(|| format!("failed to bind node {index}"))?;
        directory.insert(node);
    }
    tracing::info!(nodes = directory.len(), "simulated nodes listening");

    let ids = directory.ids();
    let dials = ids.iter().flat_map(|&id| {
        directory
            .pick_peers(id, args.connections, &mut rand::thread_rng())
            .into_iter()
            .map(move |peer| (id, peer))
    });
    let dials: Vec<(NodeId, NodeId)> = dials.collect();
    let results = futures::future::join_all(
        dials
            .iter()
            .map(|&(from, to)| directory.dial(from, to)),
    )
    .await;
    let linked = results.into_iter().filter(|ok| *ok).count();
    tracing::info!(links = linked, attempted = dials.len(), "topology ready");

    for id in ids.iter().take(args.miners) {
        if let Some(node) = directory.get(*id) {
            node.start_mining();
        }
    }

    let mut api_server = None;
    if args.api_port != 0 {
        if let Some(first) = ids.first().and_then(|id| directory.get(*id)) {
            let router = api::create_router(api::AppState {
                version: env!("CARGO_PKG_VERSION").to_owned(),
                node: first,
            });
            let addr = SocketAddr::from(([127, 0, 0, 1], args.api_port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind API listener on {addr}"))?;
            tracing::info!(%addr, "API server listening");
            api_server = Some(tokio::spawn(async move { axum::serve(listener, router).await }));
        }
    }

    let status_directory = Arc::clone(&directory);
    let period = Duration::from_secs(args.status_interval.max(1));
    let status_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            log_network_status(&status_directory);
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    status_loop.abort();
    if let Some(server) = api_server {
        server.abort();
    }
    for id in directory.ids() {
        if let Some(node) = directory.get(id) {
            node.shutdown();
        }
    }
    log_network_status(&directory);
    Ok(())
}

fn log_network_status(directory: &NodeDirectory) {
    let nodes: Vec<Node> = directory
        .ids()
        .into_iter()
        .filter_map(|id| directory.get(id))
        .collect();
    let heights: Vec<u64> = nodes.iter().map(Node::height).collect();
    let (Some(min), Some(max)) = (heights.iter().min(), heights.iter().max()) else {
        return;
    };
    let mut tips: Vec<String> = nodes.iter().map(|n| n.last_block().hash).collect();
    tips.sort_unstable();
    tips.dedup();
    let pending: usize = nodes.iter().map(Node::mempool_len).sum();

    tracing::info!(
        nodes = nodes.len(),
        min_height = min,
        max_height = max,
        distinct_tips = tips.len(),
        pending,
        "network status"
    );
}

/// Print a fresh keypair on stdout.
fn keygen() {
    let wallet = Wallet::generate();
    println!("public key : {}", wallet.public_key_base64());
    println!("secret key : {}", hex::encode(wallet.secret_key_bytes()));
}

fn print_version() {
    println!("ember-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc      {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM. Only Ctrl+C outside Unix.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! # Operator Console
//!
//! Line-oriented commands read from stdin while `run` is active. Every
//! command is echoed into the node history as `> command`; failures are
//! reported there too, so they show up in `/history` and on the event
//! stream as well as in the terminal.
//!
//! ```text
//! send <recipient> <data...>   sign and broadcast a transaction
//! mine                         start the miner
//! stop                         stop the miner
//! chain                        list blocks
//! history                      print the history ring
//! peers                        show connection count
//! help                         list commands
//! quit                         shut the node down
//! ```

use tokio::io::{AsyncBufReadExt, BufReader};

use ember_protocol::network::Node;

const USAGE_SEND: &str = "Error: Usage: send <key> <data>";

const HELP: &[&str] = &[
    "send <recipient> <data>  sign and broadcast a transaction",
    "mine                     start mining",
    "stop                     stop mining",
    "chain                    list blocks",
    "history                  show recent history",
    "peers                    show connected peer count",
    "quit                     shut down",
];

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { recipient: String, data: String },
    Mine,
    Stop,
    Chain,
    History,
    Peers,
    Help,
    Quit,
}

impl Command {
    /// Parse one trimmed, non-empty line. The error is the history line to
    /// record.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.splitn(2, char::is_whitespace);
        let verb = words.next().unwrap_or_default().to_lowercase();
        let rest = words.next().unwrap_or_default().trim();

        match verb.as_str() {
            "send" => {
                let (recipient, data) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| USAGE_SEND.to_owned())?;
                let data = data.trim();
                if data.is_empty() {
                    return Err(USAGE_SEND.to_owned());
                }
                Ok(Command::Send {
                    recipient: recipient.to_owned(),
                    data: data.to_owned(),
                })
            }
            "mine" => Ok(Command::Mine),
            "stop" => Ok(Command::Stop),
            "chain" => Ok(Command::Chain),
            "history" => Ok(Command::History),
            "peers" => Ok(Command::Peers),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            _ => Err(format!("Error: Unknown command '{verb}'. Try 'help'.")),
        }
    }
}

/// Result of one console line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Lines to print on stdout.
    pub output: Vec<String>,
    pub quit: bool,
}

/// Run one raw input line against `node`.
pub fn execute(node: &Node, line: &str) -> Reply {
    let line = line.trim();
    if line.is_empty() {
        return Reply::default();
    }
    node.record(format!("> {line}"));

    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(error) => {
            node.record(error);
            return Reply::default();
        }
    };

    let mut reply = Reply::default();
    match command {
        Command::Send { recipient, data } => match node.submit_transaction(recipient, data) {
            Ok(tx) => {
                node.record("Transaction broadcast initiated.");
                reply.output.push(format!("tx {}", tx.short_id()));
            }
            Err(e) => node.record(format!("Error: {e}")),
        },
        Command::Mine => {
            node.start_mining();
        }
        Command::Stop => {
            if !node.stop_mining() {
                node.record("Miner is not running.");
            }
        }
        Command::Chain => {
            reply.output = node
                .chain_snapshot()
                .iter()
                .map(|block| {
                    format!(
                        "#{:<5} {}  txs={}",
                        block.number(),
                        block.short_hash(),
                        block.tx_count()
                    )
                })
                .collect();
        }
        Command::History => reply.output = node.history(),
        Command::Peers => reply.output.push(format!("Connected peers: {}", node.peer_count())),
        Command::Help => reply.output = HELP.iter().map(|line| (*line).to_owned()).collect(),
        Command::Quit => reply.quit = true,
    }
    reply
}

/// Read stdin until EOF or `quit`. Returns when the operator is done.
pub async fn run(node: Node) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let reply = execute(&node, &line);
                for out in &reply.output {
                    println!("{out}");
                }
                if reply.quit {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("console input closed");
                // Without stdin the node keeps running until a signal.
                std::future::pending::<()>().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                std::future::pending::<()>().await;
            }
        }
    }
}

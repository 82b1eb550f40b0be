//! Per-connection protocol handler.
//!
//! One [`PeerSession`] runs for every peer link, inbound or outbound. It
//! reads one line at a time, decodes the envelope and routes it:
//!
//! | type          | on success                                     | on failure              |
//! |---------------|------------------------------------------------|-------------------------|
//! | `TX`          | mempool, gossip to everyone else               | drop                    |
//! | `BLOCK`       | append, purge mempool, gossip, notify          | `GET_CHAIN` to sender   |
//! | `GET_CHAIN`   | `REPLY_CHAIN` with the full chain to sender    |                         |
//! | `REPLY_CHAIN` | replace chain, purge mempool, gossip, notify   | ignore                  |
//!
//! A `BLOCK` whose hash already sits at its height on our chain is a
//! duplicate: it is dropped without a `GET_CHAIN`, since gossip delivers
//! every block once per link.
//!
//! A bad message never ends the session; only EOF or an I/O error does.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::events::{ChainUpdate, NodeEvent};
use super::mempool::MempoolError;
use super::message::{Envelope, MessageType};
use super::node::NodeContext;
use super::peers::PeerId;
use crate::transaction::{verify_transaction, Transaction};

/// What [`PeerSession::handle_line`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Transaction, block or chain was taken and gossiped onward.
    Accepted,
    /// Already known; nothing forwarded.
    Duplicate,
    /// Failed verification or mempool admission.
    Rejected,
    /// Block did not extend our tip; `GET_CHAIN` sent back.
    SyncRequested,
    /// Answered a `GET_CHAIN`.
    Replied,
    /// Candidate chain was no improvement.
    Ignored,
    /// Could not be decoded.
    Malformed,
}

/// Protocol state of one connection.
pub struct PeerSession {
    ctx: Arc<NodeContext>,
    peer: PeerId,
    remote: Option<SocketAddr>,
}

impl PeerSession {
    pub(crate) fn new(ctx: Arc<NodeContext>, peer: PeerId, remote: Option<SocketAddr>) -> Self {
        Self { ctx, peer, remote }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Decode and act on one received line.
    pub fn handle_line(&self, line: &str) -> Dispatch {
        let line = line.trim_end();
        let envelope = match Envelope::decode(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(node = self.ctx.port, peer = %self.peer, error = %e, "dropping malformed message");
                return Dispatch::Malformed;
            }
        };
        debug!(node = self.ctx.port, peer = %self.peer, kind = ?envelope.kind, "message received");

        match envelope.kind {
            MessageType::Tx => self.on_transaction(&envelope, line),
            MessageType::Block => self.on_block(&envelope, line),
            MessageType::GetChain => self.on_get_chain(),
            MessageType::ReplyChain => self.on_reply_chain(&envelope, line),
        }
    }

    fn on_transaction(&self, envelope: &Envelope, line: &str) -> Dispatch {
        let tx = match envelope.decode_transaction() {
            Ok(tx) => tx,
            Err(e) => {
                warn!(node = self.ctx.port, peer = %self.peer, error = %e, "dropping transaction");
                return Dispatch::Malformed;
            }
        };

        if let Err(e) = verify_transaction(&tx) {
            warn!(node = self.ctx.port, peer = %self.peer, id = tx.short_id(), error = %e, "transaction failed verification");
            return Dispatch::Rejected;
        }

        let id = tx.id.clone();
        match self.ctx.mempool.submit(tx) {
            Ok(()) => {
                self.ctx.peers.broadcast(line, Some(self.peer));
                self.ctx.events.emit(NodeEvent::TransactionAccepted { id });
                Dispatch::Accepted
            }
            Err(MempoolError::Duplicate { .. }) => Dispatch::Duplicate,
            Err(e) => {
                debug!(node = self.ctx.port, error = %e, "transaction not staged");
                Dispatch::Rejected
            }
        }
    }

    /// Append a gossiped block. A block we already hold yields
    /// [`Dispatch::Duplicate`] and no `GET_CHAIN`; any other refusal asks
    /// the sender for its chain.
    fn on_block(&self, envelope: &Envelope, line: &str) -> Dispatch {
        let block = match envelope.decode_block() {
            Ok(block) => block,
            Err(e) => {
                warn!(node = self.ctx.port, peer = %self.peer, error = %e, "dropping block");
                return Dispatch::Malformed;
            }
        };
        let number = block.number();
        let committed = block.transactions.clone();

        let accepted = {
            let mut chain = self.ctx.chain.write();
            if chain.get(number).is_some_and(|known| known.hash == block.hash) {
                return Dispatch::Duplicate;
            }
            chain.add_block(block)
        };

        if accepted {
            self.ctx.mempool.purge(&committed);
            self.ctx.peers.broadcast(line, Some(self.peer));
            self.ctx
                .events
                .record(format!("Received Block #{number} from {}", self.peer));
            self.ctx.announce_chain(ChainUpdate::Received);
            Dispatch::Accepted
        } else {
            debug!(node = self.ctx.port, peer = %self.peer, number, "block does not extend tip, requesting chain");
            self.send(&Envelope::get_chain());
            Dispatch::SyncRequested
        }
    }

    fn on_get_chain(&self) -> Dispatch {
        let reply = Envelope::reply_chain(self.ctx.chain.read().blocks());
        match reply {
            Ok(reply) => {
                self.send(&reply);
                Dispatch::Replied
            }
            Err(e) => {
                warn!(node = self.ctx.port, error = %e, "failed to encode chain");
                Dispatch::Ignored
            }
        }
    }

    fn on_reply_chain(&self, envelope: &Envelope, line: &str) -> Dispatch {
        let blocks = match envelope.decode_chain() {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(node = self.ctx.port, peer = %self.peer, error = %e, "dropping chain");
                return Dispatch::Malformed;
            }
        };
        let committed: Vec<Transaction> = blocks
            .iter()
            .flat_map(|b| b.transactions.iter().cloned())
            .collect();
        let length = blocks.len();

        if !self.ctx.chain.write().replace_chain(blocks) {
            return Dispatch::Ignored;
        }

        self.ctx.mempool.purge(&committed);
        self.ctx.peers.broadcast(line, Some(self.peer));
        self.ctx
            .events
            .record(format!("Chain replaced from {}. New length: {length}", self.peer));
        self.ctx.announce_chain(ChainUpdate::Replaced);
        Dispatch::Accepted
    }

    fn send(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(line) => {
                self.ctx.peers.send_to(self.peer, &line);
            }
            Err(e) => warn!(node = self.ctx.port, error = %e, "failed to encode message"),
        }
    }

    /// Drive the connection until EOF, an I/O error or node shutdown.
    ///
    /// A writer task drains `outbound` onto the socket, one line per message.
    /// Reads have no timeout: a silent peer keeps its session alive until it
    /// closes the connection.
    pub async fn run(
        self,
        stream: TcpStream,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (read_half, mut write_half) = stream.into_split();

        let writer = tokio::spawn(async move {
            while let Some(mut line) = outbound.recv().await {
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            self.handle_line(&line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(node = self.ctx.port, peer = %self.peer, error = %e, "read failed");
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        }

        self.ctx.peers.unregister(self.peer);
        writer.abort();
        info!(node = self.ctx.port, peer = %self.peer, remote = ?self.remote, "peer disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::crypto::Wallet;
    use crate::network::miner::mine_block;
    use crate::network::node::Node;
    use crate::storage::{Block, BlockHeader};
    use crate::transaction::sign_transaction;

    fn test_node() -> Node {
        Node::new(NodeConfig {
            difficulty: 1,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..NodeConfig::default()
        })
    }

    fn signed_tx(data: &str) -> Transaction {
        let wallet = Wallet::generate();
        let mut tx = Transaction::new(wallet.public_key_base64(), "bob", data);
        sign_transaction(&mut tx, &wallet);
        tx
    }

    fn tx_line(tx: &Transaction) -> String {
        Envelope::transaction(tx).unwrap().encode().unwrap()
    }

    fn next_block(node: &Node, txs: Vec<Transaction>) -> Block {
        let parent = node.last_block();
        let header = BlockHeader::successor(&parent, &txs, 1);
        let solved = mine_block(header, "0", || true).unwrap();
        Block::new(solved, txs)
    }

    fn block_line(block: &Block) -> String {
        Envelope::block(block).unwrap().encode().unwrap()
    }

    fn feed_block(node: &Node, block: &Block) {
        let (session, _rx) = node.open_session();
        assert_eq!(session.handle_line(&block_line(block)), Dispatch::Accepted);
    }

    // -- TX ------------------------------------------------------------------

    #[test]
    fn valid_transaction_is_staged_and_gossiped_to_others() {
        let node = test_node();
        let (sender, mut sender_rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let tx = signed_tx("hello");
        let line = tx_line(&tx);
        assert_eq!(sender.handle_line(&line), Dispatch::Accepted);
        assert_eq!(node.mempool_len(), 1);

        assert_eq!(other_rx.try_recv().unwrap(), line);
        assert!(sender_rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_transaction_is_not_regossiped() {
        let node = test_node();
        let (sender, _rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let line = tx_line(&signed_tx("once"));
        assert_eq!(sender.handle_line(&line), Dispatch::Accepted);
        assert_eq!(sender.handle_line(&line), Dispatch::Duplicate);

        assert!(other_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
        assert_eq!(node.mempool_len(), 1);
    }

    #[test]
    fn tampered_transaction_is_dropped() {
        let node = test_node();
        let (sender, _rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let mut tx = signed_tx("original");
        tx.data = "forged".into();
        tx.id = tx.compute_id();
        assert_eq!(sender.handle_line(&tx_line(&tx)), Dispatch::Rejected);
        assert_eq!(node.mempool_len(), 0);
        assert!(other_rx.try_recv().is_err());
    }

    // -- Malformed input -----------------------------------------------------

    #[test]
    fn malformed_lines_do_not_poison_the_session() {
        let node = test_node();
        let (session, _rx) = node.open_session();

        assert_eq!(session.handle_line("{not json"), Dispatch::Malformed);
        assert_eq!(
            session.handle_line(r#"{"type":"TX","jsonData":"{}"}"#),
            Dispatch::Malformed
        );
        assert_eq!(
            session.handle_line(r#"{"type":"BLOCK","jsonData":"[1,2]"}"#),
            Dispatch::Malformed
        );

        let line = tx_line(&signed_tx("after garbage"));
        assert_eq!(session.handle_line(&line), Dispatch::Accepted);
    }

    // -- BLOCK ---------------------------------------------------------------

    #[test]
    fn valid_block_is_appended_purged_and_gossiped() {
        let node = test_node();
        let (sender, mut sender_rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let tx = signed_tx("to be mined");
        sender.handle_line(&tx_line(&tx));
        other_rx.try_recv().unwrap();
        assert_eq!(node.mempool_len(), 1);

        let block = next_block(&node, vec![tx]);
        let line = block_line(&block);
        assert_eq!(sender.handle_line(&line), Dispatch::Accepted);

        assert_eq!(node.chain_len(), 2);
        assert_eq!(node.mempool_len(), 0);
        assert_eq!(other_rx.try_recv().unwrap(), line);
        assert!(sender_rx.try_recv().is_err());
    }

    #[test]
    fn known_block_is_a_quiet_duplicate() {
        let node = test_node();
        let (session, mut rx) = node.open_session();
        let line = block_line(&next_block(&node, vec![]));

        assert_eq!(session.handle_line(&line), Dispatch::Accepted);
        assert_eq!(session.handle_line(&line), Dispatch::Duplicate);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unlinkable_block_requests_chain_from_sender() {
        let node = test_node();
        let (session, mut rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let mut block = next_block(&node, vec![]);
        block.header.parent_hash = "f".repeat(64);
        let block = Block::new(mine_block(block.header, "0", || true).unwrap(), vec![]);

        assert_eq!(session.handle_line(&block_line(&block)), Dispatch::SyncRequested);
        assert_eq!(node.chain_len(), 1);

        let request = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(request.kind, MessageType::GetChain);
        assert!(other_rx.try_recv().is_err());
    }

    // -- GET_CHAIN / REPLY_CHAIN ---------------------------------------------

    #[test]
    fn get_chain_replies_to_requester_only() {
        let node = test_node();
        let (session, mut rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();

        let line = Envelope::get_chain().encode().unwrap();
        assert_eq!(session.handle_line(&line), Dispatch::Replied);

        let reply = Envelope::decode(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply.decode_chain().unwrap(), node.chain_snapshot());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn longer_chain_reply_replaces_and_purges() {
        let source = test_node();
        for n in 0..3 {
            let block = next_block(&source, vec![signed_tx(&format!("tx {n}"))]);
            feed_block(&source, &block);
        }
        let committed = source.chain_snapshot()[2].transactions[0].clone();

        let node = test_node();
        let (session, _rx) = node.open_session();
        let (_other, mut other_rx) = node.open_session();
        node.open_session().0.handle_line(&tx_line(&committed));
        assert_eq!(node.mempool_len(), 1);

        let line = Envelope::reply_chain(&source.chain_snapshot())
            .unwrap()
            .encode()
            .unwrap();
        assert_eq!(session.handle_line(&line), Dispatch::Accepted);
        assert_eq!(node.chain_len(), 4);
        assert_eq!(node.mempool_len(), 0);

        // The earlier TX gossip, then the chain.
        other_rx.try_recv().unwrap();
        assert_eq!(other_rx.try_recv().unwrap(), line);
    }

    #[test]
    fn shorter_chain_reply_is_ignored() {
        let node = test_node();
        feed_block(&node, &next_block(&node, vec![]));

        let (session, _rx) = node.open_session();
        let line = Envelope::reply_chain(&[Block::genesis(1)])
            .unwrap()
            .encode()
            .unwrap();
        assert_eq!(session.handle_line(&line), Dispatch::Ignored);
        assert_eq!(node.chain_len(), 2);
    }
}

//! The node: ledger, block production, sync sessions and gossip.
//!
//! [`Node`] is a message-driven state machine. The async loop in the binary
//! feeds it network messages and clock ticks and delivers the
//! `(peer, message)` pairs it returns; nothing in here touches a socket.
//!
//! Only one sync session may fetch blocks at a time. The session that
//! enters its block phase first holds the lock until it finishes, fails or
//! its peer disconnects; other sessions reaching that point are dropped and
//! retried on a later tick.

mod inbox;
mod ledger;
mod transaction;

pub use inbox::{Inbox, InboxOutcome};
pub use ledger::{Ledger, LedgerError, LedgerResult};
pub use transaction::{signed_transaction_validate, TransactionError};

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::consensus::{BlockProducer, ConsensusError};
use crate::network::{BroadcastRelay, Message, PeerId};
use crate::sync::{serve_blocks, serve_headers, SyncError, SyncSession, SyncStep};
use crate::types::{SignedTransaction, Timestamp};

/// Messages to deliver, addressed by peer
pub type Outgoing = Vec<(PeerId, Message)>;

enum Accepted {
    /// Complete and pooled
    Pooled(SignedTransaction),
    /// Still missing signatures, but this node learned new ones
    Partial(SignedTransaction),
    /// Nothing new
    Known,
}

/// A full node
#[derive(Debug)]
pub struct Node {
    ledger: Ledger,
    producer: Option<BlockProducer>,
    relay: BroadcastRelay,
    inbox: Inbox,
    peers: BTreeSet<PeerId>,
    sessions: BTreeMap<PeerId, SyncSession>,
    sync_owner: Option<PeerId>,
}

impl Node {
    /// Node over `ledger`; it produces blocks when `producer` is set
    #[must_use]
    pub fn new(ledger: Ledger, producer: Option<BlockProducer>, relay: BroadcastRelay) -> Self {
        Self {
            ledger,
            producer,
            relay,
            inbox: Inbox::new(),
            peers: BTreeSet::new(),
            sessions: BTreeMap::new(),
            sync_owner: None,
        }
    }

    /// The ledger
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Partially signed transactions held for co-owners
    #[must_use]
    pub const fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Peer whose session holds the block-phase lock
    #[must_use]
    pub const fn sync_owner(&self) -> Option<PeerId> {
        self.sync_owner
    }

    /// Connected peers
    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.iter().copied()
    }

    /// A connection came up
    pub fn peer_connected(&mut self, peer: PeerId) {
        self.peers.insert(peer);
        self.sessions.entry(peer).or_default();
    }

    /// A connection went away; its session and any lock it held are dropped
    pub fn peer_disconnected(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
        self.sessions.remove(&peer);
        if self.sync_owner == Some(peer) {
            debug!(peer, "sync lock released by disconnect");
            self.sync_owner = None;
        }
    }

    /// Periodic work: drop expired transactions, produce a block when due
    /// and ask idle peers for their tips
    pub fn tick(&mut self, now: Timestamp) -> Outgoing {
        self.inbox.clean(now);
        if !self.ledger.pool().is_empty() {
            if let Err(error) = self.ledger.with_transaction(|ledger| ledger.clean_pool(now)) {
                warn!(error = %error, "pool cleanup failed");
            }
        }
        if self.sync_owner.is_none() {
            self.try_produce(now);
        }
        self.peers
            .iter()
            .filter(|&&peer| self.sessions.get(&peer).map_or(true, SyncSession::is_idle))
            .map(|&peer| (peer, Message::SyncRequest))
            .collect()
    }

    fn try_produce(&mut self, now: Timestamp) {
        let Some(producer) = &self.producer else {
            return;
        };
        match producer.produce_block(&mut self.ledger, now) {
            Ok(_) | Err(ConsensusError::TooEarly { .. }) => {}
            Err(error @ ConsensusError::BelowMiningThreshold { .. }) => {
                debug!(error = %error, "not producing");
            }
            Err(error) => warn!(error = %error, "block production failed"),
        }
    }

    /// Submit a locally created transaction and gossip it
    ///
    /// # Errors
    /// Returns error if the transaction is invalid or does not apply
    pub fn submit_transaction(
        &mut self,
        signed: SignedTransaction,
        now: Timestamp,
    ) -> LedgerResult<Outgoing> {
        match self.accept(signed, now)? {
            Accepted::Pooled(signed) | Accepted::Partial(signed) => {
                let message = self.relay.originate(signed);
                Ok(self.fan_out(None, &message))
            }
            Accepted::Known => Ok(Vec::new()),
        }
    }

    /// Handle one message from `peer`
    pub fn handle_message(&mut self, peer: PeerId, message: Message, now: Timestamp) -> Outgoing {
        debug!(peer, rtt = message.rtt(), "message received");
        match message {
            Message::SyncRequest => match self.ledger.tip() {
                Ok(tip) => vec![(
                    peer,
                    Message::SyncResponse {
                        block_number: tip.header.block_number,
                        c_sum: tip.header.c_sum,
                    },
                )],
                Err(error) => reply_error(peer, &error),
            },
            Message::SyncResponse {
                block_number,
                c_sum,
            } => {
                let session = self.sessions.entry(peer).or_default();
                if !session.is_idle() {
                    return Vec::new();
                }
                let step = session.on_sync_response(&self.ledger, block_number, c_sum);
                self.finish_step(peer, step)
            }
            Message::BlockHeaderRequest {
                blocks_from,
                blocks_to,
            } => match serve_headers(&self.ledger, blocks_from, blocks_to) {
                Ok(headers) => vec![(peer, Message::BlockHeaderResponse { headers })],
                Err(error) => reply_error(peer, &error),
            },
            Message::BlockHeaderResponse { headers } => {
                let session = self.sessions.entry(peer).or_default();
                let step = session.on_headers(&self.ledger, headers, now);
                self.finish_step(peer, step)
            }
            Message::BlockchainRequest {
                blocks_from,
                blocks_to,
            } => match serve_blocks(&self.ledger, blocks_from, blocks_to) {
                Ok(signed_blocks) => vec![(peer, Message::BlockchainResponse { signed_blocks })],
                Err(error) => reply_error(peer, &error),
            },
            Message::BlockchainResponse { signed_blocks } => {
                if self.sync_owner != Some(peer) {
                    debug!(peer, "blocks from a session without the sync lock");
                    return Vec::new();
                }
                let session = self.sessions.entry(peer).or_default();
                let step = session.on_blocks(&mut self.ledger, signed_blocks, now);
                self.finish_step(peer, step)
            }
            Message::Broadcast { echoes, package } => {
                self.on_broadcast(peer, echoes, package, now)
            }
            Message::Done => Vec::new(),
            Message::Error { message } => {
                warn!(peer, message = %message, "peer reported an error");
                self.abort_session(peer);
                Vec::new()
            }
        }
    }

    fn finish_step(&mut self, peer: PeerId, step: Result<SyncStep, SyncError>) -> Outgoing {
        match step {
            Ok(SyncStep::Send(request)) => {
                let wants_lock = matches!(request, Message::BlockchainRequest { .. });
                if wants_lock && !self.take_lock(peer) {
                    debug!(peer, owner = ?self.sync_owner, "sync busy, session dropped");
                    self.abort_session(peer);
                    return Vec::new();
                }
                vec![(peer, request)]
            }
            Ok(SyncStep::Applied { height }) => {
                info!(peer, height, "chain synchronized");
                self.release_lock(peer);
                Vec::new()
            }
            Ok(SyncStep::UpToDate | SyncStep::IncumbentKept) => {
                self.release_lock(peer);
                Vec::new()
            }
            Err(SyncError::Protocol(violation)) => {
                warn!(peer, violation = %violation, "sync session rejected");
                self.release_lock(peer);
                vec![(
                    peer,
                    Message::Error {
                        message: violation.to_string(),
                    },
                )]
            }
            Err(error @ SyncError::Internal(_)) => {
                self.release_lock(peer);
                reply_error(peer, &error)
            }
        }
    }

    fn take_lock(&mut self, peer: PeerId) -> bool {
        match self.sync_owner {
            None => {
                self.sync_owner = Some(peer);
                true
            }
            Some(owner) => owner == peer,
        }
    }

    fn release_lock(&mut self, peer: PeerId) {
        if self.sync_owner == Some(peer) {
            self.sync_owner = None;
        }
    }

    fn abort_session(&mut self, peer: PeerId) {
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.reset();
        }
        self.release_lock(peer);
    }

    fn on_broadcast(
        &mut self,
        peer: PeerId,
        echoes: u8,
        package: SignedTransaction,
        now: Timestamp,
    ) -> Outgoing {
        match self.accept(package, now) {
            Ok(Accepted::Pooled(signed) | Accepted::Partial(signed)) => {
                match self.relay.relay(echoes) {
                    Some(echoes) => {
                        let message = Message::Broadcast {
                            echoes,
                            package: signed,
                        };
                        self.fan_out(Some(peer), &message)
                    }
                    None => Vec::new(),
                }
            }
            Ok(Accepted::Known) => Vec::new(),
            Err(error) => {
                debug!(peer, error = %error, "gossiped transaction refused");
                Vec::new()
            }
        }
    }

    fn accept(&mut self, signed: SignedTransaction, now: Timestamp) -> LedgerResult<Accepted> {
        signed_transaction_validate(&signed, now)?;
        if self.ledger.cache().contains(&signed.hash()?) {
            return Ok(Accepted::Known);
        }
        let complete = match self.inbox.merge(signed)? {
            InboxOutcome::Complete(complete) => complete,
            InboxOutcome::Updated(partial) => return Ok(Accepted::Partial(partial)),
            InboxOutcome::Unchanged => return Ok(Accepted::Known),
        };
        let pooled = complete.clone();
        self.ledger
            .with_transaction(|ledger| ledger.pool_push(pooled, now))?;
        Ok(Accepted::Pooled(complete))
    }

    fn fan_out(&self, except: Option<PeerId>, message: &Message) -> Outgoing {
        self.peers
            .iter()
            .filter(|&&peer| Some(peer) != except)
            .map(|&peer| (peer, message.clone()))
            .collect()
    }
}

fn reply_error(peer: PeerId, error: &impl std::fmt::Display) -> Outgoing {
    vec![(
        peer,
        Message::Error {
            message: error.to_string(),
        },
    )]
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::consensus::BlockProducerConfig;
    use crate::crypto::hash_data;
    use crate::params::BLOCK_MINE_DELAY;
    use crate::state::StateLayer;
    use crate::test_support::{
        address_of, keypair, ledger_with, linear_params, signed_tx, transfer_tx,
    };
    use crate::types::{Action, Coin, File};

    const A: PeerId = 1;
    const B: PeerId = 2;
    const C: PeerId = 3;

    fn node(producer: Option<u8>) -> Node {
        let ledger = ledger_with(&[(1, 1_000), (2, 1_000)], linear_params());
        let producer =
            producer.map(|n| BlockProducer::new(keypair(n), BlockProducerConfig::default()));
        Node::new(ledger, producer, BroadcastRelay::seeded(3, 2))
    }

    /// Deliver messages between `a` (known to `b` as `A`) and `b` (known to
    /// `a` as `B`) until both are quiet
    fn pump(a: &mut Node, b: &mut Node, start: Outgoing, from_a: bool, now: Timestamp) {
        let mut queue: VecDeque<(bool, Message)> = start
            .into_iter()
            .map(|(_, message)| (from_a, message))
            .collect();
        while let Some((from_a, message)) = queue.pop_front() {
            let replies = if from_a {
                b.handle_message(A, message, now)
            } else {
                a.handle_message(B, message, now)
            };
            queue.extend(
                replies
                    .into_iter()
                    .filter(|(peer, _)| *peer == if from_a { A } else { B })
                    .map(|(_, message)| (!from_a, message)),
            );
        }
    }

    #[test]
    fn test_sync_request_answers_tip() {
        let mut node = node(None);
        let replies = node.handle_message(A, Message::SyncRequest, 0);
        assert_eq!(
            replies,
            vec![(
                A,
                Message::SyncResponse {
                    block_number: 0,
                    c_sum: 0
                }
            )]
        );
    }

    #[test]
    fn test_producer_and_follower_converge() {
        let mut a = node(Some(1));
        let mut b = node(None);
        a.peer_connected(B);
        b.peer_connected(A);

        let mut now = 0;
        for _ in 0..3 {
            now += BLOCK_MINE_DELAY;
            let _ = a.tick(now);
        }
        assert_eq!(a.ledger().chain().length(), 4);

        let requests = b.tick(now);
        assert_eq!(requests, vec![(A, Message::SyncRequest)]);
        pump(&mut a, &mut b, requests, false, now);

        assert_eq!(b.ledger().tip().unwrap(), a.ledger().tip().unwrap());
        assert_eq!(
            b.ledger().state().get_balance(&address_of(1), StateLayer::Chain),
            a.ledger().state().get_balance(&address_of(1), StateLayer::Chain)
        );
        assert_eq!(b.sync_owner(), None);
    }

    #[test]
    fn test_fresh_broadcast_relayed_except_to_sender() {
        let mut node = node(None);
        for peer in [A, B, C] {
            node.peer_connected(peer);
        }
        let tx = transfer_tx(&keypair(1), &keypair(2), 5, 0);
        let replies = node.handle_message(
            A,
            Message::Broadcast {
                echoes: 2,
                package: tx.clone(),
            },
            10,
        );
        let targets: Vec<PeerId> = replies.iter().map(|(peer, _)| *peer).collect();
        assert_eq!(targets, vec![B, C]);
        assert!(replies
            .iter()
            .all(|(_, message)| matches!(message, Message::Broadcast { echoes: 1, .. })));
        assert_eq!(node.ledger().pool().length(), 1);

        let again = node.handle_message(
            B,
            Message::Broadcast {
                echoes: 2,
                package: tx,
            },
            10,
        );
        assert!(again.is_empty());
        assert_eq!(node.ledger().pool().length(), 1);
    }

    #[test]
    fn test_cosigned_transaction_completes_in_inbox() {
        let mut node = node(None);
        node.peer_connected(A);
        let file = || {
            signed_tx(
                Action::File(File {
                    uri: hash_data(b"paper"),
                    author_addresses: vec![address_of(1), address_of(2)],
                }),
                &[],
            )
        };
        let mut first = file();
        first.sign(&keypair(1)).unwrap();
        let mut second = file();
        second.sign(&keypair(2)).unwrap();

        let relayed = node.submit_transaction(first, 10).unwrap();
        assert_eq!(relayed.len(), 1);
        assert_eq!(node.inbox().len(), 1);
        assert!(node.ledger().pool().is_empty());

        node.submit_transaction(second, 10).unwrap();
        assert!(node.inbox().is_empty());
        assert_eq!(node.ledger().pool().length(), 1);
        assert!(node.ledger().documents().file(&hash_data(b"paper")).is_some());
    }

    #[test]
    fn test_invalid_submission_refused() {
        let mut node = node(None);
        let mut tx = transfer_tx(&keypair(1), &keypair(2), 5, 0);
        tx.transaction.fee = Coin::from_whole(1);
        assert!(node.submit_transaction(tx, 10).is_err());
        assert!(node.ledger().pool().is_empty());
    }

    #[test]
    fn test_single_block_phase_lock() {
        let mut source = node(Some(1));
        for n in 1..=3 {
            let _ = source.tick(n * BLOCK_MINE_DELAY);
        }
        let tip = source.ledger().tip().unwrap();
        let now = tip.header.time_signed;

        let mut node = node(None);
        node.peer_connected(A);
        node.peer_connected(B);
        for peer in [A, B] {
            let replies = node.handle_message(
                peer,
                Message::SyncResponse {
                    block_number: tip.header.block_number,
                    c_sum: tip.header.c_sum,
                },
                now,
            );
            let Some((_, Message::BlockHeaderRequest { blocks_from, blocks_to })) =
                replies.into_iter().next()
            else {
                panic!("expected a header request");
            };
            let headers = serve_headers(source.ledger(), blocks_from, blocks_to).unwrap();
            let replies = node.handle_message(peer, Message::BlockHeaderResponse { headers }, now);
            if peer == A {
                assert!(matches!(
                    replies.as_slice(),
                    [(A, Message::BlockchainRequest { .. })]
                ));
            } else {
                assert!(replies.is_empty());
            }
        }
        assert_eq!(node.sync_owner(), Some(A));

        node.peer_disconnected(A);
        assert_eq!(node.sync_owner(), None);
    }
}

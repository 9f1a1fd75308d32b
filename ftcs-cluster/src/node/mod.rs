//! Election and replication engine.
//!
//! A [`Node`] owns the peer registry and the replicated state and runs
//! every task that touches them:
//!
//! - an accept loop per listener, each inbound link getting its own
//!   handshake task;
//! - one monitoring task per handshaken link, dispatching inbound one-shot
//!   messages until the link fails;
//! - election rounds ([`election`]), state transfer ([`replication`]) and
//!   re-dial loops for lost outbound links ([`recovery`]).
//!
//! Closing a link is the only cancellation mechanism: every task blocked on
//! it fails and winds down on its own.

mod election;
mod recovery;
mod replication;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::board::BoardState;
use crate::config::NodeConfig;
use crate::error::{LinkError, NodeError};
use crate::identity::NodeId;
use crate::message::Message;
use crate::registry::{Admission, Peer, PeerRegistry, Release};
use crate::state::{Snapshot, StateHolder};
use crate::transport::{Link, Listener, Transport};

pub use election::Vote;

/// How long the accepting side of a self-connection waits for the dialer
/// to hang up before closing the link itself.
const SELF_CONNECTION_GRACE: Duration = Duration::from_secs(1);

/// Result of a successful handshake on a dialed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// A new peer entry was created.
    Registered(NodeId),
    /// The peer was already registered; the extra link is still monitored.
    AlreadyKnown(NodeId),
    /// The address answered with our own identity. The link was closed.
    SelfConnection,
}

pub struct Node<T: Transport> {
    id: NodeId,
    transport: T,
    registry: PeerRegistry<T::Link>,
    replica: StateHolder,
    /// Pending election answers, one slot per queried peer.
    votes: Mutex<HashMap<NodeId, oneshot::Sender<Vote>>>,
    /// Serializes election rounds.
    election: Mutex<()>,
    /// Every monitored link by link id, secondary links included, described
    /// as the registry entry it would make.
    links: Mutex<HashMap<u64, Peer<T::Link>>>,
    listeners: Mutex<Vec<Arc<T::Listener>>>,
    stopped: AtomicBool,
    recovery_interval: Duration,
    election_timeout: Duration,
}

impl<T: Transport> Node<T> {
    pub fn new(transport: T, config: &NodeConfig) -> Arc<Self> {
        Self::with_state(transport, config, BoardState::initial())
    }

    pub fn with_state(transport: T, config: &NodeConfig, initial: BoardState) -> Arc<Self> {
        let id = NodeId::generate();
        info!(node = %id, "node identity generated");
        Arc::new(Self {
            id,
            transport,
            registry: PeerRegistry::new(id),
            replica: StateHolder::new(initial),
            votes: Mutex::new(HashMap::new()),
            election: Mutex::new(()),
            links: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            recovery_interval: config.recovery_interval,
            election_timeout: config.election_timeout,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn registry(&self) -> &PeerRegistry<T::Link> {
        &self.registry
    }

    pub async fn master(&self) -> Option<NodeId> {
        self.replica.master().await
    }

    pub async fn is_master(&self) -> bool {
        self.replica.master().await == Some(self.id)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.replica.snapshot().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Spawns the accept loop for inbound peer links.
    pub async fn serve_peers(self: &Arc<Self>, listener: T::Listener) -> JoinHandle<()> {
        let listener = self.track_listener(listener).await;
        let node = Arc::clone(self);
        tokio::spawn(async move {
            info!(node = %node.id, address = %listener.local_addr(), "accepting peers");
            loop {
                match listener.accept().await {
                    Ok(link) => {
                        let node = Arc::clone(&node);
                        tokio::spawn(async move { node.accept_peer(link).await });
                    }
                    Err(LinkError::Closed) => break,
                    Err(err) => warn!(error = %err, "failed to accept peer link"),
                }
            }
            debug!(node = %node.id, "peer accept loop stopped");
        })
    }

    /// Dials every bootstrap address in order. Failures are logged and skipped.
    ///
    /// Returns the number of addresses that led to a peer.
    pub async fn bootstrap(self: &Arc<Self>, addresses: &[String]) -> usize {
        let mut reached = 0;
        for address in addresses {
            match self.connect(address).await {
                Ok(HandshakeOutcome::Registered(_)) | Ok(HandshakeOutcome::AlreadyKnown(_)) => {
                    reached += 1
                }
                Ok(HandshakeOutcome::SelfConnection) => {
                    debug!(%address, "bootstrap address is this node")
                }
                Err(err) => warn!(%address, error = %err, "bootstrap dial failed"),
            }
        }
        let peers = self.registry.ids().await;
        info!(
            node = %self.id,
            reached,
            total = addresses.len(),
            ?peers,
            "bootstrap finished"
        );
        reached
    }

    /// Dials `address` and runs the dialer side of the handshake.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<HandshakeOutcome, NodeError> {
        if self.is_stopped() {
            return Err(NodeError::Stopped);
        }
        let link = self.transport.dial(address).await?;
        match self.greet(&link).await {
            Ok(id) if id == self.id => {
                debug!(%address, "dialed ourselves, discarding link");
                link.close();
                Ok(HandshakeOutcome::SelfConnection)
            }
            Ok(id) => match self.track(Peer::new(id, address.to_string(), link, true)).await {
                Admission::Added => {
                    info!(peer = %id, %address, "registered peer");
                    Ok(HandshakeOutcome::Registered(id))
                }
                Admission::Replaced => {
                    debug!(peer = %id, %address, "peer now registered over the dialed link");
                    Ok(HandshakeOutcome::AlreadyKnown(id))
                }
                Admission::Kept | Admission::Rejected => {
                    debug!(peer = %id, %address, "peer already registered");
                    Ok(HandshakeOutcome::AlreadyKnown(id))
                }
            },
            Err(err) => {
                link.close();
                Err(err)
            }
        }
    }

    /// Sends our Ping and waits for the Pong carrying the remote identity.
    async fn greet(&self, link: &T::Link) -> Result<NodeId, NodeError> {
        link.send_one_shot(&Message::Ping { id: self.id }).await?;
        match link.receive_one_shot().await? {
            Message::Pong { id } => Ok(id),
            other => Err(NodeError::InvalidHandshake(other.kind())),
        }
    }

    /// Listener side of the handshake for one inbound link.
    async fn accept_peer(self: Arc<Self>, link: T::Link) {
        let remote = link.remote();
        let first = match link.receive_one_shot().await {
            Ok(message) => message,
            Err(err) => {
                debug!(%remote, error = %err, "inbound link failed before handshake");
                link.close();
                return;
            }
        };

        match first {
            Message::Ping { id } if id == self.id => {
                debug!(%remote, "self connection, closing");
                // Answering lets the dialer recognise itself instead of seeing a reset.
                let _ = link.send_one_shot(&Message::Pong { id: self.id }).await;
                let _ = timeout(SELF_CONNECTION_GRACE, link.receive_one_shot()).await;
                link.close();
            }
            Message::Ping { id } => {
                // Pong must be the first message the dialer sees on this link.
                if let Err(err) = link.send_one_shot(&Message::Pong { id: self.id }).await {
                    warn!(peer = %id, error = %err, "failed to answer handshake");
                    link.close();
                    return;
                }
                match self.track(Peer::new(id, remote.clone(), link, false)).await {
                    Admission::Added => info!(peer = %id, %remote, "accepted peer"),
                    Admission::Replaced => {
                        debug!(peer = %id, %remote, "peer now registered over the accepted link")
                    }
                    Admission::Kept | Admission::Rejected => {}
                }
            }
            other => {
                let err = NodeError::InvalidHandshake(other.kind());
                warn!(%remote, error = %err, "discarding inbound link");
                link.close();
            }
        }
    }

    /// Records a handshaken link, offers it to the registry and starts
    /// monitoring it.
    ///
    /// Holding `links` while admitting keeps this ordered against
    /// [`Node::link_lost`] looking for a surviving link to the same peer.
    async fn track(self: &Arc<Self>, entry: Peer<T::Link>) -> Admission {
        let Some(link) = entry.link.clone() else {
            return Admission::Rejected;
        };
        let peer = entry.id;
        let admission = {
            let mut links = self.links.lock().await;
            links.insert(link.id(), entry.clone());
            self.registry.admit(entry).await
        };
        let node = Arc::clone(self);
        tokio::spawn(async move { node.monitor(peer, link).await });
        admission
    }

    /// Receives and dispatches one-shot messages from `peer` until the link fails.
    async fn monitor(self: Arc<Self>, peer: NodeId, link: T::Link) {
        loop {
            match link.receive_one_shot().await {
                Ok(message) => {
                    let kind = message.kind();
                    if let Err(err) = self.dispatch(peer, &link, message).await {
                        debug!(peer = %peer, kind, error = %err, "failed to answer peer");
                    }
                }
                // A bad payload spoils that exchange only.
                Err(err) if err.is_codec() => {
                    warn!(peer = %peer, error = %err, "discarding undecodable message")
                }
                Err(err) => {
                    self.link_lost(peer, &link, err).await;
                    return;
                }
            }
        }
    }

    async fn dispatch(
        self: &Arc<Self>,
        peer: NodeId,
        link: &T::Link,
        message: Message,
    ) -> Result<(), LinkError> {
        match message {
            Message::Ping { .. } => link.send_one_shot(&Message::Pong { id: self.id }).await,
            Message::Pong { .. } => Ok(()),
            Message::AreYouMaster { candidate } => {
                let answer = self.answer_master_query(candidate).await;
                link.send_one_shot(&answer).await
            }
            Message::MasterNo => {
                self.record_vote(peer, Vote::NotContested).await;
                Ok(())
            }
            Message::MasterYes { master } => {
                self.adopt_reported_master(master).await;
                self.record_vote(peer, Vote::Follows(master)).await;
                Ok(())
            }
            Message::RequestState => {
                let snapshot = self.replica.snapshot().await;
                link.send_one_shot(&Message::StateFromMaster {
                    state: snapshot.state,
                    version: snapshot.version,
                })
                .await
            }
            Message::StateFromMaster { state, version } => {
                self.accept_replicated(peer, link, state, version).await
            }
            Message::StateToMaster { state } => {
                self.apply_and_fan_out(state).await;
                Ok(())
            }
            other @ (Message::SubmitState { .. }
            | Message::SendState { .. }
            | Message::ClientError { .. }) => {
                warn!(peer = %peer, kind = other.kind(), "ignoring client message on peer link");
                Ok(())
            }
        }
    }

    async fn link_lost(self: &Arc<Self>, peer: NodeId, link: &T::Link, error: LinkError) {
        link.close();
        let release = {
            let mut links = self.links.lock().await;
            links.remove(&link.id());
            let survivor = links.values().find(|entry| entry.id == peer).cloned();
            self.registry.release(peer, link.id(), survivor).await
        };
        let lost = match release {
            Release::Secondary => {
                debug!(peer = %peer, "secondary link closed");
                return;
            }
            Release::Promoted => {
                info!(peer = %peer, error = %error, "registered link lost, switched to another link");
                return;
            }
            Release::Removed(lost) => lost,
        };
        // Dropping the slot wakes an election round waiting on this peer.
        self.votes.lock().await.remove(&peer);
        if self.is_stopped() {
            return;
        }

        warn!(peer = %peer, address = %lost.address, error = %error, "lost peer");
        if self.replica.clear_master_if(peer).await {
            info!(node = %self.id, "master lost, re-running election");
            self.spawn_election();
        }
        if lost.is_initiator {
            self.spawn_recovery(peer, lost.address);
        }
    }

    /// Stops recovery, closes every listener and every link.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for listener in self.listeners.lock().await.drain(..) {
            listener.close().await;
        }
        for (_, entry) in self.links.lock().await.drain() {
            if let Some(link) = &entry.link {
                link.close();
            }
        }
        self.registry
            .for_each(|peer| {
                if let Some(link) = &peer.link {
                    link.close();
                }
            })
            .await;
        info!(node = %self.id, "node stopped");
    }

    /// Keeps `listener` so that [`Node::shutdown`] can close it.
    pub(crate) async fn track_listener(&self, listener: T::Listener) -> Arc<T::Listener> {
        let listener = Arc::new(listener);
        self.listeners.lock().await.push(Arc::clone(&listener));
        listener
    }

    /// This node, or a peer with a registered link.
    async fn is_live(&self, id: NodeId) -> bool {
        id == self.id || self.registry.contains(id).await
    }

    async fn link_to(&self, id: NodeId) -> Option<T::Link> {
        self.registry.get(id).await.and_then(|peer| peer.link)
    }
}

//! Master election.
//!
//! Every node proposes the lowest identity it knows of and the answers move
//! that proposal towards the lowest live identity in the cluster: a peer
//! either yields to the candidate (`MasterNo`) or reports a lower master it
//! already follows (`MasterYes`). A round queries the registered peers one
//! after the other and ends with the winner announcing its state.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::Node;
use crate::error::{LinkError, NodeError};
use crate::identity::NodeId;
use crate::message::Message;
use crate::state::MasterAnswer;
use crate::transport::{Link, Transport};

/// One peer's answer to an `AreYouMaster` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    NotContested,
    Follows(NodeId),
}

impl<T: Transport> Node<T> {
    /// Establishes a master, running a round only if no live master is known.
    ///
    /// Returns the master this node follows afterwards.
    pub async fn elect(self: &Arc<Self>) -> Option<NodeId> {
        let _round = self.election.lock().await;
        if let Some(master) = self.live_master().await {
            if master != self.id {
                self.request_state(master).await;
            }
            return Some(master);
        }
        self.replica.claim_if_vacant(self.id).await;
        self.run_round().await
    }

    /// Runs a round even when a master is believed.
    ///
    /// Used after a link comes back, when the partitions on either side may
    /// each have settled on a different master.
    pub async fn reconcile(self: &Arc<Self>) -> Option<NodeId> {
        let _round = self.election.lock().await;
        if self.live_master().await.is_none() {
            self.replica.claim_if_vacant(self.id).await;
        }
        self.run_round().await
    }

    pub(super) fn spawn_election(self: &Arc<Self>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            node.elect().await;
        });
    }

    async fn run_round(self: &Arc<Self>) -> Option<NodeId> {
        let peers = self.registry.snapshot().await;
        debug!(node = %self.id, peers = peers.len(), "election round started");
        for peer in peers {
            if self.is_stopped() {
                return None;
            }
            let Some(link) = peer.link else { continue };
            let candidate = match self.live_master().await {
                Some(master) => master,
                None => self.replica.claim_if_vacant(self.id).await,
            };
            match self.ask(peer.id, &link, candidate).await {
                Ok(vote) => debug!(peer = %peer.id, %candidate, ?vote, "election answer"),
                Err(err) => warn!(peer = %peer.id, error = %err, "skipping peer in election"),
            }
        }
        self.conclude_round().await
    }

    /// Sends one query and waits, bounded, for the matching answer.
    async fn ask(&self, peer: NodeId, link: &T::Link, candidate: NodeId) -> Result<Vote, NodeError> {
        let (slot, answer) = oneshot::channel();
        self.votes.lock().await.insert(peer, slot);

        let result = self.await_vote(peer, link, candidate, answer).await;
        self.votes.lock().await.remove(&peer);
        result
    }

    async fn await_vote(
        &self,
        peer: NodeId,
        link: &T::Link,
        candidate: NodeId,
        answer: oneshot::Receiver<Vote>,
    ) -> Result<Vote, NodeError> {
        link.send_one_shot(&Message::AreYouMaster { candidate }).await?;
        match timeout(self.election_timeout, answer).await {
            Ok(Ok(vote)) => Ok(vote),
            // The slot is dropped when the peer's link goes away.
            Ok(Err(_)) => Err(NodeError::Link(LinkError::Closed)),
            Err(_) => Err(NodeError::ElectionTimeout {
                peer,
                timeout: self.election_timeout,
            }),
        }
    }

    async fn conclude_round(self: &Arc<Self>) -> Option<NodeId> {
        let Some(master) = self.live_master().await else {
            warn!(node = %self.id, "election round ended without a master");
            return None;
        };
        if master == self.id {
            info!(node = %self.id, "elected master");
            self.announce_state().await;
        } else {
            info!(node = %self.id, %master, "following master");
            self.request_state(master).await;
        }
        Some(master)
    }

    /// The believed master, dropping the belief if it names a departed peer.
    pub(super) async fn live_master(&self) -> Option<NodeId> {
        let master = self.replica.master().await?;
        if self.is_live(master).await {
            return Some(master);
        }
        self.replica.clear_master_if(master).await;
        None
    }

    pub(super) async fn answer_master_query(&self, candidate: NodeId) -> Message {
        self.live_master().await;
        match self.replica.answer_query(candidate).await {
            MasterAnswer::NotContested => Message::MasterNo,
            MasterAnswer::Follows(master) => Message::MasterYes { master },
        }
    }

    pub(super) async fn adopt_reported_master(&self, master: NodeId) {
        if self.is_live(master).await && self.replica.adopt_if_lower(master).await {
            info!(node = %self.id, %master, "adopted lower master");
        }
    }

    pub(super) async fn record_vote(&self, peer: NodeId, vote: Vote) {
        match self.votes.lock().await.remove(&peer) {
            Some(slot) => {
                let _ = slot.send(vote);
            }
            None => debug!(peer = %peer, ?vote, "election answer arrived after its round"),
        }
    }
}

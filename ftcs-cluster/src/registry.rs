//! Local view of cluster membership.
//!
//! The registry is plain per-node bookkeeping behind a tokio `RwLock`. Every
//! read hands out clones, so callers never hold the lock while they talk to
//! a peer.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::identity::NodeId;
use crate::transport::Link;

/// One cluster member as seen by this node.
#[derive(Clone)]
pub struct Peer<L> {
    pub id: NodeId,
    /// Dialed address for initiator peers, remote socket address otherwise.
    pub address: String,
    pub link: Option<L>,
    /// This node dialed the peer and is therefore the side that reconnects.
    pub is_initiator: bool,
}

impl<L: Link> Peer<L> {
    pub fn new(id: NodeId, address: String, link: L, is_initiator: bool) -> Self {
        Self {
            id,
            address,
            link: Some(link),
            is_initiator,
        }
    }

    fn uses_link(&self, link_id: u64) -> bool {
        self.link.as_ref().map(|link| link.id()) == Some(link_id)
    }
}

/// What [`PeerRegistry::admit`] did with a freshly handshaken link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Added,
    /// The peer was known over a link it is now superseded by.
    Replaced,
    /// The peer was known and its registered link stays.
    Kept,
    Rejected,
}

/// What [`PeerRegistry::release`] did after a link was lost.
pub enum Release<L> {
    /// The lost link was not the registered one.
    Secondary,
    /// Another link to the same peer took over the entry.
    Promoted,
    Removed(Peer<L>),
}

pub struct PeerRegistry<L> {
    local: NodeId,
    peers: RwLock<HashMap<NodeId, Peer<L>>>,
}

impl<L: Link> PeerRegistry<L> {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `peer` unless it is this node or already present.
    ///
    /// Returns `true` when the entry was inserted.
    pub async fn add(&self, peer: Peer<L>) -> bool {
        if peer.id == self.local {
            return false;
        }
        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.id) {
            return false;
        }
        peers.insert(peer.id, peer);
        true
    }

    pub async fn remove(&self, id: NodeId) -> Option<Peer<L>> {
        self.peers.write().await.remove(&id)
    }

    /// Registers `peer`, or settles a second link to a peer already known.
    ///
    /// Two nodes that dial each other at once end up with two links. Both
    /// sides keep the one dialed by the lower identity, so exactly one of
    /// them holds the registered link as initiator.
    pub async fn admit(&self, peer: Peer<L>) -> Admission {
        if peer.id == self.local {
            return Admission::Rejected;
        }
        let preferred = self.local.min(peer.id);
        let mut peers = self.peers.write().await;
        match peers.get(&peer.id) {
            None => {
                peers.insert(peer.id, peer);
                Admission::Added
            }
            Some(existing)
                if self.dialer(existing) != preferred && self.dialer(&peer) == preferred =>
            {
                peers.insert(peer.id, peer);
                Admission::Replaced
            }
            Some(_) => Admission::Kept,
        }
    }

    /// Detaches the lost link `link_id` from the entry for `id`.
    ///
    /// A stale link failing late must not evict a newer registration. When
    /// the registered link itself is lost, `survivor` (another live link to
    /// the same peer) takes over the entry along with the duty to re-dial.
    pub async fn release(
        &self,
        id: NodeId,
        link_id: u64,
        survivor: Option<Peer<L>>,
    ) -> Release<L> {
        let mut peers = self.peers.write().await;
        if !matches!(peers.get(&id), Some(peer) if peer.uses_link(link_id)) {
            return Release::Secondary;
        }
        let Some(lost) = peers.remove(&id) else {
            return Release::Secondary;
        };
        match survivor {
            Some(mut promoted) => {
                if lost.is_initiator && !promoted.is_initiator {
                    promoted.is_initiator = true;
                    promoted.address = lost.address;
                }
                peers.insert(id, promoted);
                Release::Promoted
            }
            None => Release::Removed(lost),
        }
    }

    pub async fn get(&self, id: NodeId) -> Option<Peer<L>> {
        self.peers.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: NodeId) -> bool {
        self.peers.read().await.contains_key(&id)
    }

    /// Copy of every entry, ordered by identity.
    pub async fn snapshot(&self) -> Vec<Peer<L>> {
        let mut peers: Vec<Peer<L>> = self.peers.read().await.values().cloned().collect();
        peers.sort_by_key(|peer| peer.id);
        peers
    }

    /// Visits a snapshot, so the visitor may freely mutate the registry.
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Peer<L>),
    {
        for peer in self.snapshot().await {
            visitor(&peer);
        }
    }

    pub async fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    fn dialer(&self, peer: &Peer<L>) -> NodeId {
        if peer.is_initiator {
            self.local
        } else {
            peer.id
        }
    }
}

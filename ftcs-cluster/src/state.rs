//! Replicated board plus the identity of the believed master.
//!
//! Both live behind one lock so that election answers and replication
//! updates observe a consistent pair. Every mutation replaces whole values.

use tokio::sync::RwLock;

use crate::board::BoardState;
use crate::identity::NodeId;

/// Copy of the replicated value handed out to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: BoardState,
    pub version: u64,
}

/// Answer to an `AreYouMaster` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterAnswer {
    /// The responder now follows the candidate.
    NotContested,
    /// The responder already follows a lower master.
    Follows(NodeId),
}

struct Replica {
    state: BoardState,
    version: u64,
    master: Option<NodeId>,
}

pub struct StateHolder {
    replica: RwLock<Replica>,
}

impl StateHolder {
    pub fn new(initial: BoardState) -> Self {
        Self {
            replica: RwLock::new(Replica {
                state: initial,
                version: 0,
                master: None,
            }),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let replica = self.replica.read().await;
        Snapshot {
            state: replica.state.clone(),
            version: replica.version,
        }
    }

    pub async fn master(&self) -> Option<NodeId> {
        self.replica.read().await.master
    }

    /// Records `id` as master when none is believed. Returns the belief afterwards.
    pub async fn claim_if_vacant(&self, id: NodeId) -> NodeId {
        let mut replica = self.replica.write().await;
        *replica.master.get_or_insert(id)
    }

    /// Clears the belief only while it still names `id`.
    pub async fn clear_master_if(&self, id: NodeId) -> bool {
        let mut replica = self.replica.write().await;
        if replica.master == Some(id) {
            replica.master = None;
            return true;
        }
        false
    }

    /// Resolves an election query from a peer proposing `candidate`.
    ///
    /// No belief, or a belief ordering above the candidate, yields to the
    /// candidate. A lower belief is reported back so the asker can adopt it.
    pub async fn answer_query(&self, candidate: NodeId) -> MasterAnswer {
        let mut replica = self.replica.write().await;
        match replica.master {
            Some(current) if current < candidate => MasterAnswer::Follows(current),
            _ => {
                replica.master = Some(candidate);
                MasterAnswer::NotContested
            }
        }
    }

    /// Adopts `master` if nothing is believed or it orders below the belief.
    pub async fn adopt_if_lower(&self, master: NodeId) -> bool {
        let mut replica = self.replica.write().await;
        match replica.master {
            Some(current) if current <= master => false,
            _ => {
                replica.master = Some(master);
                true
            }
        }
    }

    /// Applies state pushed by `sender`.
    ///
    /// The board is replaced unless `version` is older than the local one.
    /// The sender becomes the believed master unless a lower master is
    /// already believed and `keep_lower` says that belief is still live.
    /// Returns whether the board was replaced.
    pub async fn accept_from_master(
        &self,
        sender: NodeId,
        state: BoardState,
        version: u64,
        keep_lower: bool,
    ) -> bool {
        let mut replica = self.replica.write().await;
        let lower_believed = matches!(replica.master, Some(current) if current < sender);
        if !(lower_believed && keep_lower) {
            replica.master = Some(sender);
        }
        if version < replica.version {
            return false;
        }
        replica.state = state;
        replica.version = version;
        true
    }

    /// Installs a locally accepted update as the next version.
    pub async fn apply_update(&self, state: BoardState) -> Snapshot {
        let mut replica = self.replica.write().await;
        replica.version += 1;
        replica.state = state;
        Snapshot {
            state: replica.state.clone(),
            version: replica.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::board::Turn;

    fn id(n: u128) -> NodeId {
        NodeId::from(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn first_query_without_master_records_the_candidate() {
        let holder = StateHolder::new(BoardState::initial());
        assert_eq!(holder.answer_query(id(5)).await, MasterAnswer::NotContested);
        assert_eq!(holder.master().await, Some(id(5)));

        assert_eq!(holder.answer_query(id(5)).await, MasterAnswer::NotContested);
        assert_eq!(holder.answer_query(id(9)).await, MasterAnswer::Follows(id(5)));
        assert_eq!(holder.answer_query(id(2)).await, MasterAnswer::NotContested);
        assert_eq!(holder.master().await, Some(id(2)));
    }

    #[tokio::test]
    async fn self_claim_is_visible_to_concurrent_queries() {
        let holder = StateHolder::new(BoardState::initial());
        assert_eq!(holder.claim_if_vacant(id(3)).await, id(3));
        assert_eq!(holder.claim_if_vacant(id(1)).await, id(3));
        assert_eq!(holder.answer_query(id(7)).await, MasterAnswer::Follows(id(3)));
    }

    #[tokio::test]
    async fn adoption_only_moves_towards_lower_identities() {
        let holder = StateHolder::new(BoardState::initial());
        assert!(holder.adopt_if_lower(id(4)).await);
        assert!(!holder.adopt_if_lower(id(6)).await);
        assert!(!holder.adopt_if_lower(id(4)).await);
        assert!(holder.adopt_if_lower(id(1)).await);
        assert!(!holder.clear_master_if(id(4)).await);
        assert!(holder.clear_master_if(id(1)).await);
        assert_eq!(holder.master().await, None);
    }

    #[tokio::test]
    async fn stale_versions_never_replace_newer_state() {
        let holder = StateHolder::new(BoardState::initial());
        let mut newer = BoardState::initial();
        newer.turn = Turn::Black;
        let applied = holder.apply_update(newer.clone()).await;
        assert_eq!(applied.version, 1);

        let replaced = holder
            .accept_from_master(id(1), BoardState::initial(), 0, true)
            .await;
        assert!(!replaced);
        assert_eq!(holder.snapshot().await.state, newer);
        assert_eq!(holder.master().await, Some(id(1)));

        let mut newest = newer.clone();
        newest.game_started = true;
        assert!(holder.accept_from_master(id(1), newest.clone(), 2, true).await);
        assert_eq!(
            holder.snapshot().await,
            Snapshot {
                state: newest,
                version: 2
            }
        );
    }

    #[tokio::test]
    async fn live_lower_master_survives_a_push_from_a_higher_sender() {
        let holder = StateHolder::new(BoardState::initial());
        holder.adopt_if_lower(id(1)).await;

        holder.accept_from_master(id(8), BoardState::initial(), 0, true).await;
        assert_eq!(holder.master().await, Some(id(1)));

        holder.accept_from_master(id(8), BoardState::initial(), 0, false).await;
        assert_eq!(holder.master().await, Some(id(8)));
    }
}

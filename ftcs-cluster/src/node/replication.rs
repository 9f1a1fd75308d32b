use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::Node;
use crate::board::BoardState;
use crate::error::{LinkError, NodeError};
use crate::identity::NodeId;
use crate::message::Message;
use crate::state::Snapshot;
use crate::transport::{Link, Transport};

impl<T: Transport> Node<T> {
    /// Routes a client update to the master.
    ///
    /// On the master the update is applied immediately and fanned out. Any
    /// other node forwards it and returns once the forward is sent; the local
    /// copy changes when the master's fan-out arrives.
    pub async fn submit_state(self: &Arc<Self>, state: BoardState) -> Result<(), NodeError> {
        let master = self.live_master().await.ok_or(NodeError::NoMaster)?;
        if master == self.id {
            self.apply_and_fan_out(state).await;
            return Ok(());
        }

        let link = self.link_to(master).await.ok_or(NodeError::NoMaster)?;
        link.send_one_shot(&Message::StateToMaster { state }).await?;
        debug!(%master, "forwarded state update to master");
        Ok(())
    }

    /// Installs `state` as the next version and pushes it to every peer.
    pub(super) async fn apply_and_fan_out(&self, state: BoardState) -> Snapshot {
        let snapshot = self.replica.apply_update(state).await;
        info!(node = %self.id, version = snapshot.version, "applied state update");
        self.broadcast(&Message::StateFromMaster {
            state: snapshot.state.clone(),
            version: snapshot.version,
        })
        .await;
        snapshot
    }

    pub(super) async fn announce_state(&self) {
        let snapshot = self.replica.snapshot().await;
        self.broadcast(&Message::StateFromMaster {
            state: snapshot.state,
            version: snapshot.version,
        })
        .await;
    }

    pub(super) async fn request_state(&self, master: NodeId) {
        let Some(link) = self.link_to(master).await else {
            warn!(%master, "no link to master, cannot request state");
            return;
        };
        if let Err(err) = link.send_one_shot(&Message::RequestState).await {
            warn!(%master, error = %err, "failed to request state");
        }
    }

    /// Installs state pushed by `sender`.
    ///
    /// A stale push is answered with the local snapshot, so a master that
    /// joined with an old board catches up before its next update.
    pub(super) async fn accept_replicated(
        &self,
        sender: NodeId,
        link: &T::Link,
        state: BoardState,
        version: u64,
    ) -> Result<(), LinkError> {
        let keep_lower = match self.replica.master().await {
            Some(current) => current != sender && self.is_live(current).await,
            None => false,
        };
        if self
            .replica
            .accept_from_master(sender, state, version, keep_lower)
            .await
        {
            debug!(%sender, version, "installed replicated state");
            return Ok(());
        }

        let local = self.replica.snapshot().await;
        debug!(%sender, version, local = local.version, "answering stale state with newer snapshot");
        link.send_one_shot(&Message::StateFromMaster {
            state: local.state,
            version: local.version,
        })
        .await
    }

    /// Sends `message` to every registered peer concurrently.
    async fn broadcast(&self, message: &Message) {
        let peers = self.registry.snapshot().await;
        let sends = peers.iter().filter_map(|peer| {
            let link = peer.link.as_ref()?;
            Some(async move { (peer.id, link.send_one_shot(message).await) })
        });
        for (peer, result) in join_all(sends).await {
            if let Err(err) = result {
                warn!(%peer, kind = message.kind(), error = %err, "fan-out failed");
            }
        }
    }
}

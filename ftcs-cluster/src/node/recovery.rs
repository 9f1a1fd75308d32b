use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{HandshakeOutcome, Node};
use crate::identity::NodeId;
use crate::transport::Transport;

impl<T: Transport> Node<T> {
    /// Starts re-dialing a peer this node had dialed before.
    pub(super) fn spawn_recovery(self: &Arc<Self>, peer: NodeId, address: String) {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.recover(peer, address).await });
    }

    /// Re-dials `address` at a fixed interval until a handshake succeeds or
    /// the node stops, then reconciles the election.
    async fn recover(self: Arc<Self>, peer: NodeId, address: String) {
        info!(%peer, %address, interval = ?self.recovery_interval, "starting recovery");
        let mut attempts: u64 = 0;
        loop {
            tokio::time::sleep(self.recovery_interval).await;
            if self.is_stopped() {
                debug!(%peer, "recovery cancelled by shutdown");
                return;
            }

            attempts += 1;
            match self.connect(&address).await {
                Ok(HandshakeOutcome::Registered(id) | HandshakeOutcome::AlreadyKnown(id)) => {
                    if id == peer {
                        info!(%peer, attempts, "peer recovered");
                    } else {
                        warn!(%peer, found = %id, %address, "address now answers with another node");
                    }
                    self.reconcile().await;
                    return;
                }
                Ok(HandshakeOutcome::SelfConnection) => {
                    warn!(%peer, %address, "address now loops back to this node, giving up");
                    return;
                }
                Err(err) => debug!(%peer, attempts, error = %err, "re-dial failed"),
            }
        }
    }
}

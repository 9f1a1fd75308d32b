use std::time::Duration;

use thiserror::Error;

use crate::identity::NodeId;

/// Failures of a single link or of the transport that produces links.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },
    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },
    #[error("link closed")]
    Closed,
    #[error("link lost: {0}")]
    Lost(String),
    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

impl LinkError {
    /// Codec failures spoil one exchange; every other variant means the link is gone.
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            LinkError::Encode(_) | LinkError::Decode(_) | LinkError::TooLarge { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("invalid handshake: expected Ping or Pong, got {0}")]
    InvalidHandshake(&'static str),
    #[error("no reachable master")]
    NoMaster,
    #[error("peer {peer} did not answer within {timeout:?}")]
    ElectionTimeout { peer: NodeId, timeout: Duration },
    #[error("unrecognized request: {0}")]
    UnrecognizedClientRequest(String),
    #[error("node is shutting down")]
    Stopped,
}

use serde::{Deserialize, Serialize};

use crate::board::BoardState;
use crate::error::LinkError;
use crate::identity::NodeId;

/// Upper bound on one encoded message. A board is well under 1 KiB.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Every value that travels over a peer or client stream.
///
/// One stream carries exactly one message; there are no sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Identity announcement sent by the dialing side.
    Ping { id: NodeId },
    /// Identity reply from the accepting side.
    Pong { id: NodeId },
    /// Election query carrying the sender's current candidate.
    AreYouMaster { candidate: NodeId },
    /// The responder already follows a lower master.
    MasterYes { master: NodeId },
    /// The responder does not contest the candidate.
    MasterNo,
    /// Pull the holder's state. Also the client read request.
    RequestState,
    /// A state update forwarded to the master for fan-out.
    StateToMaster { state: BoardState },
    /// State pushed by the master, or a newer snapshot answering a stale push.
    StateFromMaster { state: BoardState, version: u64 },
    /// Client write request.
    SubmitState { state: BoardState },
    /// Client read response.
    SendState { state: BoardState, version: u64 },
    /// Error report returned to a client.
    ClientError { message: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "Ping",
            Message::Pong { .. } => "Pong",
            Message::AreYouMaster { .. } => "AreYouMaster",
            Message::MasterYes { .. } => "MasterYes",
            Message::MasterNo => "MasterNo",
            Message::RequestState => "RequestState",
            Message::StateToMaster { .. } => "StateToMaster",
            Message::StateFromMaster { .. } => "StateFromMaster",
            Message::SubmitState { .. } => "SubmitState",
            Message::SendState { .. } => "SendState",
            Message::ClientError { .. } => "ClientError",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        let bytes = bincode::serialize(self).map_err(LinkError::Encode)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(LinkError::TooLarge {
                size: bytes.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(LinkError::TooLarge {
                size: bytes.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        bincode::deserialize(bytes).map_err(LinkError::Decode)
    }
}

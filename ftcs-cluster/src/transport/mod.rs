//! Secure multiplexed links between nodes.
//!
//! The coordination engine only sees the traits in this module. A link
//! carries any number of independent exchanges, each on its own stream, so
//! a stalled exchange never blocks an unrelated one:
//!
//! - one-shot exchanges ([`Link::send_one_shot`] / [`Link::receive_one_shot`])
//!   open a unidirectional stream, write a single message and finish it;
//! - request exchanges ([`Link::request`] / [`Link::accept_request`]) open a
//!   bidirectional stream carrying one request and one response.
//!
//! [`quic`] is the production transport, [`memory`] an in-process network
//! for tests and simulations.

pub mod memory;
pub mod quic;

use async_trait::async_trait;

use crate::error::LinkError;
use crate::message::Message;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Link;
    type Listener: Listener<Link = Self::Link>;

    /// Opens a link to `address`.
    async fn dial(&self, address: &str) -> Result<Self::Link, LinkError>;

    /// Binds a listener on `address`.
    async fn listen(&self, address: &str) -> Result<Self::Listener, LinkError>;
}

#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Link: Link;

    /// Waits for the next inbound link.
    async fn accept(&self) -> Result<Self::Link, LinkError>;

    fn local_addr(&self) -> String;

    /// Stops accepting. Pending and later `accept` calls fail.
    async fn close(&self);
}

#[async_trait]
pub trait Link: Clone + Send + Sync + 'static {
    type Reply: Reply;

    /// Identifier that is unique among the links of one process.
    fn id(&self) -> u64;

    /// Human readable remote address, for diagnostics.
    fn remote(&self) -> String;

    async fn send_one_shot(&self, message: &Message) -> Result<(), LinkError>;

    async fn receive_one_shot(&self) -> Result<Message, LinkError>;

    async fn request(&self, message: &Message) -> Result<Message, LinkError>;

    async fn accept_request(&self) -> Result<IncomingRequest<Self::Reply>, LinkError>;

    /// Closes the link. Every task blocked on it fails promptly.
    fn close(&self);
}

#[async_trait]
pub trait Reply: Send + 'static {
    async fn respond(self, message: &Message) -> Result<(), LinkError>;
}

/// One inbound request stream.
///
/// The payload is kept as a `Result` so the responder can still answer a
/// request it failed to decode.
pub struct IncomingRequest<R> {
    pub payload: Result<Message, LinkError>,
    pub reply: R,
}

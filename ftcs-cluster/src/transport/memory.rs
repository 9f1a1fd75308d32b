//! In-process network used by tests and simulations.
//!
//! Addresses are plain strings registered by [`MemoryNetwork::listen`].
//! Dialing builds a pair of connected links over tokio channels. Messages
//! still go through the wire codec so that encoding bugs surface here too.
//! Both ends share one close flag: closing either end fails both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::debug;

use super::{IncomingRequest, Link, Listener, Reply, Transport};
use crate::error::LinkError;
use crate::message::Message;

type BiFrame = (Vec<u8>, oneshot::Sender<Vec<u8>>);

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<MemoryLink>>>,
    next_link: AtomicU64,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_link_id(&self) -> u64 {
        self.inner.next_link.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    type Link = MemoryLink;
    type Listener = MemoryListener;

    async fn dial(&self, address: &str) -> Result<MemoryLink, LinkError> {
        let listeners = self.inner.listeners.lock().await;
        let Some(incoming) = listeners.get(address) else {
            return Err(LinkError::Dial {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        };

        let id = self.next_link_id();
        let (local, remote) = MemoryLink::pair(id, format!("memory-dialer-{id}"), address.to_string());
        incoming.send(remote).map_err(|_| LinkError::Dial {
            address: address.to_string(),
            reason: "listener closed".to_string(),
        })?;
        Ok(local)
    }

    async fn listen(&self, address: &str) -> Result<MemoryListener, LinkError> {
        let mut listeners = self.inner.listeners.lock().await;
        if listeners.contains_key(address) {
            return Err(LinkError::Bind {
                address: address.to_string(),
                reason: "address in use".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        listeners.insert(address.to_string(), tx);
        Ok(MemoryListener {
            address: address.to_string(),
            network: self.clone(),
            incoming: Mutex::new(rx),
            closed: watch::channel(false).0,
        })
    }
}

pub struct MemoryListener {
    address: String,
    network: MemoryNetwork,
    incoming: Mutex<mpsc::UnboundedReceiver<MemoryLink>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Listener for MemoryListener {
    type Link = MemoryLink;

    async fn accept(&self) -> Result<MemoryLink, LinkError> {
        let closed = self.closed.subscribe();
        let mut incoming = self.incoming.lock().await;
        select! {
            _ = wait_closed(closed) => Err(LinkError::Closed),
            link = incoming.recv() => link.ok_or(LinkError::Closed),
        }
    }

    fn local_addr(&self) -> String {
        self.address.clone()
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        self.network.inner.listeners.lock().await.remove(&self.address);
    }
}

#[derive(Clone)]
pub struct MemoryLink {
    id: u64,
    remote: String,
    uni_tx: mpsc::UnboundedSender<Vec<u8>>,
    uni_rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    bi_tx: mpsc::UnboundedSender<BiFrame>,
    bi_rx: Arc<Mutex<mpsc::UnboundedReceiver<BiFrame>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryLink {
    /// Builds two connected ends. The first is handed to the dialer.
    fn pair(id: u64, dialer: String, listener: String) -> (Self, Self) {
        let (dialer_uni_tx, listener_uni_rx) = mpsc::unbounded_channel();
        let (listener_uni_tx, dialer_uni_rx) = mpsc::unbounded_channel();
        let (dialer_bi_tx, listener_bi_rx) = mpsc::unbounded_channel();
        let (listener_bi_tx, dialer_bi_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::channel(false).0);

        let dialer_end = Self {
            id,
            remote: listener,
            uni_tx: dialer_uni_tx,
            uni_rx: Arc::new(Mutex::new(dialer_uni_rx)),
            bi_tx: dialer_bi_tx,
            bi_rx: Arc::new(Mutex::new(dialer_bi_rx)),
            closed: Arc::clone(&closed),
        };
        let listener_end = Self {
            id,
            remote: dialer,
            uni_tx: listener_uni_tx,
            uni_rx: Arc::new(Mutex::new(listener_uni_rx)),
            bi_tx: listener_bi_tx,
            bi_rx: Arc::new(Mutex::new(listener_bi_rx)),
            closed,
        };
        (dialer_end, listener_end)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Link for MemoryLink {
    type Reply = MemoryReply;

    fn id(&self) -> u64 {
        self.id
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }

    async fn send_one_shot(&self, message: &Message) -> Result<(), LinkError> {
        self.ensure_open()?;
        let bytes = message.encode()?;
        self.uni_tx.send(bytes).map_err(|_| LinkError::Closed)?;
        debug!(remote = %self.remote, kind = message.kind(), "sent one-shot");
        Ok(())
    }

    async fn receive_one_shot(&self) -> Result<Message, LinkError> {
        self.ensure_open()?;
        let closed = self.closed.subscribe();
        let mut uni_rx = self.uni_rx.lock().await;
        let bytes = select! {
            _ = wait_closed(closed) => return Err(LinkError::Closed),
            bytes = uni_rx.recv() => bytes.ok_or(LinkError::Closed)?,
        };
        let message = Message::decode(&bytes)?;
        debug!(remote = %self.remote, kind = message.kind(), "received one-shot");
        Ok(message)
    }

    async fn request(&self, message: &Message) -> Result<Message, LinkError> {
        self.ensure_open()?;
        let bytes = message.encode()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.bi_tx
            .send((bytes, reply_tx))
            .map_err(|_| LinkError::Closed)?;

        let closed = self.closed.subscribe();
        let response = select! {
            _ = wait_closed(closed) => return Err(LinkError::Closed),
            response = reply_rx => response.map_err(|_| LinkError::Lost("request stream reset".into()))?,
        };
        Message::decode(&response)
    }

    async fn accept_request(&self) -> Result<IncomingRequest<MemoryReply>, LinkError> {
        self.ensure_open()?;
        let closed = self.closed.subscribe();
        let mut bi_rx = self.bi_rx.lock().await;
        let (bytes, reply) = select! {
            _ = wait_closed(closed) => return Err(LinkError::Closed),
            frame = bi_rx.recv() => frame.ok_or(LinkError::Closed)?,
        };
        Ok(IncomingRequest {
            payload: Message::decode(&bytes),
            reply: MemoryReply { reply },
        })
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

pub struct MemoryReply {
    reply: oneshot::Sender<Vec<u8>>,
}

#[async_trait]
impl Reply for MemoryReply {
    async fn respond(self, message: &Message) -> Result<(), LinkError> {
        let bytes = message.encode()?;
        self.reply.send(bytes).map_err(|_| LinkError::Closed)
    }
}

/// Resolves once the close flag is set or every sender is gone.
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::identity::NodeId;

    #[tokio::test]
    async fn one_shot_messages_reach_the_other_end() {
        let network = MemoryNetwork::new();
        let listener = network.listen("node-a").await.expect("listen");
        let dialer = network.dial("node-a").await.expect("dial");
        let accepted = listener.accept().await.expect("accept");

        let id = NodeId::generate();
        dialer
            .send_one_shot(&Message::Ping { id })
            .await
            .expect("send");
        let received = accepted.receive_one_shot().await.expect("receive");

        assert_eq!(received, Message::Ping { id });
        assert_eq!(dialer.id(), accepted.id());
        assert_eq!(dialer.remote(), "node-a");
    }

    #[tokio::test]
    async fn request_is_answered_on_its_own_stream() {
        let network = MemoryNetwork::new();
        let listener = network.listen("node-a").await.expect("listen");
        let dialer = network.dial("node-a").await.expect("dial");
        let accepted = listener.accept().await.expect("accept");

        let server = tokio::spawn(async move {
            let incoming = accepted.accept_request().await.expect("accept request");
            assert_eq!(incoming.payload.expect("payload"), Message::RequestState);
            incoming
                .reply
                .respond(&Message::ClientError {
                    message: "nope".into(),
                })
                .await
                .expect("respond");
        });

        let response = dialer.request(&Message::RequestState).await.expect("request");
        assert_eq!(
            response,
            Message::ClientError {
                message: "nope".into()
            }
        );
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn closing_one_end_fails_pending_receives_on_both() {
        let network = MemoryNetwork::new();
        let listener = network.listen("node-a").await.expect("listen");
        let dialer = network.dial("node-a").await.expect("dial");
        let accepted = listener.accept().await.expect("accept");

        let waiting = {
            let accepted = accepted.clone();
            tokio::spawn(async move { accepted.receive_one_shot().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        dialer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("receive should fail promptly")
            .expect("task");
        assert!(matches!(result, Err(LinkError::Closed)));
        assert!(dialer.send_one_shot(&Message::MasterNo).await.is_err());
        assert!(accepted.is_closed());
    }

    #[tokio::test]
    async fn dialing_a_closed_listener_is_refused() {
        let network = MemoryNetwork::new();
        let listener = network.listen("node-a").await.expect("listen");
        listener.close().await;

        assert!(matches!(listener.accept().await, Err(LinkError::Closed)));
        assert!(matches!(
            network.dial("node-a").await,
            Err(LinkError::Dial { .. })
        ));
    }

    #[tokio::test]
    async fn address_can_only_be_bound_once() {
        let network = MemoryNetwork::new();
        let _listener = network.listen("node-a").await.expect("listen");
        assert!(matches!(
            network.listen("node-a").await,
            Err(LinkError::Bind { .. })
        ));
    }
}

//! Client-facing request handling.
//!
//! Each accepted client link may carry any number of requests, one per
//! bidirectional stream. Requests are answered independently so a slow
//! submit never holds up a read.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LinkError, NodeError};
use crate::message::Message;
use crate::node::Node;
use crate::transport::{IncomingRequest, Link, Listener, Reply, Transport};

type RequestOf<T> = IncomingRequest<<<T as Transport>::Link as Link>::Reply>;

/// Spawns the accept loop for client links.
pub async fn serve_clients<T: Transport>(node: Arc<Node<T>>, listener: T::Listener) -> JoinHandle<()> {
    let listener = node.track_listener(listener).await;
    tokio::spawn(async move {
        info!(address = %listener.local_addr(), "accepting clients");
        loop {
            match listener.accept().await {
                Ok(link) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move { serve_client(node, link).await });
                }
                Err(LinkError::Closed) => break,
                Err(err) => warn!(error = %err, "failed to accept client link"),
            }
        }
        debug!("client accept loop stopped");
    })
}

async fn serve_client<T: Transport>(node: Arc<Node<T>>, link: T::Link) {
    let remote = link.remote();
    debug!(%remote, "client connected");
    loop {
        match link.accept_request().await {
            Ok(request) => {
                let node = Arc::clone(&node);
                tokio::spawn(async move { answer::<T>(node, request).await });
            }
            Err(err) => {
                debug!(%remote, error = %err, "client disconnected");
                return;
            }
        }
    }
}

async fn answer<T: Transport>(node: Arc<Node<T>>, request: RequestOf<T>) {
    let response = respond_to(&node, request.payload).await;
    if let Err(err) = request.reply.respond(&response).await {
        debug!(error = %err, "failed to deliver client response");
    }
}

/// Computes the response to one client request.
pub async fn respond_to<T: Transport>(
    node: &Arc<Node<T>>,
    payload: Result<Message, LinkError>,
) -> Message {
    match payload {
        Ok(Message::RequestState) => current_state(node).await,
        Ok(Message::SubmitState { state }) => match node.submit_state(state).await {
            Ok(()) => current_state(node).await,
            Err(err) => {
                warn!(error = %err, "client update rejected");
                Message::ClientError {
                    message: err.to_string(),
                }
            }
        },
        Ok(other) => unrecognized(other.kind()),
        Err(err) => {
            warn!(error = %err, "undecodable client request");
            unrecognized("undecodable payload")
        }
    }
}

async fn current_state<T: Transport>(node: &Arc<Node<T>>) -> Message {
    let snapshot = node.snapshot().await;
    Message::SendState {
        state: snapshot.state,
        version: snapshot.version,
    }
}

fn unrecognized(kind: &str) -> Message {
    Message::ClientError {
        message: NodeError::UnrecognizedClientRequest(kind.to_string()).to_string(),
    }
}

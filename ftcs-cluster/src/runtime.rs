//! Process-level wiring for one node.
//!
//! [`start`] binds both listeners, joins the cluster through the bootstrap
//! list and runs the first election. Only binding failures are fatal.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::node::Node;
use crate::responder;
use crate::transport::{Listener, Transport};

pub struct RunningNode<T: Transport> {
    node: Arc<Node<T>>,
    peer_addr: String,
    client_addr: String,
    tasks: Vec<JoinHandle<()>>,
}

pub async fn start<T: Transport>(transport: T, config: &NodeConfig) -> Result<RunningNode<T>> {
    let peer_listener = transport
        .listen(&config.peer_listen)
        .await
        .with_context(|| format!("failed to bind peer listener on {}", config.peer_listen))?;
    let client_listener = transport
        .listen(&config.client_listen)
        .await
        .with_context(|| format!("failed to bind client listener on {}", config.client_listen))?;
    let peer_addr = peer_listener.local_addr();
    let client_addr = client_listener.local_addr();

    let node = Node::new(transport, config);
    let tasks = vec![
        node.serve_peers(peer_listener).await,
        responder::serve_clients(Arc::clone(&node), client_listener).await,
    ];

    node.bootstrap(&config.bootstrap).await;
    match node.elect().await {
        Some(master) => info!(node = %node.id(), %master, "joined cluster"),
        None => warn!(node = %node.id(), "started without a master"),
    }

    Ok(RunningNode {
        node,
        peer_addr,
        client_addr,
        tasks,
    })
}

impl<T: Transport> RunningNode<T> {
    pub fn node(&self) -> &Arc<Node<T>> {
        &self.node
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    /// Serves until `shutdown` resolves, then stops the node.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        shutdown.await;
        self.stop().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Closes listeners and links and waits for both accept loops to finish.
    pub async fn stop(self) {
        info!(node = %self.node.id(), "shutting down");
        self.node.shutdown().await;
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = ?err, "accept loop ended abnormally");
            }
        }
    }
}

//! Test harness shared by the integration tests.
//!
//! Clusters run over the in-memory network with short recovery and
//! election timings so that failure scenarios settle in well under a second.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use futures::future::join_all;
use ftcs_cluster::board::BoardState;
use ftcs_cluster::config::NodeConfig;
use ftcs_cluster::identity::NodeId;
use ftcs_cluster::node::Node;
use ftcs_cluster::runtime::{self, RunningNode};
use ftcs_cluster::transport::memory::MemoryNetwork;

pub const RECOVERY_INTERVAL: Duration = Duration::from_millis(100);
pub const ELECTION_TIMEOUT: Duration = Duration::from_millis(500);
pub const SETTLE: Duration = Duration::from_secs(5);

const POLL: Duration = Duration::from_millis(20);

pub fn peer_address(index: usize) -> String {
    format!("peer-{index}")
}

pub fn client_address(index: usize) -> String {
    format!("client-{index}")
}

pub fn test_config(index: usize, bootstrap: Vec<String>) -> NodeConfig {
    NodeConfig {
        peer_listen: peer_address(index),
        client_listen: client_address(index),
        ..NodeConfig::default()
    }
    .with_bootstrap(bootstrap)
    .with_recovery_interval(RECOVERY_INTERVAL)
    .with_election_timeout(ELECTION_TIMEOUT)
}

/// A cluster of nodes sharing one in-memory network.
pub struct TestCluster {
    pub network: MemoryNetwork,
    nodes: Vec<Option<RunningNode<MemoryNetwork>>>,
}

impl TestCluster {
    /// Starts `n` nodes one after another. Every node bootstraps from the
    /// full address list, its own address included, so later nodes dial the
    /// earlier ones and the result is a full mesh.
    pub async fn spawn(n: usize) -> Result<Self> {
        let network = MemoryNetwork::new();
        let addresses: Vec<String> = (0..n).map(peer_address).collect();

        let mut nodes = Vec::new();
        for index in 0..n {
            let config = test_config(index, addresses.clone());
            nodes.push(Some(runtime::start(network.clone(), &config).await?));
        }

        Ok(Self { network, nodes })
    }

    /// Starts `n` nodes at once on separate tasks, so none of them believes
    /// in a master when the others come up. Each node dials every address
    /// right after binding, which links every pair through whichever of the
    /// two bound last.
    pub async fn spawn_concurrent(n: usize) -> Result<Self> {
        let network = MemoryNetwork::new();
        let addresses: Vec<String> = (0..n).map(peer_address).collect();

        let starts = (0..n).map(|index| {
            let network = network.clone();
            let config = test_config(index, addresses.clone());
            tokio::spawn(async move { runtime::start(network, &config).await })
        });
        let mut nodes = Vec::new();
        for started in join_all(starts).await {
            nodes.push(Some(started??));
        }

        Ok(Self { network, nodes })
    }

    /// Node by 0-based index. Panics if the node was stopped.
    pub fn node(&self, index: usize) -> &Arc<Node<MemoryNetwork>> {
        self.nodes[index]
            .as_ref()
            .expect("node was stopped")
            .node()
    }

    pub fn live(&self) -> impl Iterator<Item = (usize, &Arc<Node<MemoryNetwork>>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, running)| running.as_ref().map(|running| (index, running.node())))
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.live()
            .find(|(_, node)| node.id() == id)
            .map(|(index, _)| index)
    }

    pub fn lowest_live_id(&self) -> NodeId {
        self.live()
            .map(|(_, node)| node.id())
            .min()
            .expect("cluster has live nodes")
    }

    pub async fn stop(&mut self, index: usize) {
        if let Some(running) = self.nodes[index].take() {
            running.stop().await;
        }
    }

    pub async fn shutdown(mut self) {
        for index in 0..self.nodes.len() {
            self.stop(index).await;
        }
    }

    /// Waits until every live node is connected to every other live node.
    pub async fn wait_for_full_mesh(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let expected = self.live().count() - 1;
        loop {
            let mut complete = true;
            for (_, node) in self.live() {
                if node.registry().len().await != expected {
                    complete = false;
                    break;
                }
            }
            if complete {
                return Ok(());
            }
            if start.elapsed() > timeout {
                bail!("timeout waiting for every node to see {expected} peers");
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Waits until every live node follows the same live master and exactly
    /// one node considers itself master. Returns that master.
    pub async fn wait_for_single_master(&self, timeout: Duration) -> Result<NodeId> {
        let start = Instant::now();
        loop {
            if let Some(master) = self.agreed_master().await {
                return Ok(master);
            }
            if start.elapsed() > timeout {
                let mut beliefs = Vec::new();
                for (index, node) in self.live() {
                    beliefs.push((index, node.master().await));
                }
                bail!("timeout waiting for a single master, beliefs: {beliefs:?}");
            }
            tokio::time::sleep(POLL).await;
        }
    }

    async fn agreed_master(&self) -> Option<NodeId> {
        let mut agreed = None;
        let mut masters = 0;
        for (_, node) in self.live() {
            let belief = node.master().await?;
            if *agreed.get_or_insert(belief) != belief {
                return None;
            }
            if node.is_master().await {
                masters += 1;
            }
        }
        let master = agreed?;
        (masters == 1 && self.index_of(master).is_some()).then_some(master)
    }

    /// Waits until every live node holds `expected`.
    pub async fn wait_for_state(&self, expected: &BoardState, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            let mut converged = true;
            for (_, node) in self.live() {
                if &node.snapshot().await.state != expected {
                    converged = false;
                    break;
                }
            }
            if converged {
                return Ok(());
            }
            if start.elapsed() > timeout {
                bail!("timeout waiting for state to replicate");
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

/// Polls `node` until it has `peer` registered (or not, per `present`).
pub async fn wait_for_peer(
    node: &Arc<Node<MemoryNetwork>>,
    peer: NodeId,
    present: bool,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if node.registry().contains(peer).await == present {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timeout waiting for peer {peer} present={present}");
        }
        tokio::time::sleep(POLL).await;
    }
}

/// A board that differs from the initial one.
pub fn started_board(black_moves: &[(usize, usize)]) -> BoardState {
    let mut board = BoardState::initial();
    board.game_started = true;
    for &(row, col) in black_moves {
        board.cells[row][col] = ftcs_cluster::board::Cell::Black;
    }
    board.turn = ftcs_cluster::board::Turn::White;
    board
}

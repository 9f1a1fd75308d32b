//! Integration tests for state replication and the client-facing responder.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use common::{
    client_address, peer_address, started_board, test_config, wait_for_peer, TestCluster, SETTLE,
};
use ftcs_cluster::board::BoardState;
use ftcs_cluster::identity::NodeId;
use ftcs_cluster::message::Message;
use ftcs_cluster::node::Node;
use ftcs_cluster::runtime;
use ftcs_cluster::transport::memory::MemoryNetwork;
use ftcs_cluster::transport::{Link, Transport};

/// Index of some live node that is not the master.
fn follower_index(cluster: &TestCluster, master: NodeId) -> usize {
    cluster
        .live()
        .find(|(_, node)| node.id() != master)
        .map(|(index, _)| index)
        .expect("cluster has a follower")
}

#[tokio::test]
async fn update_on_the_master_reaches_every_node() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    cluster.wait_for_full_mesh(SETTLE).await?;
    let master = cluster.wait_for_single_master(SETTLE).await?;
    let master_index = cluster.index_of(master).context("master is live")?;

    let board = started_board(&[(2, 3)]);
    cluster.node(master_index).submit_state(board.clone()).await?;

    cluster.wait_for_state(&board, SETTLE).await?;
    for (_, node) in cluster.live() {
        assert_eq!(node.snapshot().await.version, 1);
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn update_on_a_follower_is_forwarded_to_the_master() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    cluster.wait_for_full_mesh(SETTLE).await?;
    let master = cluster.wait_for_single_master(SETTLE).await?;
    let follower = follower_index(&cluster, master);

    let first = started_board(&[(2, 3)]);
    cluster.node(follower).submit_state(first.clone()).await?;
    cluster.wait_for_state(&first, SETTLE).await?;

    let second = started_board(&[(2, 3), (5, 4)]);
    cluster.node(follower).submit_state(second.clone()).await?;
    cluster.wait_for_state(&second, SETTLE).await?;

    let master_index = cluster.index_of(master).context("master is live")?;
    assert_eq!(cluster.node(master_index).snapshot().await.version, 2);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn late_joiner_catches_up_whichever_node_ends_up_master() -> Result<()> {
    let network = MemoryNetwork::new();
    let addresses: Vec<String> = (0..3).map(peer_address).collect();
    let first = runtime::start(network.clone(), &test_config(0, addresses.clone())).await?;
    let second = runtime::start(network.clone(), &test_config(1, addresses.clone())).await?;
    wait_for_peer(second.node(), first.node().id(), true, SETTLE).await?;
    second.node().elect().await.context("two nodes elect a master")?;

    let board = started_board(&[(2, 3)]);
    second.node().submit_state(board.clone()).await?;
    wait_for_version(first.node(), 1).await?;

    // The joiner may have the lowest identity and take over with version 0.
    let third = runtime::start(network.clone(), &test_config(2, addresses)).await?;
    wait_for_peer(third.node(), first.node().id(), true, SETTLE).await?;
    wait_for_peer(third.node(), second.node().id(), true, SETTLE).await?;
    wait_for_version(third.node(), 1).await?;

    let next = started_board(&[(2, 3), (4, 5)]);
    third.node().submit_state(next.clone()).await?;
    for running in [&first, &second, &third] {
        wait_for_version(running.node(), 2).await?;
        assert_eq!(running.node().snapshot().await.state, next);
    }

    third.stop().await;
    second.stop().await;
    first.stop().await;
    Ok(())
}

async fn wait_for_version(node: &Arc<Node<MemoryNetwork>>, version: u64) -> Result<()> {
    let start = Instant::now();
    while node.snapshot().await.version < version {
        if start.elapsed() > SETTLE {
            bail!("timeout waiting for version {version}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[tokio::test]
async fn clients_read_the_same_board_from_any_node() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    cluster.wait_for_full_mesh(SETTLE).await?;
    let master = cluster.wait_for_single_master(SETTLE).await?;
    let master_index = cluster.index_of(master).context("master is live")?;
    let follower = follower_index(&cluster, master);

    for index in [master_index, follower] {
        let link = cluster.network.dial(&client_address(index)).await?;
        let response = link.request(&Message::RequestState).await?;
        assert_eq!(
            response,
            Message::SendState {
                state: BoardState::initial(),
                version: 0
            }
        );
        link.close();
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn client_update_through_a_follower_replicates() -> Result<()> {
    let cluster = TestCluster::spawn(3).await?;
    cluster.wait_for_full_mesh(SETTLE).await?;
    let master = cluster.wait_for_single_master(SETTLE).await?;
    let follower = follower_index(&cluster, master);

    let board = started_board(&[(3, 2)]);
    let link = cluster.network.dial(&client_address(follower)).await?;
    let response = link
        .request(&Message::SubmitState {
            state: board.clone(),
        })
        .await?;
    assert!(matches!(response, Message::SendState { .. }));
    cluster.wait_for_state(&board, SETTLE).await?;

    // The same link keeps serving further requests.
    let response = link.request(&Message::RequestState).await?;
    assert_eq!(
        response,
        Message::SendState {
            state: board,
            version: 1
        }
    );

    link.close();
    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn client_sending_a_peer_message_gets_an_error() -> Result<()> {
    let cluster = TestCluster::spawn(1).await?;

    let link = cluster.network.dial(&client_address(0)).await?;
    let response = link
        .request(&Message::Ping {
            id: NodeId::generate(),
        })
        .await?;
    assert_eq!(
        response,
        Message::ClientError {
            message: "unrecognized request: Ping".into()
        }
    );

    link.close();
    cluster.shutdown().await;
    Ok(())
}

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{NodeConfig, DEFAULT_CLIENT_LISTEN, DEFAULT_PEER_LISTEN};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a cluster node serving peers and clients over QUIC.
    Node(NodeArgs),
    /// Query a node for the board, or reset it.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Address peers dial. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_PEER_LISTEN)]
    pub peer_listen: String,

    /// Address clients connect to.
    #[arg(long, default_value = DEFAULT_CLIENT_LISTEN)]
    pub client_listen: String,

    /// Peer addresses to dial at startup, comma separated or repeated.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Pause between re-dial attempts to a lost peer, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub recovery_interval_ms: u64,

    /// How long an election waits for each peer, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub election_timeout_ms: u64,
}

impl From<NodeArgs> for NodeConfig {
    fn from(args: NodeArgs) -> Self {
        NodeConfig {
            peer_listen: args.peer_listen,
            client_listen: args.client_listen,
            bootstrap: args.peers,
            recovery_interval: Duration::from_millis(args.recovery_interval_ms),
            election_timeout: Duration::from_millis(args.election_timeout_ms),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Client address of any cluster node.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: String,

    /// Replace the board with a fresh game instead of reading it.
    #[arg(long)]
    pub reset: bool,
}

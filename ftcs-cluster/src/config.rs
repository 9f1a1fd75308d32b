use std::time::Duration;

/// Address clients connect to for reads and writes.
pub const DEFAULT_CLIENT_LISTEN: &str = "0.0.0.0:5000";

/// Address peers dial for the coordination protocol.
pub const DEFAULT_PEER_LISTEN: &str = "0.0.0.0:5001";

/// Fixed pause between re-dial attempts after losing a link this node opened.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// How long an election round waits for one peer before moving on.
pub const DEFAULT_ELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one cluster node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to bind for peer links (e.g. "0.0.0.0:5001").
    pub peer_listen: String,
    /// Address to bind for client requests (e.g. "0.0.0.0:5000").
    pub client_listen: String,
    /// Peer addresses dialed once at startup, in order. May include our own.
    pub bootstrap: Vec<String>,
    pub recovery_interval: Duration,
    pub election_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_listen: DEFAULT_PEER_LISTEN.to_string(),
            client_listen: DEFAULT_CLIENT_LISTEN.to_string(),
            bootstrap: Vec::new(),
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
            election_timeout: DEFAULT_ELECTION_TIMEOUT,
        }
    }
}

impl NodeConfig {
    pub fn with_bootstrap<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }
}

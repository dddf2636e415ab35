use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a single mesh node.
///
/// Everything is passed programmatically; there are no environment variables
/// or config files. The peer map must cover every other member of the mesh,
/// since membership is fixed at startup.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique identifier of this node. The mesh elects the lexicographically
    /// largest reachable identifier as coordinator.
    pub id: String,
    /// Address this node listens on and advertises to peers (host:port).
    pub listen_addr: String,
    /// Transport protocol tag, "tcp4" or "tcp6".
    pub proto: String,
    /// Peer identifier → dial address.
    pub peers: HashMap<String, String>,
    /// How long an election round waits for a higher peer to answer.
    pub election_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            listen_addr: "127.0.0.1:9990".to_string(),
            proto: "tcp4".to_string(),
            peers: HashMap::new(),
            election_timeout: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            listen_addr: listen_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, id: impl Into<String>, addr: impl Into<String>) -> Self {
        self.peers.insert(id.into(), addr.into());
        self
    }

    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }
}

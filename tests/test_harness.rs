//! Test harness for multi-node mesh integration tests.
//!
//! Provides utilities for spawning, managing, and observing clusters of real
//! nodes talking over loopback TCP.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bully_mesh::config::NodeConfig;
use bully_mesh::node::Node;

/// Election timeout used by tests; much shorter than the default so failed
/// rounds retry quickly.
pub const TEST_ELECTION_TIMEOUT: Duration = Duration::from_millis(150);

/// Node configuration for tests, with shortened timeouts.
pub fn test_node_config(id: &str, port: u16, peers: Vec<(&str, u16)>) -> NodeConfig {
    let mut config = NodeConfig::new(id, format!("127.0.0.1:{port}"))
        .with_election_timeout(TEST_ELECTION_TIMEOUT);
    for (peer_id, peer_port) in peers {
        config = config.with_peer(peer_id, format!("127.0.0.1:{peer_port}"));
    }
    config
}

/// Handle to a running test node.
pub struct TestNode {
    #[allow(dead_code)]
    pub id: String,
    pub node: Node,
}

/// Cluster of fully meshed nodes on consecutive loopback ports.
pub struct TestCluster {
    pub nodes: HashMap<String, TestNode>,
}

impl TestCluster {
    /// Create and start a cluster. Ids get consecutive ports starting at
    /// `base_port`; every node is configured with every other node as a peer.
    ///
    /// Nodes started first cannot reach nodes started later at connect time;
    /// the handshake dial-back closes the mesh once everyone is up.
    pub async fn new(ids: &[&str], base_port: u16) -> Self {
        let all: Vec<(&str, u16)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, base_port + i as u16))
            .collect();

        let mut nodes = HashMap::new();
        for (id, port) in &all {
            let peers: Vec<(&str, u16)> = all
                .iter()
                .filter(|(other, _)| other != id)
                .copied()
                .collect();
            let config = test_node_config(id, *port, peers);
            let (node, mut delivery) = Node::start(config).await.expect("node should start");

            // Drain application traffic (handshakes land there) so the event
            // loop never backs up on an unread delivery channel.
            tokio::spawn(async move { while delivery.recv().await.is_some() {} });

            nodes.insert(
                id.to_string(),
                TestNode {
                    id: id.to_string(),
                    node,
                },
            );
        }

        // Give the dial-backs a moment to complete the mesh.
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self { nodes }
    }

    pub fn get(&self, id: &str) -> &TestNode {
        self.nodes.get(id).expect("unknown test node")
    }

    /// Coordinator as observed by one node.
    pub async fn coordinator_of(&self, id: &str) -> String {
        self.get(id).node.coordinator().await
    }

    /// True when every running node observes `expected` as coordinator.
    pub async fn all_observe_coordinator(&self, expected: &str) -> bool {
        for test_node in self.nodes.values() {
            if test_node.node.coordinator().await != expected {
                return false;
            }
        }
        true
    }

    /// Close a node and remove it from the cluster (simulates a crash as
    /// seen by everyone else).
    pub async fn close_node(&mut self, id: &str) -> bool {
        match self.nodes.remove(id) {
            Some(test_node) => {
                test_node.node.close().await;
                true
            }
            None => false,
        }
    }

    /// Shut down all nodes (best effort cleanup).
    pub async fn shutdown(&mut self) {
        for test_node in self.nodes.values() {
            test_node.node.close().await;
        }
        self.nodes.clear();
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}

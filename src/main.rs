use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bully_mesh::config::NodeConfig;
use bully_mesh::node::Node;
use bully_mesh::shutdown::close_on_signal;

#[derive(Parser, Debug)]
#[command(name = "bully-mesh")]
#[command(about = "Bully leader election over a peer-to-peer TCP mesh")]
struct Args {
    /// Identifier of this node; the highest reachable id wins elections
    #[arg(long)]
    id: String,

    /// Address to listen on and advertise to peers (host:port)
    #[arg(long, default_value = "127.0.0.1:9990")]
    addr: String,

    /// Transport protocol, "tcp4" or "tcp6"
    #[arg(long, default_value = "tcp4")]
    proto: String,

    /// Peer addresses (comma-separated, format: "id=host:port")
    /// Example: "2=127.0.0.1:9992,3=127.0.0.1:9993"
    #[arg(long, default_value = "")]
    peers: String,

    /// How long an election round waits for a higher peer, in milliseconds
    #[arg(long, default_value = "1000")]
    election_timeout_ms: u64,
}

fn parse_peers(peers_str: &str) -> HashMap<String, String> {
    if peers_str.is_empty() {
        return HashMap::new();
    }

    peers_str
        .split(',')
        .filter_map(|peer| {
            let peer = peer.trim();
            match peer.split_once('=') {
                Some((id, addr)) if !id.is_empty() && !addr.is_empty() => {
                    Some((id.to_string(), addr.to_string()))
                }
                _ => {
                    tracing::warn!(peer, "Invalid peer format, expected id=host:port");
                    None
                }
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let peers = parse_peers(&args.peers);

    let config = NodeConfig {
        id: args.id,
        listen_addr: args.addr,
        proto: args.proto,
        peers,
        election_timeout: Duration::from_millis(args.election_timeout_ms),
    };

    tracing::info!(
        node_id = %config.id,
        listen_addr = %config.listen_addr,
        proto = %config.proto,
        peers = ?config.peers,
        "Starting bully-mesh node"
    );

    let (node, mut delivery) = Node::start(config).await?;

    // Kick one election so a freshly started mesh settles on a coordinator.
    let elector = node.clone();
    tokio::spawn(async move {
        elector.elect().await;
    });

    let shutdown = close_on_signal(node.clone());
    let mut last_coordinator = String::new();
    let mut poll = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            delivered = delivery.recv() => {
                match delivered {
                    Some(message) => {
                        tracing::info!(
                            node_id = %node.id(),
                            from = %message.from,
                            kind = %message.kind,
                            "application message"
                        );
                    }
                    None => break,
                }
            }
            _ = poll.tick() => {
                let coordinator = node.coordinator().await;
                if coordinator != last_coordinator && !coordinator.is_empty() {
                    tracing::info!(node_id = %node.id(), coordinator = %coordinator, "coordinator changed");
                    last_coordinator = coordinator;
                }
            }
        }
    }

    node.close().await;
    Ok(())
}

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::node::Node;

/// Close `node` when SIGTERM or SIGINT is received.
///
/// Returns a `CancellationToken` that is cancelled once the node has been
/// closed, so the caller can wait for shutdown to complete before exiting.
pub fn close_on_signal(node: Node) -> CancellationToken {
    let done = CancellationToken::new();
    let done_clone = done.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!(node_id = %node.id(), "Received SIGTERM, closing node");
            }
            _ = sigint.recv() => {
                tracing::info!(node_id = %node.id(), "Received SIGINT, closing node");
            }
        }

        node.close().await;
        done_clone.cancel();
    });

    done
}

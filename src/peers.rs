use std::collections::HashMap;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::FramedWrite;

use crate::error::{Error, Result};
use crate::message::{Message, MessageCodec};

/// Outbound framed encoder owned by a peer entry.
///
/// Boxed so tests can back it with an in-memory duplex instead of a TCP
/// write half.
pub type MessageSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, MessageCodec>;

/// Wraps a raw writer into the framed sink stored in the peer table.
pub fn message_sink<W>(writer: W) -> MessageSink
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    FramedWrite::new(Box::new(writer), MessageCodec::new())
}

/// A known peer: identifier, dial address, and the exclusively owned
/// outbound encoder. Reads happen on a separate per-connection task; the
/// table only ever writes.
struct Peer {
    addr: String,
    sink: Arc<Mutex<MessageSink>>,
}

/// Identifier and address of a peer, as captured by [`PeerMap::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: String,
    pub addr: String,
}

/// Table of live peers keyed by identifier.
///
/// An entry exists iff there is a currently open outbound connection to that
/// peer. Mutations take the write lock; `find` and `snapshot` take the read
/// lock. Writes to a single peer are serialized by a per-peer mutex, and the
/// table lock is never held across socket I/O.
pub struct PeerMap {
    inner: RwLock<HashMap<String, Peer>>,
}

impl PeerMap {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces the entry for `id`. A replaced entry drops its
    /// sink, which closes the underlying connection.
    pub async fn add(&self, id: impl Into<String>, addr: impl Into<String>, sink: MessageSink) {
        let peer = Peer {
            addr: addr.into(),
            sink: Arc::new(Mutex::new(sink)),
        };
        self.inner.write().await.insert(id.into(), peer);
    }

    /// Removes the entry for `id`; silent no-op when absent.
    pub async fn delete(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn find(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Encodes `message` on the peer's outbound sink.
    ///
    /// The caller is responsible for evicting the peer when this returns
    /// [`Error::Transport`].
    pub async fn write(&self, id: &str, message: Message) -> Result<()> {
        let sink = {
            let peers = self.inner.read().await;
            match peers.get(id) {
                Some(peer) => Arc::clone(&peer.sink),
                None => return Err(Error::PeerNotFound(id.to_string())),
            }
        };

        let mut sink = sink.lock().await;
        sink.send(message).await.map_err(Error::Transport)
    }

    /// Point-in-time list of `(id, addr)` pairs, so callers can iterate
    /// peers without holding the table lock during I/O.
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, peer)| PeerInfo {
                id: id.clone(),
                addr: peer.addr.clone(),
            })
            .collect()
    }

    /// Drops every entry, closing all outbound connections.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl Default for PeerMap {
    fn default() -> Self {
        Self::new()
    }
}

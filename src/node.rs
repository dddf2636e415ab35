use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};
use crate::peers::{message_sink, PeerMap};
use crate::transport::{self, MessageStream, Proto};

struct NodeInner {
    id: String,
    /// Address advertised to peers in every outgoing message.
    addr: String,
    proto: Proto,
    election_timeout: Duration,
    /// Current coordinator id; empty until the first election settles.
    coordinator: RwLock<String>,
    peers: PeerMap,
    /// Capacity-1 trigger channel: a pending entry means a higher peer is
    /// alive and will take over the current election round.
    election_tx: mpsc::Sender<Message>,
    election_rx: Mutex<mpsc::Receiver<Message>>,
    /// Ingress channel from the decode tasks to the event loop.
    inbox_tx: mpsc::Sender<Message>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Non-election traffic handed to the application.
    delivery_tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

/// A mesh member running the Bully election protocol.
///
/// Cheap to clone; all clones share the same underlying node. Dropping every
/// clone without calling [`Node::close`] leaves the spawned tasks running
/// until the runtime shuts down, so `close` is the intended exit path.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Validates the configuration and builds a node that is not yet
    /// listening or connected. Returns the receiver for application-level
    /// messages alongside it.
    ///
    /// Most callers want [`Node::start`]; this constructor exists so the
    /// election state machine can be driven without any sockets.
    pub fn new(config: NodeConfig) -> Result<(Self, mpsc::Receiver<Message>)> {
        let proto: Proto = config.proto.parse()?;
        transport::listen_addr(proto, &config.listen_addr)?;

        let (election_tx, election_rx) = mpsc::channel(1);
        let (inbox_tx, inbox_rx) = mpsc::channel(1);
        let (delivery_tx, delivery_rx) = mpsc::channel(1);

        let node = Self {
            inner: Arc::new(NodeInner {
                id: config.id,
                addr: config.listen_addr,
                proto,
                election_timeout: config.election_timeout,
                coordinator: RwLock::new(String::new()),
                peers: PeerMap::new(),
                election_tx,
                election_rx: Mutex::new(election_rx),
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
                delivery_tx,
                shutdown: CancellationToken::new(),
            }),
        };
        Ok((node, delivery_rx))
    }

    /// Builds a node, binds its listener, and dials every configured peer.
    pub async fn start(config: NodeConfig) -> Result<(Self, mpsc::Receiver<Message>)> {
        let proto = config.proto.clone();
        let listen_addr = config.listen_addr.clone();
        let peers = config.peers.clone();

        let (node, delivery_rx) = Self::new(config)?;
        node.listen(&proto, &listen_addr).await?;
        node.connect(&proto, &peers).await;
        Ok((node, delivery_rx))
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn peers(&self) -> &PeerMap {
        &self.inner.peers
    }

    /// Binds the TCP listener and spawns the accept task and the event loop.
    pub async fn listen(&self, proto: &str, addr: &str) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let proto: Proto = proto.parse()?;
        let listener = transport::bind(proto, addr).await?;
        tracing::info!(node_id = %self.inner.id, addr = %addr, "listening");

        if let Some(inbox_rx) = self.inner.inbox_rx.lock().await.take() {
            let node = self.clone();
            tokio::spawn(async move {
                node.event_loop(inbox_rx).await;
            });
        }

        let node = self.clone();
        tokio::spawn(async move {
            node.accept_loop(listener).await;
        });
        Ok(())
    }

    /// Dials every peer in the map except self, best effort. Failures are
    /// logged and the peer simply stays absent from the table.
    pub async fn connect(&self, proto: &str, peers: &HashMap<String, String>) {
        if let Err(err) = proto.parse::<Proto>() {
            tracing::warn!(node_id = %self.inner.id, error = %err, "refusing to connect");
            return;
        }
        for (id, addr) in peers {
            if *id == self.inner.id {
                continue;
            }
            if let Err(err) = self.connect_peer(id, addr).await {
                tracing::warn!(
                    node_id = %self.inner.id,
                    peer_id = %id,
                    addr = %addr,
                    error = %err,
                    "failed to connect to peer"
                );
            }
        }
    }

    /// Sends `kind` to peer `to` as this node.
    ///
    /// A transport failure evicts the peer before surfacing, so a follow-up
    /// call reports [`Error::PeerNotFound`].
    pub async fn send(&self, to: &str, kind: MessageKind) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        match self.inner.peers.write(to, self.message(kind)).await {
            Err(Error::Transport(err)) => {
                tracing::debug!(node_id = %self.inner.id, peer_id = %to, "evicting unreachable peer");
                self.inner.peers.delete(to).await;
                Err(Error::Transport(err))
            }
            other => other,
        }
    }

    /// Runs one election round. Returns immediately when a round is already
    /// in flight on this node.
    ///
    /// The round challenges every higher-id peer and waits up to the election
    /// timeout for any of them to answer. No answer means they are presumed
    /// dead and the round restarts against the survivors; an answer means a
    /// higher peer will announce itself, so this node stands down and waits
    /// for its `Coordinator` message.
    pub async fn elect(&self) {
        let Ok(mut trigger) = self.inner.election_rx.try_lock() else {
            return;
        };

        loop {
            if self.inner.shutdown.is_cancelled() {
                return;
            }
            let peers = self.inner.peers.snapshot().await;
            let higher: Vec<_> = peers
                .iter()
                .filter(|peer| peer.id > self.inner.id)
                .collect();

            if higher.is_empty() {
                *self.inner.coordinator.write().await = self.inner.id.clone();
                tracing::info!(node_id = %self.inner.id, "no higher peer reachable, claiming coordination");
                for peer in &peers {
                    if let Err(err) = self
                        .inner
                        .peers
                        .write(&peer.id, self.message(MessageKind::Coordinator))
                        .await
                    {
                        tracing::debug!(
                            node_id = %self.inner.id,
                            peer_id = %peer.id,
                            error = %err,
                            "dropping unreachable peer"
                        );
                        self.inner.peers.delete(&peer.id).await;
                    }
                }
                return;
            }

            let mut challenged = 0usize;
            for peer in &higher {
                match self
                    .inner
                    .peers
                    .write(&peer.id, self.message(MessageKind::Election))
                    .await
                {
                    Ok(()) => challenged += 1,
                    Err(err) => {
                        tracing::debug!(
                            node_id = %self.inner.id,
                            peer_id = %peer.id,
                            error = %err,
                            "dropping unreachable peer"
                        );
                        self.inner.peers.delete(&peer.id).await;
                    }
                }
            }
            if challenged == 0 {
                // Every higher peer went away while we were challenging them.
                continue;
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                outcome = timeout(self.inner.election_timeout, trigger.recv()) => match outcome {
                    Ok(Some(_)) => {
                        tracing::debug!(node_id = %self.inner.id, "higher peer is alive, standing down");
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        tracing::debug!(node_id = %self.inner.id, "no answer from higher peers, retrying");
                    }
                }
            }
        }
    }

    /// Records `id` as coordinator if it outranks the current one.
    ///
    /// Announcements can arrive out of order during an election burst; the
    /// larger id is always the more authoritative claim.
    pub async fn set_coordinator(&self, id: &str) {
        let mut coordinator = self.inner.coordinator.write().await;
        if id > coordinator.as_str() {
            tracing::info!(node_id = %self.inner.id, coordinator = %id, "coordinator updated");
            *coordinator = id.to_string();
        }
    }

    /// Current coordinator id; empty before the first election settles.
    pub async fn coordinator(&self) -> String {
        self.inner.coordinator.read().await.clone()
    }

    /// Shuts the node down: stops the listener, the event loop, and every
    /// decode task, and closes all peer connections. Idempotent.
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!(node_id = %self.inner.id, "closing node");
        self.inner.shutdown.cancel();
        self.inner.peers.clear().await;
    }

    fn message(&self, kind: MessageKind) -> Message {
        Message {
            from: self.inner.id.clone(),
            addr: self.inner.addr.clone(),
            kind,
        }
    }

    /// Dials one peer, writes the handshake, and records it in the table.
    async fn connect_peer(&self, id: &str, addr: &str) -> Result<()> {
        let stream = transport::dial(self.inner.proto, addr).await?;
        let (_, write_half) = stream.into_split();
        let mut sink = message_sink(write_half);
        sink.send(self.message(MessageKind::Ok))
            .await
            .map_err(Error::Transport)?;
        self.inner.peers.add(id, addr, sink).await;
        tracing::debug!(node_id = %self.inner.id, peer_id = %id, addr = %addr, "connected to peer");
        Ok(())
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(node_id = %self.inner.id, remote = %remote, "accepted connection");
                        let node = self.clone();
                        tokio::spawn(async move {
                            node.read_loop(transport::message_stream(stream)).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(node_id = %self.inner.id, error = %err, "failed to accept connection");
                    }
                }
            }
        }
        tracing::debug!(node_id = %self.inner.id, "listener closed");
    }

    /// Decodes messages from one inbound connection until it errors or
    /// closes, then handles the loss of whoever was talking on it.
    async fn read_loop(self, mut stream: MessageStream) {
        let mut sender: Option<String> = None;
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        if sender.is_none() {
                            sender = Some(message.from.clone());
                        }
                        self.route(message).await;
                    }
                    Some(Err(err)) => {
                        tracing::debug!(node_id = %self.inner.id, error = %err, "connection decode failed");
                        break;
                    }
                    None => break,
                }
            }
        }
        if let Some(peer_id) = sender {
            self.peer_connection_lost(&peer_id).await;
        }
    }

    /// Classifies a decoded message: `Alive` answers feed the in-flight
    /// election, everything else goes through the event loop.
    async fn route(&self, message: Message) {
        if message.from != self.inner.id && !self.inner.peers.find(&message.from).await {
            // First contact from a peer we are not connected to (or whose
            // connection we lost): restore the reverse direction of the mesh.
            let node = self.clone();
            let (id, addr) = (message.from.clone(), message.addr.clone());
            tokio::spawn(async move {
                if let Err(err) = node.connect_peer(&id, &addr).await {
                    tracing::warn!(
                        node_id = %node.inner.id,
                        peer_id = %id,
                        addr = %addr,
                        error = %err,
                        "dial back failed"
                    );
                }
            });
        }

        match message.kind {
            MessageKind::Alive => {
                // A pending trigger already means "a higher peer is alive".
                let _ = self.inner.election_tx.try_send(message);
            }
            _ => {
                let _ = self.inner.inbox_tx.send(message).await;
            }
        }
    }

    /// An inbound connection died. If its sender was the coordinator, the
    /// mesh has lost its leader: forget it and call an election.
    async fn peer_connection_lost(&self, peer_id: &str) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let was_coordinator = {
            let mut coordinator = self.inner.coordinator.write().await;
            if coordinator.as_str() == peer_id {
                coordinator.clear();
                true
            } else {
                false
            }
        };
        if !was_coordinator {
            return;
        }
        tracing::info!(node_id = %self.inner.id, peer_id = %peer_id, "coordinator connection lost, starting election");
        self.inner.peers.delete(peer_id).await;
        let node = self.clone();
        tokio::spawn(async move {
            node.elect().await;
        });
    }

    async fn event_loop(self, mut inbox: mpsc::Receiver<Message>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                received = inbox.recv() => {
                    let Some(message) = received else { break };
                    self.dispatch(message).await;
                }
            }
        }
        tracing::debug!(node_id = %self.inner.id, "event loop stopped");
    }

    async fn dispatch(&self, message: Message) {
        match message.kind {
            MessageKind::Election => {
                if let Err(err) = self
                    .inner
                    .peers
                    .write(&message.from, self.message(MessageKind::Alive))
                    .await
                {
                    tracing::debug!(
                        node_id = %self.inner.id,
                        peer_id = %message.from,
                        error = %err,
                        "failed to answer challenge"
                    );
                }
                let node = self.clone();
                tokio::spawn(async move {
                    node.elect().await;
                });
            }
            MessageKind::Coordinator => {
                self.set_coordinator(&message.from).await;
            }
            _ => {
                // Application traffic; a dropped receiver means nobody cares.
                let _ = self.inner.delivery_tx.send(message).await;
            }
        }
    }
}

//! Bully leader election over a peer-to-peer TCP mesh.
//!
//! A fixed set of processes, each with a totally ordered string identifier,
//! agree on a single coordinator: the reachable peer with the highest
//! identifier. Any node that loses sight of the coordinator challenges every
//! higher peer; if none answers within the election timeout it claims
//! coordination itself and announces it to the mesh.

pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod peers;
pub mod shutdown;
pub mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use message::{Message, MessageKind};
pub use node::Node;
pub use peers::{PeerInfo, PeerMap};

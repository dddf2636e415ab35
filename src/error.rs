use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Node is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;

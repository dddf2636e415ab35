use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;

use crate::error::{Error, Result};
use crate::message::MessageCodec;

/// Transport protocol tag. Anything other than `tcp4`/`tcp6` fails fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Tcp4,
    Tcp6,
}

impl FromStr for Proto {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp4" => Ok(Proto::Tcp4),
            "tcp6" => Ok(Proto::Tcp6),
            other => Err(Error::Config(format!(
                "unsupported protocol {other:?}, expected \"tcp4\" or \"tcp6\""
            ))),
        }
    }
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Proto::Tcp4 => write!(f, "tcp4"),
            Proto::Tcp6 => write!(f, "tcp6"),
        }
    }
}

impl Proto {
    fn matches(self, addr: SocketAddr) -> bool {
        match self {
            Proto::Tcp4 => addr.is_ipv4(),
            Proto::Tcp6 => addr.is_ipv6(),
        }
    }
}

/// Decoding side of one connection: a long-lived framed reader.
pub(crate) type MessageStream = FramedRead<TcpStream, MessageCodec>;

pub(crate) fn message_stream(stream: TcpStream) -> MessageStream {
    FramedRead::new(stream, MessageCodec::new())
}

/// Parses and validates a listen address against the protocol tag.
pub(crate) fn listen_addr(proto: Proto, addr: &str) -> Result<SocketAddr> {
    let parsed: SocketAddr = addr
        .parse()
        .map_err(|_| Error::Config(format!("invalid listen address {addr:?}")))?;
    if !proto.matches(parsed) {
        return Err(Error::Config(format!(
            "listen address {addr:?} does not match protocol {proto}"
        )));
    }
    Ok(parsed)
}

/// Binds the TCP listener for the node.
pub(crate) async fn bind(proto: Proto, addr: &str) -> Result<TcpListener> {
    let addr = listen_addr(proto, addr)?;
    TcpListener::bind(addr).await.map_err(Error::Bind)
}

/// Dials a peer. Literal socket addresses are checked against the protocol
/// family; host names are left to the resolver.
pub(crate) async fn dial(proto: Proto, addr: &str) -> io::Result<TcpStream> {
    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        if !proto.matches(parsed) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("peer address {addr:?} does not match protocol {proto}"),
            ));
        }
        return TcpStream::connect(parsed).await;
    }
    TcpStream::connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_parses_known_tags() {
        assert_eq!("tcp4".parse::<Proto>().unwrap(), Proto::Tcp4);
        assert_eq!("tcp6".parse::<Proto>().unwrap(), Proto::Tcp6);
        assert!(matches!(
            "tcp22".parse::<Proto>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn listen_addr_rejects_garbage_and_family_mismatch() {
        assert!(matches!(
            listen_addr(Proto::Tcp4, "errorAddr:8002"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            listen_addr(Proto::Tcp6, "127.0.0.1:8102"),
            Err(Error::Config(_))
        ));
        assert!(listen_addr(Proto::Tcp4, "127.0.0.1:8100").is_ok());
        assert!(listen_addr(Proto::Tcp6, "[::1]:8100").is_ok());
    }

    #[tokio::test]
    async fn bind_fails_when_port_is_taken() {
        let listener = bind(Proto::Tcp4, "127.0.0.1:0").await.expect("first bind");
        let addr = listener.local_addr().unwrap().to_string();
        let err = bind(Proto::Tcp4, &addr).await.unwrap_err();
        assert!(matches!(err, Error::Bind(_)));
    }

    #[tokio::test]
    async fn dial_rejects_family_mismatch() {
        let err = dial(Proto::Tcp6, "127.0.0.1:9999").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}

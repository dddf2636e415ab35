use std::io;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Upper bound on a single wire frame. Messages are three short fields, so
/// anything close to this limit is a corrupt or hostile stream.
const MAX_FRAME_LEN: usize = 8 * 1024;

/// The four message kinds of the election protocol.
///
/// The declaration order pins the wire discriminants: `Election=0`, `Ok=1`,
/// `Coordinator=2`, `Alive=3`. `Ok` doubles as the connection handshake and
/// as an application-level ping; it takes no part in elections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Election,
    Ok,
    Coordinator,
    Alive,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Election => write!(f, "election"),
            MessageKind::Ok => write!(f, "ok"),
            MessageKind::Coordinator => write!(f, "coordinator"),
            MessageKind::Alive => write!(f, "alive"),
        }
    }
}

/// A single record on the wire.
///
/// `from` and `addr` are always present, so the first record on a connection
/// doubles as the handshake: the receiver learns who dialed and where to dial
/// back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier of the sender.
    pub from: String,
    /// Public dial address of the sender.
    pub addr: String,
    pub kind: MessageKind,
}

/// Length-delimited frames carrying postcard-serialized [`Message`] records.
///
/// One long-lived decoder reads successive messages from a connection; any
/// framing or deserialization failure surfaces as an `io::Error` and ends the
/// read task for that connection.
#[derive(Debug)]
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                let message = postcard::from_bytes(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = postcard::to_allocvec(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(Bytes::from(bytes), dst)
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    fn sample(kind: MessageKind) -> Message {
        Message {
            from: "node-a".to_string(),
            addr: "127.0.0.1:9000".to_string(),
            kind,
        }
    }

    #[test]
    fn kind_wire_values_are_stable() {
        let expected = [
            (MessageKind::Election, 0u8),
            (MessageKind::Ok, 1),
            (MessageKind::Coordinator, 2),
            (MessageKind::Alive, 3),
        ];
        for (kind, value) in expected {
            let encoded = postcard::to_allocvec(&kind).expect("encode kind");
            assert_eq!(encoded, vec![value], "{kind} must encode as {value}");
        }
    }

    #[tokio::test]
    async fn roundtrip_all_fields() {
        let (writer, reader) = tokio::io::duplex(1024);
        let mut writer = FramedWrite::new(writer, MessageCodec::new());
        let mut reader = FramedRead::new(reader, MessageCodec::new());

        let message = sample(MessageKind::Coordinator);
        writer.send(message.clone()).await.expect("write message");

        let decoded = reader
            .next()
            .await
            .expect("expected a frame")
            .expect("decode message");
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn stream_preserves_send_order() {
        let (writer, reader) = tokio::io::duplex(1024);
        let mut writer = FramedWrite::new(writer, MessageCodec::new());
        let mut reader = FramedRead::new(reader, MessageCodec::new());

        let first = sample(MessageKind::Election);
        let second = sample(MessageKind::Alive);
        writer.send(first.clone()).await.expect("write first");
        writer.send(second.clone()).await.expect("write second");

        let got_first = reader.next().await.unwrap().expect("decode first");
        let got_second = reader.next().await.unwrap().expect("decode second");
        assert_eq!(got_first, first);
        assert_eq!(got_second, second);
    }

    #[tokio::test]
    async fn garbage_frame_is_a_decode_error() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = FramedRead::new(reader, MessageCodec::new());

        // A valid length prefix followed by bytes postcard cannot parse as a
        // Message (truncated strings).
        writer
            .write_all(&[0, 0, 0, 2, 0xff, 0xff])
            .await
            .expect("write raw bytes");
        drop(writer);

        let result = reader.next().await.expect("expected a frame");
        assert!(result.is_err());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NSQ TCP wire format.
//!
//! Client to server: a `  V2` magic once per connection, then newline
//! terminated commands. `PUB` carries a body prefixed with its 4-byte length.
//!
//! Server to client, each frame:
//! - 4 bytes: size of the rest of the frame (big-endian)
//! - 4 bytes: frame type (0 response, 1 error, 2 message)
//! - N bytes: data
//!
//! Message data is an 8-byte nanosecond timestamp, a 2-byte attempt counter,
//! a 16-byte ASCII id and the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Protocol version magic sent right after connecting.
pub const MAGIC: &[u8] = b"  V2";

/// Response the server sends to check the connection is alive.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Response acknowledging `PUB` and `SUB`.
pub const OK: &[u8] = b"OK";

/// Largest frame accepted from the server (nsqd default max message size is 1 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const MESSAGE_ID_LEN: usize = 16;
const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid frame type: {0}")]
    InvalidFrameType(i32),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Commands this client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pub { topic: String, body: Bytes },
    Sub { topic: String, channel: String },
    Rdy(u32),
    Fin(MessageId),
    /// Requeue with a delay in milliseconds.
    Req(MessageId, u64),
    Touch(MessageId),
    Nop,
    Cls,
}

impl Command {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Command::Pub { topic, body } => {
                buf.put_slice(format!("PUB {}\n", topic).as_bytes());
                buf.put_u32(body.len() as u32);
                buf.put(body.clone());
            }
            Command::Sub { topic, channel } => {
                buf.put_slice(format!("SUB {} {}\n", topic, channel).as_bytes());
            }
            Command::Rdy(count) => buf.put_slice(format!("RDY {}\n", count).as_bytes()),
            Command::Fin(id) => buf.put_slice(format!("FIN {}\n", id).as_bytes()),
            Command::Req(id, delay_ms) => {
                buf.put_slice(format!("REQ {} {}\n", id, delay_ms).as_bytes())
            }
            Command::Touch(id) => buf.put_slice(format!("TOUCH {}\n", id).as_bytes()),
            Command::Nop => buf.put_slice(b"NOP\n"),
            Command::Cls => buf.put_slice(b"CLS\n"),
        }
        buf.freeze()
    }
}

/// 16-byte message id, printable ASCII on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsqMessage {
    pub timestamp: i64,
    pub attempts: u16,
    pub id: MessageId,
    pub body: Bytes,
}

/// One frame read from nsqd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(NsqMessage),
}

impl Frame {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(data) if data.as_ref() == HEARTBEAT)
    }

    /// Decode the type and data part of a frame.
    pub fn decode(mut bytes: Bytes) -> Result<Self, ProtocolError> {
        if bytes.len() < 4 {
            return Err(ProtocolError::Malformed("missing frame type"));
        }
        match bytes.get_i32() {
            0 => Ok(Frame::Response(bytes)),
            1 => Ok(Frame::Error(bytes)),
            2 => {
                if bytes.len() < MESSAGE_HEADER_LEN {
                    return Err(ProtocolError::Malformed("short message header"));
                }
                let timestamp = bytes.get_i64();
                let attempts = bytes.get_u16();
                let mut id = [0u8; MESSAGE_ID_LEN];
                bytes.copy_to_slice(&mut id);
                Ok(Frame::Message(NsqMessage {
                    timestamp,
                    attempts,
                    id: MessageId(id),
                    body: bytes,
                }))
            }
            other => Err(ProtocolError::InvalidFrameType(other)),
        }
    }
}

/// Read one frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let size = match reader.read_u32().await {
        Ok(size) => size as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(size));
    }

    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).await?;
    Frame::decode(Bytes::from(data))
}

/// One nsqd known to lookupd.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LookupProducer {
    pub broadcast_address: String,
    pub tcp_port: u16,
}

impl LookupProducer {
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.broadcast_address, self.tcp_port)
    }
}

#[derive(Deserialize)]
struct LookupBody {
    #[serde(default)]
    producers: Vec<LookupProducer>,
    data: Option<LookupData>,
}

#[derive(Deserialize)]
struct LookupData {
    #[serde(default)]
    producers: Vec<LookupProducer>,
}

/// Parse a `/lookup` response. Older lookupd versions wrap the result in
/// `{"status_code": 200, "data": {...}}`.
pub fn parse_lookup(body: &[u8]) -> Result<Vec<LookupProducer>, serde_json::Error> {
    let body: LookupBody = serde_json::from_slice(body)?;
    Ok(match body.data {
        Some(data) if body.producers.is_empty() => data.producers,
        _ => body.producers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        let mut raw = [0u8; MESSAGE_ID_LEN];
        raw.copy_from_slice(s.as_bytes());
        MessageId(raw)
    }

    fn framed(frame_type: i32, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32((data.len() + 4) as u32);
        buf.put_i32(frame_type);
        buf.put_slice(data);
        buf.to_vec()
    }

    #[test]
    fn test_command_encoding() {
        let publish = Command::Pub {
            topic: "cloud-init".to_string(),
            body: Bytes::from_static(b"{}"),
        };
        assert_eq!(publish.encode().as_ref(), b"PUB cloud-init\n\x00\x00\x00\x02{}");

        let sub = Command::Sub {
            topic: "cloud-create".to_string(),
            channel: "default".to_string(),
        };
        assert_eq!(sub.encode().as_ref(), b"SUB cloud-create default\n");
        assert_eq!(Command::Rdy(10).encode().as_ref(), b"RDY 10\n");

        let message_id = id("0123456789abcdef");
        assert_eq!(
            Command::Fin(message_id).encode().as_ref(),
            b"FIN 0123456789abcdef\n"
        );
        assert_eq!(
            Command::Req(message_id, 5000).encode().as_ref(),
            b"REQ 0123456789abcdef 5000\n"
        );
        assert_eq!(Command::Nop.encode().as_ref(), b"NOP\n");
    }

    #[tokio::test]
    async fn test_read_message_frame() {
        let mut data = BytesMut::new();
        data.put_i64(1_700_000_000_000_000_000);
        data.put_u16(3);
        data.put_slice(b"0123456789abcdef");
        data.put_slice(b"{\"task_id\":\"t1\"}");
        let wire = framed(2, &data);

        let frame = read_frame(&mut wire.as_slice()).await.expect("frame");
        let Frame::Message(message) = frame else {
            panic!("expected a message frame");
        };
        assert_eq!(message.attempts, 3);
        assert_eq!(message.id.as_str(), "0123456789abcdef");
        assert_eq!(message.body.as_ref(), b"{\"task_id\":\"t1\"}");
    }

    #[tokio::test]
    async fn test_heartbeat_and_errors() {
        let wire = framed(0, HEARTBEAT);
        let frame = read_frame(&mut wire.as_slice()).await.expect("frame");
        assert!(frame.is_heartbeat());

        let wire = framed(1, b"E_INVALID");
        let frame = read_frame(&mut wire.as_slice()).await.expect("frame");
        assert_eq!(frame, Frame::Error(Bytes::from_static(b"E_INVALID")));

        let wire = framed(7, b"");
        assert!(matches!(
            read_frame(&mut wire.as_slice()).await,
            Err(ProtocolError::InvalidFrameType(7))
        ));

        let empty: &[u8] = &[];
        assert!(matches!(
            read_frame(&mut &*empty).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            read_frame(&mut &wire[..]).await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_parse_lookup_both_formats() {
        let current = br#"{"channels":["default"],"producers":[{"broadcast_address":"nsqd-0","tcp_port":4150,"http_port":4151}]}"#;
        let producers = parse_lookup(current).expect("parse");
        assert_eq!(producers[0].tcp_address(), "nsqd-0:4150");

        let legacy = br#"{"status_code":200,"status_txt":"OK","data":{"producers":[{"broadcast_address":"10.0.0.3","tcp_port":4150}]}}"#;
        let producers = parse_lookup(legacy).expect("parse");
        assert_eq!(producers[0].tcp_address(), "10.0.0.3:4150");
    }
}

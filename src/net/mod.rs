//! Message transport between the coordinator, the shards and clients.
//!
//! Every endpoint owns one inbox. Frames are opaque byte vectors; [`message`]
//! defines what they carry and how they are encoded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Result, ShardId};

/// In-process network backed by channels.
pub mod local;

/// Wire messages and their JSON framing.
pub mod message;

pub use local::{LocalNetwork, LocalTransport};
pub use message::Message;

/// Addressable participant.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Endpoint {
    /// Coordinator inbox for shard-originated messages.
    Coordinator,
    /// Coordinator inbox for client requests.
    Frontend,
    /// A shard server.
    Shard(ShardId),
    /// A client connection.
    Client(u64),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Coordinator => f.write_str("coordinator"),
            Endpoint::Frontend => f.write_str("frontend"),
            Endpoint::Shard(shard) => write!(f, "{shard}"),
            Endpoint::Client(id) => write!(f, "client-{id}"),
        }
    }
}

/// Point-to-point delivery of frames with FIFO order per sender/receiver pair.
///
/// `send` never blocks. `recv` blocks until a frame arrives and fails with
/// [`crate::types::WeftError::Disconnected`] once the endpoint can no longer receive.
pub trait Transport: Send + Sync {
    /// Endpoint this transport receives for.
    fn local(&self) -> Endpoint;
    /// Queues `frame` for `to`.
    fn send(&self, to: Endpoint, frame: Vec<u8>) -> Result<()>;
    /// Next frame addressed to this endpoint, with its sender.
    fn recv(&self) -> Result<(Endpoint, Vec<u8>)>;
}

/// Encodes `message` and sends it to `to`.
pub fn send_message(transport: &dyn Transport, to: Endpoint, message: &Message) -> Result<()> {
    transport.send(to, message.encode()?)
}

/// Receives and decodes the next message.
///
/// A frame that fails to decode surfaces as [`crate::types::WeftError::Codec`]; the
/// transport itself stays usable.
pub fn recv_message(transport: &dyn Transport) -> Result<(Endpoint, Message)> {
    let (from, frame) = transport.recv()?;
    Ok((from, Message::decode(&frame)?))
}

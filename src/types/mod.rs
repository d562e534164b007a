//! Identifiers shared by the coordinator and the shard servers, plus the crate error type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Index of a shard server. Shards are numbered `0..num_shards`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Returns the shard number as a slice index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Coordinator request identifier. Allocated monotonically starting at 1 and never reused.
pub type RequestId = u64;

/// Identifier of a cached reachability sub-answer.
///
/// A cache id is the request id of the query that computed the answer, so a reply whose
/// cache id equals the query's own id was computed fresh.
pub type CacheId = RequestId;

/// Identifier of one propagation message of a reachability flood.
///
/// Root hops issued by the coordinator reuse the query id. Hops issued by a shard carry the
/// shard number (plus one) in the top 16 bits and a shard-local sequence in the low 48 bits,
/// so the two spaces never collide.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct HopId(pub u64);

impl HopId {
    const SHARD_SHIFT: u32 = 48;
    const SEQ_MASK: u64 = (1 << Self::SHARD_SHIFT) - 1;

    /// The hop that starts a query at the source node's shard.
    pub const fn root(query_id: RequestId) -> Self {
        HopId(query_id & Self::SEQ_MASK)
    }

    /// A hop forwarded by `shard` with the shard-local sequence number `seq`.
    pub const fn forwarded(shard: ShardId, seq: u64) -> Self {
        HopId(((shard.0 as u64 + 1) << Self::SHARD_SHIFT) | (seq & Self::SEQ_MASK))
    }
}

/// Whether a handle names a node or an edge.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum ElementKind {
    /// A graph node.
    Node,
    /// A directed edge, stored on its source node's shard.
    Edge,
}

/// Network-transmissible identifier of a node or edge.
///
/// The index addresses the owning shard's arena. Arena slots are never recycled, so a handle
/// stays unique for the lifetime of the shard.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct GraphElementHandle {
    /// Shard that owns the element.
    pub shard: ShardId,
    /// Node or edge.
    pub kind: ElementKind,
    /// Arena index on the owning shard.
    pub index: u32,
}

impl GraphElementHandle {
    /// Handle of node `index` on `shard`.
    pub const fn node(shard: ShardId, index: u32) -> Self {
        Self {
            shard,
            kind: ElementKind::Node,
            index,
        }
    }

    /// Handle of edge `index` on `shard`.
    pub const fn edge(shard: ShardId, index: u32) -> Self {
        Self {
            shard,
            kind: ElementKind::Edge,
            index,
        }
    }

    /// Returns `true` for node handles.
    pub fn is_node(&self) -> bool {
        self.kind == ElementKind::Node
    }

    /// Returns `true` for edge handles.
    pub fn is_edge(&self) -> bool {
        self.kind == ElementKind::Edge
    }
}

impl fmt::Display for GraphElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            ElementKind::Node => 'n',
            ElementKind::Edge => 'e',
        };
        write!(f, "{tag}{}@{}", self.index, self.shard.0)
    }
}

/// Errors surfaced by the coordinator, the shards and the transport.
#[derive(thiserror::Error, Debug)]
pub enum WeftError {
    /// I/O failure, typically while spawning a thread.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The named element or endpoint is unknown.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Double deletion or mutation of a deleted element.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// A reachability endpoint was deleted before the query was issued.
    #[error("reachability endpoint {0} has been deleted")]
    DeletedEndpoint(GraphElementHandle),
    /// A shard refused the operation.
    #[error("rejected by shard: {0}")]
    Rejected(String),
    /// No reply arrived before the configured timeout.
    #[error("request {0} timed out waiting for a reply")]
    Timeout(RequestId),
    /// A channel, endpoint or the coordinator itself has shut down.
    #[error("{0} disconnected")]
    Disconnected(String),
    /// A frame could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// A reply arrived that does not answer the request it was matched to.
    #[error("unexpected reply for request {request_id}: expected {expected}")]
    UnexpectedReply {
        /// Request the reply was delivered to.
        request_id: RequestId,
        /// Reply kind the request was waiting for.
        expected: &'static str,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WeftError>;

use serde::{Deserialize, Serialize};

use crate::primitives::clock::{CausalStamp, ClockSnapshot};
use crate::storage::{CacheUpdate, PathHop, PropertyPredicate};
use crate::types::{CacheId, GraphElementHandle, HopId, RequestId, Result};

/// A node to expand together with the path that reached it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierNode {
    /// Node on the receiving shard.
    pub node: GraphElementHandle,
    /// Hops from the query source to `node`.
    pub path: Vec<PathHop>,
}

/// One propagation step of a reachability flood.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachabilityQuery {
    /// Query the step belongs to; also the id of any answer it caches.
    pub query_id: RequestId,
    /// Identity of this step for flood accounting.
    pub hop: HopId,
    /// Nodes to expand, all owned by the receiving shard.
    pub sources: Vec<FrontierNode>,
    /// Node being searched for.
    pub target: GraphElementHandle,
    /// Clock snapshot taken when the query started.
    pub snapshot: ClockSnapshot,
    /// Predicate every traversed edge must satisfy.
    pub predicate: PropertyPredicate,
    /// Cache ids that must not be used.
    pub ignore: Vec<CacheId>,
}

/// Operation requested by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Create a node on the next shard in rotation.
    CreateNode,
    /// Create an edge `from -> to`.
    CreateEdge {
        /// Source node.
        from: GraphElementHandle,
        /// Destination node.
        to: GraphElementHandle,
    },
    /// Delete a node.
    DeleteNode {
        /// Node to delete.
        node: GraphElementHandle,
    },
    /// Delete an edge leaving `node`.
    DeleteEdge {
        /// Source node of the edge.
        node: GraphElementHandle,
        /// Edge to delete.
        edge: GraphElementHandle,
    },
    /// Reachability query.
    Reachable {
        /// Start node.
        from: GraphElementHandle,
        /// Target node.
        to: GraphElementHandle,
        /// Edge predicate.
        predicate: PropertyPredicate,
    },
    /// Attach a property to an edge. No reply is sent.
    AddEdgeProperty {
        /// Source node of the edge.
        node: GraphElementHandle,
        /// Edge to annotate.
        edge: GraphElementHandle,
        /// Property key.
        key: String,
        /// Property value.
        value: String,
    },
    /// Delete an edge property by key. No reply is sent.
    DeleteEdgeProperty {
        /// Source node of the edge.
        node: GraphElementHandle,
        /// Edge to modify.
        edge: GraphElementHandle,
        /// Key to remove.
        key: String,
    },
}

/// Coordinator answer to a [`ClientRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientResponse {
    /// Handle of a newly created element.
    Created(GraphElementHandle),
    /// Deletion applied.
    Deleted,
    /// Reachability answer.
    Reachable(bool),
    /// Request failed; carries the error text.
    Rejected(String),
}

/// Every message exchanged over a [`super::Transport`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    CreateNode {
        request_id: RequestId,
        stamp: CausalStamp,
    },
    CreateEdge {
        request_id: RequestId,
        src: GraphElementHandle,
        dst: GraphElementHandle,
        dst_created: CausalStamp,
        stamp: CausalStamp,
    },
    CreateAck {
        request_id: RequestId,
        handle: GraphElementHandle,
    },
    DeleteNode {
        request_id: RequestId,
        node: GraphElementHandle,
        stamp: CausalStamp,
    },
    DeleteEdge {
        request_id: RequestId,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        stamp: CausalStamp,
    },
    DeleteAck {
        request_id: RequestId,
        invalidated: Vec<CacheId>,
    },
    AddEdgeProperty {
        request_id: RequestId,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: String,
        value: String,
        stamp: CausalStamp,
    },
    DeleteEdgeProperty {
        request_id: RequestId,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: String,
        stamp: CausalStamp,
    },
    DeletePropertyAck {
        request_id: RequestId,
        invalidated: Vec<CacheId>,
    },
    /// A shard refused a create or delete.
    Rejected {
        request_id: RequestId,
        reason: String,
    },
    Reachability(ReachabilityQuery),
    /// Terminal positive answer. `used_cache_id == query_id` means computed fresh.
    ReachabilityReply {
        query_id: RequestId,
        reachable: bool,
        used_cache_id: CacheId,
        path: Vec<PathHop>,
    },
    /// A hop finished without reaching the target and spawned `forwarded`.
    ReachabilityProgress {
        query_id: RequestId,
        hop: HopId,
        forwarded: Vec<HopId>,
    },
    CacheUpdate(CacheUpdate),
    CacheUpdateAck {
        rejected: Vec<CacheId>,
    },
    Client {
        ticket: u64,
        request: ClientRequest,
    },
    ClientReply {
        ticket: u64,
        response: ClientResponse,
    },
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CreateNode { .. } => "create_node",
            Message::CreateEdge { .. } => "create_edge",
            Message::CreateAck { .. } => "create_ack",
            Message::DeleteNode { .. } => "delete_node",
            Message::DeleteEdge { .. } => "delete_edge",
            Message::DeleteAck { .. } => "delete_ack",
            Message::AddEdgeProperty { .. } => "add_edge_property",
            Message::DeleteEdgeProperty { .. } => "delete_edge_property",
            Message::DeletePropertyAck { .. } => "delete_property_ack",
            Message::Rejected { .. } => "rejected",
            Message::Reachability(_) => "reachability",
            Message::ReachabilityReply { .. } => "reachability_reply",
            Message::ReachabilityProgress { .. } => "reachability_progress",
            Message::CacheUpdate(_) => "cache_update",
            Message::CacheUpdateAck { .. } => "cache_update_ack",
            Message::Client { .. } => "client",
            Message::ClientReply { .. } => "client_reply",
        }
    }

    /// JSON frame of the message.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a frame produced by [`Message::encode`].
    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

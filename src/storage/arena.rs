use crate::primitives::clock::{CausalStamp, ClockSnapshot};
use crate::types::{ElementKind, GraphElementHandle, RequestId, Result, ShardId, WeftError};

use super::types::{visible_at, Property};

/// Creation and deletion stamps of a node or edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ElementStamps {
    /// Stamp of the creating mutation.
    pub created: CausalStamp,
    /// Stamp of the deleting mutation, if any.
    pub deleted: Option<CausalStamp>,
}

impl ElementStamps {
    fn new(created: CausalStamp) -> Self {
        Self {
            created,
            deleted: None,
        }
    }

    /// Whether the element exists in `snapshot`.
    pub fn visible_at(&self, snapshot: &ClockSnapshot) -> bool {
        visible_at(self.created, self.deleted, snapshot)
    }

    /// Whether a deletion has been applied, at any time.
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    fn mark_deleted(&mut self, stamp: CausalStamp, what: &'static str) -> Result<()> {
        if self.deleted.is_some() {
            return Err(WeftError::ProtocolViolation(what));
        }
        if stamp.shard != self.created.shard || stamp.counter <= self.created.counter {
            return Err(WeftError::Invalid("deletion stamp must follow creation"));
        }
        self.deleted = Some(stamp);
        Ok(())
    }
}

/// Outgoing edge as seen by a traversal.
#[derive(Debug)]
pub struct OutEdge<'a> {
    /// Handle of the edge.
    pub handle: GraphElementHandle,
    /// Destination node, possibly on another shard.
    pub dst: GraphElementHandle,
    /// Creation stamp of the destination node as reported when the edge was made.
    pub dst_created: CausalStamp,
    /// Stamps of the edge itself.
    pub stamps: ElementStamps,
    /// Every property ever attached, including deleted ones.
    pub properties: &'a [Property],
}

/// Adjacency storage backing one shard.
///
/// All mutations validate that handles belong to this shard. Nothing here is shared
/// across threads; the shard server owns its store exclusively.
pub trait AdjacencyStore {
    /// Shard this store belongs to.
    fn shard(&self) -> ShardId;
    /// Allocates a node stamped `created`.
    fn create_node(&mut self, created: CausalStamp) -> Result<GraphElementHandle>;
    /// Allocates an edge from the local node `src` to `dst`.
    fn create_edge(
        &mut self,
        src: GraphElementHandle,
        dst: GraphElementHandle,
        dst_created: CausalStamp,
        created: CausalStamp,
    ) -> Result<GraphElementHandle>;
    /// Records the deletion of `node`.
    fn delete_node(&mut self, node: GraphElementHandle, stamp: CausalStamp) -> Result<()>;
    /// Records the deletion of `edge`, which must leave `node`.
    fn delete_edge(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        stamp: CausalStamp,
    ) -> Result<()>;
    /// Attaches `property` to a live edge.
    fn add_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        property: Property,
    ) -> Result<()>;
    /// Stamps every live property under `key` as deleted and returns how many were.
    fn delete_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: &str,
        stamp: CausalStamp,
    ) -> Result<usize>;
    /// Stamps of a local node.
    fn node_stamps(&self, node: GraphElementHandle) -> Result<ElementStamps>;
    /// Stamps of a local edge.
    fn edge_stamps(&self, edge: GraphElementHandle) -> Result<ElementStamps>;
    /// Marks `node` visited by `query_id`; returns `false` if it already was.
    fn mark_visited(&mut self, node: GraphElementHandle, query_id: RequestId) -> Result<bool>;
    /// Every edge ever created out of `node`, deleted ones included.
    fn out_edges(&self, node: GraphElementHandle) -> Result<Vec<OutEdge<'_>>>;
}

#[derive(Debug)]
struct NodeSlot {
    stamps: ElementStamps,
    out_edges: Vec<u32>,
    last_visited_by: RequestId,
}

#[derive(Debug)]
struct EdgeSlot {
    src: u32,
    dst: GraphElementHandle,
    dst_created: CausalStamp,
    stamps: ElementStamps,
    properties: Vec<Property>,
}

/// Append-only arena of nodes and edges.
#[derive(Debug)]
pub struct ArenaStore {
    shard: ShardId,
    nodes: Vec<NodeSlot>,
    edges: Vec<EdgeSlot>,
}

impl ArenaStore {
    /// Empty arena for `shard`.
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Nodes ever allocated.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges ever allocated.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn check_stamp(&self, stamp: CausalStamp) -> Result<()> {
        if stamp.shard != self.shard {
            return Err(WeftError::Invalid("stamp issued for another shard"));
        }
        Ok(())
    }

    fn node_index(&self, node: GraphElementHandle) -> Result<usize> {
        if node.shard != self.shard || node.kind != ElementKind::Node {
            return Err(WeftError::Invalid("handle is not a node of this shard"));
        }
        let index = node.index as usize;
        if index >= self.nodes.len() {
            return Err(WeftError::NotFound("node"));
        }
        Ok(index)
    }

    fn edge_index(&self, edge: GraphElementHandle) -> Result<usize> {
        if edge.shard != self.shard || edge.kind != ElementKind::Edge {
            return Err(WeftError::Invalid("handle is not an edge of this shard"));
        }
        let index = edge.index as usize;
        if index >= self.edges.len() {
            return Err(WeftError::NotFound("edge"));
        }
        Ok(index)
    }

    fn owned_edge(&self, node: GraphElementHandle, edge: GraphElementHandle) -> Result<usize> {
        let node_index = self.node_index(node)?;
        let edge_index = self.edge_index(edge)?;
        if self.edges[edge_index].src as usize != node_index {
            return Err(WeftError::Invalid("edge does not leave the given node"));
        }
        Ok(edge_index)
    }

    fn next_index(len: usize) -> Result<u32> {
        u32::try_from(len).map_err(|_| WeftError::Invalid("arena is full"))
    }
}

impl AdjacencyStore for ArenaStore {
    fn shard(&self) -> ShardId {
        self.shard
    }

    fn create_node(&mut self, created: CausalStamp) -> Result<GraphElementHandle> {
        self.check_stamp(created)?;
        let index = Self::next_index(self.nodes.len())?;
        self.nodes.push(NodeSlot {
            stamps: ElementStamps::new(created),
            out_edges: Vec::new(),
            last_visited_by: 0,
        });
        Ok(GraphElementHandle::node(self.shard, index))
    }

    fn create_edge(
        &mut self,
        src: GraphElementHandle,
        dst: GraphElementHandle,
        dst_created: CausalStamp,
        created: CausalStamp,
    ) -> Result<GraphElementHandle> {
        self.check_stamp(created)?;
        if !dst.is_node() {
            return Err(WeftError::Invalid("edge destination must be a node"));
        }
        let src_index = self.node_index(src)?;
        if self.nodes[src_index].stamps.is_deleted() {
            return Err(WeftError::ProtocolViolation("edge source is deleted"));
        }
        let index = Self::next_index(self.edges.len())?;
        self.edges.push(EdgeSlot {
            src: src.index,
            dst,
            dst_created,
            stamps: ElementStamps::new(created),
            properties: Vec::new(),
        });
        self.nodes[src_index].out_edges.push(index);
        Ok(GraphElementHandle::edge(self.shard, index))
    }

    fn delete_node(&mut self, node: GraphElementHandle, stamp: CausalStamp) -> Result<()> {
        self.check_stamp(stamp)?;
        let index = self.node_index(node)?;
        self.nodes[index]
            .stamps
            .mark_deleted(stamp, "node already deleted")
    }

    fn delete_edge(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        stamp: CausalStamp,
    ) -> Result<()> {
        self.check_stamp(stamp)?;
        let index = self.owned_edge(node, edge)?;
        self.edges[index]
            .stamps
            .mark_deleted(stamp, "edge already deleted")
    }

    fn add_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        property: Property,
    ) -> Result<()> {
        self.check_stamp(property.creation_time)?;
        let index = self.owned_edge(node, edge)?;
        let slot = &mut self.edges[index];
        if slot.stamps.is_deleted() {
            return Err(WeftError::ProtocolViolation("edge is deleted"));
        }
        slot.properties.push(property);
        Ok(())
    }

    fn delete_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: &str,
        stamp: CausalStamp,
    ) -> Result<usize> {
        self.check_stamp(stamp)?;
        let index = self.owned_edge(node, edge)?;
        let slot = &mut self.edges[index];
        if slot.stamps.is_deleted() {
            return Err(WeftError::ProtocolViolation("edge is deleted"));
        }
        let mut removed = 0;
        for property in slot
            .properties
            .iter_mut()
            .filter(|p| p.key == key && p.deletion_time.is_none())
        {
            property.deletion_time = Some(stamp);
            removed += 1;
        }
        Ok(removed)
    }

    fn node_stamps(&self, node: GraphElementHandle) -> Result<ElementStamps> {
        let index = self.node_index(node)?;
        Ok(self.nodes[index].stamps)
    }

    fn edge_stamps(&self, edge: GraphElementHandle) -> Result<ElementStamps> {
        let index = self.edge_index(edge)?;
        Ok(self.edges[index].stamps)
    }

    fn mark_visited(&mut self, node: GraphElementHandle, query_id: RequestId) -> Result<bool> {
        let index = self.node_index(node)?;
        let slot = &mut self.nodes[index];
        if slot.last_visited_by == query_id {
            return Ok(false);
        }
        slot.last_visited_by = query_id;
        Ok(true)
    }

    fn out_edges(&self, node: GraphElementHandle) -> Result<Vec<OutEdge<'_>>> {
        let index = self.node_index(node)?;
        Ok(self.nodes[index]
            .out_edges
            .iter()
            .map(|&edge_index| {
                let slot = &self.edges[edge_index as usize];
                OutEdge {
                    handle: GraphElementHandle::edge(self.shard, edge_index),
                    dst: slot.dst,
                    dst_created: slot.dst_created,
                    stamps: slot.stamps,
                    properties: &slot.properties,
                }
            })
            .collect())
    }
}

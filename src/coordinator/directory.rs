use rustc_hash::FxHashMap;

use crate::primitives::clock::CausalStamp;
use crate::types::{GraphElementHandle, Result, ShardId, WeftError};

/// Coordinator-side record of one node or edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementMetadata {
    /// Handle assigned by the owning shard.
    pub handle: GraphElementHandle,
    /// Shard that stores the element.
    pub owning_shard: ShardId,
    /// Stamp of the creating mutation.
    pub creation_time: CausalStamp,
    /// Stamp of the deleting mutation, set at most once.
    pub deletion_time: Option<CausalStamp>,
}

impl ElementMetadata {
    /// Metadata of a live element.
    pub fn new(handle: GraphElementHandle, creation_time: CausalStamp) -> Self {
        Self {
            handle,
            owning_shard: handle.shard,
            creation_time,
            deletion_time: None,
        }
    }

    /// Whether a deletion has been issued.
    pub fn is_deleted(&self) -> bool {
        self.deletion_time.is_some()
    }

    /// Records the deletion stamp.
    pub fn mark_deleted(&mut self, stamp: CausalStamp) -> Result<()> {
        if self.deletion_time.is_some() {
            return Err(WeftError::ProtocolViolation("element already deleted"));
        }
        if !matches!(
            self.creation_time.partial_cmp(&stamp),
            Some(std::cmp::Ordering::Less)
        ) {
            return Err(WeftError::Invalid("deletion stamp must follow creation"));
        }
        self.deletion_time = Some(stamp);
        Ok(())
    }

    /// Clears the deletion recorded at `stamp`. Returns `false` if another stamp (or none)
    /// is recorded.
    pub fn revive(&mut self, stamp: CausalStamp) -> bool {
        if self.deletion_time != Some(stamp) {
            return false;
        }
        self.deletion_time = None;
        true
    }
}

/// Every element the coordinator has created, by handle.
#[derive(Debug, Default)]
pub struct ElementDirectory {
    elements: FxHashMap<GraphElementHandle, ElementMetadata>,
}

impl ElementDirectory {
    /// Records a created element.
    pub fn insert(&mut self, metadata: ElementMetadata) {
        self.elements.insert(metadata.handle, metadata);
    }

    /// Metadata of `handle`.
    pub fn get(&self, handle: GraphElementHandle) -> Option<&ElementMetadata> {
        self.elements.get(&handle)
    }

    /// Like [`ElementDirectory::get`] but checks the handle kind and maps absence to
    /// [`WeftError::NotFound`].
    pub fn node(&self, handle: GraphElementHandle) -> Result<&ElementMetadata> {
        if !handle.is_node() {
            return Err(WeftError::Invalid("expected a node handle"));
        }
        self.get(handle).ok_or(WeftError::NotFound("node"))
    }

    /// Edge counterpart of [`ElementDirectory::node`].
    pub fn edge(&self, handle: GraphElementHandle) -> Result<&ElementMetadata> {
        if !handle.is_edge() {
            return Err(WeftError::Invalid("expected an edge handle"));
        }
        self.get(handle).ok_or(WeftError::NotFound("edge"))
    }

    /// Marks `handle` deleted at `stamp`.
    pub fn mark_deleted(&mut self, handle: GraphElementHandle, stamp: CausalStamp) -> Result<()> {
        self.elements
            .get_mut(&handle)
            .ok_or(WeftError::NotFound("element"))?
            .mark_deleted(stamp)
    }

    /// Undoes a deletion the owning shard refused.
    pub fn revive(&mut self, handle: GraphElementHandle, stamp: CausalStamp) -> bool {
        self.elements
            .get_mut(&handle)
            .is_some_and(|meta| meta.revive(stamp))
    }

    /// Number of elements ever created.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether nothing was created yet.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

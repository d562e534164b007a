use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{CacheId, RequestId};

/// Tracks deletions from issue until the owning shard reports which cache ids they
/// invalidated.
///
/// A reachability answer taken from the cache can only be trusted once every deletion
/// issued before the query started has settled, since an unsettled deletion may still
/// invalidate the answer's cache id.
#[derive(Debug, Default)]
pub struct DeletionRegistry {
    pending: BTreeSet<RequestId>,
    by_deletion: FxHashMap<RequestId, Vec<CacheId>>,
    invalidated: FxHashMap<CacheId, RequestId>,
}

impl DeletionRegistry {
    /// Records that deletion `request_id` was sent.
    pub fn begin(&mut self, request_id: RequestId) {
        self.pending.insert(request_id);
    }

    /// Records the cache ids invalidated by deletion `request_id`.
    ///
    /// Returns `false` if the deletion was not pending.
    pub fn settle(&mut self, request_id: RequestId, invalidated: &[CacheId]) -> bool {
        if !self.pending.remove(&request_id) {
            debug!(request_id, "coordinator.deletions.settle_unknown");
            return false;
        }
        for id in invalidated {
            self.invalidated.entry(*id).or_insert(request_id);
        }
        if !invalidated.is_empty() {
            self.by_deletion.insert(request_id, invalidated.to_vec());
        }
        true
    }

    /// Most recent deletion still waiting for its acknowledgment.
    pub fn last_pending(&self) -> Option<RequestId> {
        self.pending.last().copied()
    }

    /// Whether every deletion with id `<= last` has settled.
    pub fn settled_through(&self, last: RequestId) -> bool {
        self.pending.range(..=last).next().is_none()
    }

    /// Whether any settled deletion invalidated `cache_id`.
    pub fn is_invalidated(&self, cache_id: CacheId) -> bool {
        self.invalidated.contains_key(&cache_id)
    }

    /// Cache ids invalidated by the settled deletion `request_id`.
    pub fn invalidated_by(&self, request_id: RequestId) -> &[CacheId] {
        self.by_deletion
            .get(&request_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Forgets `ids` once no shard or query can present them again.
    pub fn forget(&mut self, ids: &[CacheId]) {
        for id in ids {
            let Some(deletion) = self.invalidated.remove(id) else {
                continue;
            };
            if let Some(list) = self.by_deletion.get_mut(&deletion) {
                list.retain(|c| c != id);
                if list.is_empty() {
                    self.by_deletion.remove(&deletion);
                }
            }
        }
    }

    /// Deletions waiting for acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cache ids currently remembered as invalidated.
    pub fn invalidated_len(&self) -> usize {
        self.invalidated.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_is_tracked_per_prefix() {
        let mut registry = DeletionRegistry::default();
        registry.begin(3);
        registry.begin(5);
        assert_eq!(registry.last_pending(), Some(5));
        assert!(!registry.settled_through(5));
        assert!(registry.settled_through(2));

        assert!(registry.settle(3, &[10, 11]));
        assert!(registry.settled_through(4));
        assert!(!registry.settled_through(5));
        assert!(registry.is_invalidated(10));
        assert_eq!(registry.invalidated_by(3), &[10, 11]);

        assert!(registry.settle(5, &[]));
        assert!(registry.settled_through(5));
        assert_eq!(registry.last_pending(), None);
        assert!(!registry.settle(5, &[]));
    }

    #[test]
    fn forget_drops_invalidations() {
        let mut registry = DeletionRegistry::default();
        registry.begin(1);
        registry.settle(1, &[4, 6]);
        registry.forget(&[4]);
        assert!(!registry.is_invalidated(4));
        assert_eq!(registry.invalidated_by(1), &[6]);
        registry.forget(&[6, 99]);
        assert_eq!(registry.invalidated_len(), 0);
        assert!(registry.invalidated_by(1).is_empty());
    }
}

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::primitives::clock::{CausalStamp, ClockSnapshot};
use crate::types::{CacheId, GraphElementHandle, ShardId};

use super::arena::AdjacencyStore;
use super::types::{PathHop, PropertyPredicate};

/// A positive reachability answer to be cached by every shard the path crosses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInstall {
    /// Id of the query that found the path.
    pub cache_id: CacheId,
    /// Node the path reaches.
    pub target: GraphElementHandle,
    /// Predicate every edge of the path satisfied.
    pub predicate: PropertyPredicate,
    /// Hops from the query source to the target.
    pub path: Vec<PathHop>,
}

/// Cache classification broadcast to every shard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUpdate {
    /// Ids confirmed valid since the previous broadcast.
    pub good: Vec<CacheId>,
    /// Ids to drop.
    pub bad: Vec<CacheId>,
    /// New answers to register, inactive until a later `activate`.
    pub install: Vec<CacheInstall>,
    /// Ids installed by the previous broadcast that may now serve queries.
    pub activate: Vec<CacheId>,
}

impl CacheUpdate {
    /// Whether the broadcast carries nothing.
    pub fn is_empty(&self) -> bool {
        self.good.is_empty()
            && self.bad.is_empty()
            && self.install.is_empty()
            && self.activate.is_empty()
    }
}

type CacheKey = (GraphElementHandle, GraphElementHandle);

#[derive(Clone, Debug)]
struct CacheEntry {
    id: CacheId,
    predicate: PropertyPredicate,
    stamps: SmallVec<[CausalStamp; 8]>,
    active: bool,
}

impl CacheEntry {
    fn usable(
        &self,
        predicate: &PropertyPredicate,
        snapshot: &ClockSnapshot,
        ignore: &[CacheId],
    ) -> bool {
        self.active
            && self.predicate == *predicate
            && !ignore.contains(&self.id)
            && self.stamps.iter().all(|s| s.within(snapshot))
    }
}

#[derive(Debug, Default)]
struct Admission {
    keys: Vec<CacheKey>,
    deps: Vec<GraphElementHandle>,
}

/// Shard-local cache of reachability sub-answers.
///
/// An entry keyed by `(node, target)` states that `target` is reachable from `node` under
/// the entry's predicate along a path whose elements were all created at the recorded
/// stamps. Each local node and edge on the path is registered as a dependency so that
/// deleting it drops the entry and reports the id back to the coordinator.
#[derive(Debug)]
pub struct ReachCache {
    shard: ShardId,
    capacity: usize,
    entries: FxHashMap<CacheKey, SmallVec<[CacheEntry; 2]>>,
    admitted: FxHashMap<CacheId, Admission>,
    dependents: FxHashMap<GraphElementHandle, Vec<CacheId>>,
    confirmed: FxHashSet<CacheId>,
    order: VecDeque<CacheId>,
}

impl ReachCache {
    /// Empty cache holding at most `capacity` answers.
    pub fn new(shard: ShardId, capacity: usize) -> Self {
        Self {
            shard,
            capacity,
            entries: FxHashMap::default(),
            admitted: FxHashMap::default(),
            dependents: FxHashMap::default(),
            confirmed: FxHashSet::default(),
            order: VecDeque::new(),
        }
    }

    /// Number of cached answers with at least one local entry.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Whether `id` is registered here.
    pub fn contains(&self, id: CacheId) -> bool {
        self.admitted.contains_key(&id)
    }

    /// Returns an active answer for `node` reaching `target` that is valid in `snapshot`.
    pub fn lookup(
        &self,
        node: GraphElementHandle,
        target: GraphElementHandle,
        predicate: &PropertyPredicate,
        snapshot: &ClockSnapshot,
        ignore: &[CacheId],
    ) -> Option<CacheId> {
        self.entries
            .get(&(node, target))?
            .iter()
            .find(|entry| entry.usable(predicate, snapshot, ignore))
            .map(|entry| entry.id)
    }

    /// Registers the local part of `install` as inactive entries.
    ///
    /// Returns `false` when a local node or edge on the path is already deleted; nothing
    /// is registered in that case.
    pub fn prepare<S: AdjacencyStore + ?Sized>(&mut self, install: &CacheInstall, store: &S) -> bool {
        let local: Vec<usize> = install
            .path
            .iter()
            .enumerate()
            .filter(|(_, hop)| hop.node.shard == self.shard)
            .map(|(i, _)| i)
            .collect();
        if local.is_empty() || self.admitted.contains_key(&install.cache_id) {
            return true;
        }
        let all_live = local.iter().all(|&i| {
            let hop = &install.path[i];
            let node_live = store.node_stamps(hop.node).is_ok_and(|s| !s.is_deleted());
            let edge_live = store.edge_stamps(hop.edge).is_ok_and(|s| !s.is_deleted());
            node_live && edge_live
        });
        if !all_live {
            debug!(
                shard = self.shard.0,
                cache_id = install.cache_id,
                "cache.prepare.rejected"
            );
            return false;
        }

        let mut admission = Admission::default();
        for &i in &local {
            let hop = &install.path[i];
            let stamps = install.path[i..].iter().flat_map(|hop| hop.stamps()).collect();
            let key = (hop.node, install.target);
            self.entries.entry(key).or_default().push(CacheEntry {
                id: install.cache_id,
                predicate: install.predicate.clone(),
                stamps,
                active: false,
            });
            admission.keys.push(key);
            admission.deps.extend([hop.node, hop.edge]);
        }
        for dep in &admission.deps {
            self.dependents
                .entry(*dep)
                .or_default()
                .push(install.cache_id);
        }
        self.admitted.insert(install.cache_id, admission);
        self.order.push_back(install.cache_id);
        self.evict_over_capacity();
        true
    }

    /// Lets the entries of `ids` serve lookups.
    pub fn activate(&mut self, ids: &[CacheId]) {
        for id in ids {
            let Some(admission) = self.admitted.get(id) else {
                continue;
            };
            for key in &admission.keys {
                if let Some(list) = self.entries.get_mut(key) {
                    list.iter_mut()
                        .filter(|e| e.id == *id)
                        .for_each(|e| e.active = true);
                }
            }
        }
    }

    /// Drops every entry of `id`. Returns `false` if it was not cached.
    pub fn remove(&mut self, id: CacheId) -> bool {
        let Some(admission) = self.admitted.remove(&id) else {
            return false;
        };
        for key in admission.keys {
            if let Some(list) = self.entries.get_mut(&key) {
                list.retain(|e| e.id != id);
                if list.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
        for dep in admission.deps {
            if let Some(ids) = self.dependents.get_mut(&dep) {
                ids.retain(|c| *c != id);
                if ids.is_empty() {
                    self.dependents.remove(&dep);
                }
            }
        }
        self.confirmed.remove(&id);
        self.order.retain(|c| *c != id);
        true
    }

    /// Drops every answer depending on `element` and returns their ids.
    pub fn invalidate(&mut self, element: GraphElementHandle) -> Vec<CacheId> {
        let mut ids = self.dependents.remove(&element).unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    /// Applies a coordinator broadcast and returns the install ids that were rejected.
    pub fn apply<S: AdjacencyStore + ?Sized>(
        &mut self,
        update: &CacheUpdate,
        store: &S,
    ) -> Vec<CacheId> {
        for id in &update.bad {
            self.remove(*id);
        }
        let rejected = update
            .install
            .iter()
            .filter(|install| !self.prepare(install, store))
            .map(|install| install.cache_id)
            .collect();
        self.activate(&update.activate);
        for id in &update.good {
            if self.admitted.contains_key(id) {
                self.confirmed.insert(*id);
            }
        }
        rejected
    }

    fn evict_over_capacity(&mut self) {
        while self.admitted.len() > self.capacity {
            let victim = self
                .order
                .iter()
                .position(|id| !self.confirmed.contains(id))
                .unwrap_or(0);
            let Some(id) = self.order.remove(victim) else {
                break;
            };
            debug!(shard = self.shard.0, cache_id = id, "cache.evict");
            self.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::arena::ArenaStore;

    struct Fixture {
        store: ArenaStore,
        path: Vec<PathHop>,
        target: GraphElementHandle,
    }

    fn stamp(counter: u64) -> CausalStamp {
        CausalStamp::new(ShardId(0), counter)
    }

    // a -> b -> target, all on shard 0.
    fn fixture() -> Fixture {
        let mut store = ArenaStore::new(ShardId(0));
        let a = store.create_node(stamp(1)).unwrap();
        let b = store.create_node(stamp(2)).unwrap();
        let target = store.create_node(stamp(3)).unwrap();
        let ab = store.create_edge(a, b, stamp(2), stamp(4)).unwrap();
        let bt = store.create_edge(b, target, stamp(3), stamp(5)).unwrap();
        let path = vec![
            PathHop {
                node: a,
                node_created: stamp(1),
                edge: ab,
                edge_created: stamp(4),
                predicate_created: Vec::new(),
            },
            PathHop {
                node: b,
                node_created: stamp(2),
                edge: bt,
                edge_created: stamp(5),
                predicate_created: Vec::new(),
            },
        ];
        Fixture {
            store,
            path,
            target,
        }
    }

    fn install(id: CacheId, f: &Fixture) -> CacheInstall {
        CacheInstall {
            cache_id: id,
            target: f.target,
            predicate: PropertyPredicate::any(),
            path: f.path.clone(),
        }
    }

    fn snapshot(counter: u64) -> ClockSnapshot {
        ClockSnapshot::from_counters(vec![counter])
    }

    #[test]
    fn entries_serve_lookups_only_after_activation() {
        let f = fixture();
        let mut cache = ReachCache::new(ShardId(0), 16);
        let any = PropertyPredicate::any();
        assert!(cache.prepare(&install(7, &f), &f.store));
        assert_eq!(cache.lookup(f.path[0].node, f.target, &any, &snapshot(9), &[]), None);

        cache.activate(&[7]);
        assert_eq!(cache.lookup(f.path[0].node, f.target, &any, &snapshot(9), &[]), Some(7));
        assert_eq!(cache.lookup(f.path[1].node, f.target, &any, &snapshot(9), &[]), Some(7));
        assert_eq!(cache.lookup(f.path[0].node, f.target, &any, &snapshot(9), &[7]), None);
        let red = PropertyPredicate::new([("color", "red")]);
        assert_eq!(cache.lookup(f.path[0].node, f.target, &red, &snapshot(9), &[]), None);
    }

    #[test]
    fn snapshot_older_than_path_skips_entry() {
        let f = fixture();
        let mut cache = ReachCache::new(ShardId(0), 16);
        cache.prepare(&install(7, &f), &f.store);
        cache.activate(&[7]);
        let any = PropertyPredicate::any();
        // The last edge was created at 5.
        assert_eq!(cache.lookup(f.path[0].node, f.target, &any, &snapshot(4), &[]), None);
        assert_eq!(cache.lookup(f.path[1].node, f.target, &any, &snapshot(4), &[]), None);
        assert_eq!(cache.lookup(f.path[0].node, f.target, &any, &snapshot(5), &[]), Some(7));
    }

    #[test]
    fn deleting_a_path_element_reports_dependents() {
        let mut f = fixture();
        let mut cache = ReachCache::new(ShardId(0), 16);
        cache.prepare(&install(7, &f), &f.store);
        cache.prepare(&install(8, &f), &f.store);
        cache.activate(&[7, 8]);

        let edge = f.path[1].edge;
        f.store.delete_edge(f.path[1].node, edge, stamp(6)).unwrap();
        assert_eq!(cache.invalidate(edge), vec![7, 8]);
        assert!(cache.is_empty());
        assert!(cache.invalidate(edge).is_empty());
    }

    #[test]
    fn install_over_deleted_element_is_rejected() {
        let mut f = fixture();
        let node = f.path[1].node;
        f.store.delete_node(node, stamp(6)).unwrap();
        let mut cache = ReachCache::new(ShardId(0), 16);
        let update = CacheUpdate {
            install: vec![install(9, &f)],
            ..CacheUpdate::default()
        };
        assert_eq!(cache.apply(&update, &f.store), vec![9]);
        assert!(!cache.contains(9));
    }

    #[test]
    fn bad_ids_are_dropped_and_paths_on_other_shards_ignored() {
        let f = fixture();
        let mut cache = ReachCache::new(ShardId(1), 16);
        assert!(cache.prepare(&install(3, &f), &f.store));
        assert!(cache.is_empty());

        let mut local = ReachCache::new(ShardId(0), 16);
        local.prepare(&install(3, &f), &f.store);
        let update = CacheUpdate {
            bad: vec![3],
            ..CacheUpdate::default()
        };
        assert!(local.apply(&update, &f.store).is_empty());
        assert!(!local.contains(3));
    }

    #[test]
    fn removed_ids_leave_the_eviction_queue() {
        let mut f = fixture();
        let mut cache = ReachCache::new(ShardId(0), 4096);
        for id in 0..1000 {
            assert!(cache.prepare(&install(id, &f), &f.store));
            assert!(cache.remove(id));
        }
        assert!(cache.is_empty());
        assert!(cache.order.is_empty());

        for id in 1000..1010 {
            cache.prepare(&install(id, &f), &f.store);
        }
        cache.apply(
            &CacheUpdate {
                bad: vec![1000, 1001],
                ..CacheUpdate::default()
            },
            &f.store,
        );
        assert_eq!(cache.order.len(), 8);
        f.store.delete_edge(f.path[0].node, f.path[0].edge, stamp(6)).unwrap();
        assert_eq!(cache.invalidate(f.path[0].edge).len(), 8);
        assert!(cache.order.is_empty());
    }

    #[test]
    fn eviction_prefers_unconfirmed_entries() {
        let f = fixture();
        let mut cache = ReachCache::new(ShardId(0), 2);
        cache.prepare(&install(1, &f), &f.store);
        cache.prepare(&install(2, &f), &f.store);
        cache.apply(
            &CacheUpdate {
                good: vec![1],
                ..CacheUpdate::default()
            },
            &f.store,
        );
        cache.prepare(&install(3, &f), &f.store);
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3));
    }
}

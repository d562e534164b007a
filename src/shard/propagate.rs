use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::net::message::{FrontierNode, ReachabilityQuery};
use crate::storage::{AdjacencyStore, PathHop, ReachCache};
use crate::types::{CacheId, GraphElementHandle, Result, ShardId};

/// Result of expanding one hop on one shard.
#[derive(Debug, PartialEq, Eq)]
pub enum HopOutcome {
    /// The target was reached, fresh or through a cached answer.
    Reached {
        /// Query id when found fresh, otherwise the cached answer's id.
        used_cache_id: CacheId,
        /// Path to the target when found fresh; empty for cached answers.
        path: Vec<PathHop>,
    },
    /// The target was not reached here; these batches continue on other shards.
    Forward {
        /// Frontier nodes grouped by owning shard, each batch within the size limit.
        batches: Vec<(ShardId, Vec<FrontierNode>)>,
    },
}

/// Expands a reachability hop over the shard's local subgraph.
///
/// Local neighbours are expanded in the same hop, breadth first. Only nodes owned by
/// other shards leave the shard, batched per destination.
pub struct ShardPropagator<'a, S: AdjacencyStore + ?Sized> {
    store: &'a mut S,
    cache: &'a ReachCache,
    max_nodes_per_forward: usize,
}

impl<'a, S: AdjacencyStore + ?Sized> ShardPropagator<'a, S> {
    /// Propagator over `store` consulting `cache`.
    pub fn new(store: &'a mut S, cache: &'a ReachCache, max_nodes_per_forward: usize) -> Self {
        Self {
            store,
            cache,
            max_nodes_per_forward: max_nodes_per_forward.max(1),
        }
    }

    /// Expands `query.sources`.
    pub fn propagate(&mut self, query: &ReachabilityQuery) -> Result<HopOutcome> {
        let shard = self.store.shard();
        let mut queue: VecDeque<FrontierNode> = query.sources.iter().cloned().collect();
        let mut remote: BTreeMap<ShardId, Vec<FrontierNode>> = BTreeMap::new();
        let mut sent: FxHashSet<GraphElementHandle> = FxHashSet::default();

        while let Some(frontier) = queue.pop_front() {
            if frontier.node.shard != shard {
                debug!(shard = shard.0, node = %frontier.node, "shard.propagate.misrouted");
                continue;
            }
            let stamps = match self.store.node_stamps(frontier.node) {
                Ok(stamps) => stamps,
                Err(err) => {
                    debug!(shard = shard.0, node = %frontier.node, error = %err, "shard.propagate.unknown_node");
                    continue;
                }
            };
            if !stamps.visible_at(&query.snapshot)
                || !self.store.mark_visited(frontier.node, query.query_id)?
            {
                continue;
            }
            if let Some(cache_id) = self.cache.lookup(
                frontier.node,
                query.target,
                &query.predicate,
                &query.snapshot,
                &query.ignore,
            ) {
                return Ok(HopOutcome::Reached {
                    used_cache_id: cache_id,
                    path: Vec::new(),
                });
            }

            for edge in self.store.out_edges(frontier.node)? {
                if !edge.stamps.visible_at(&query.snapshot) {
                    continue;
                }
                let Some(predicate_created) =
                    query.predicate.witnesses(edge.properties, &query.snapshot)
                else {
                    continue;
                };
                let mut path = frontier.path.clone();
                path.push(PathHop {
                    node: frontier.node,
                    node_created: stamps.created,
                    edge: edge.handle,
                    edge_created: edge.stamps.created,
                    predicate_created,
                });
                if edge.dst == query.target {
                    return Ok(HopOutcome::Reached {
                        used_cache_id: query.query_id,
                        path,
                    });
                }
                if !edge.dst_created.within(&query.snapshot) {
                    continue;
                }
                let next = FrontierNode {
                    node: edge.dst,
                    path,
                };
                if edge.dst.shard == shard {
                    queue.push_back(next);
                } else if sent.insert(edge.dst) {
                    remote.entry(edge.dst.shard).or_default().push(next);
                }
            }
        }

        let mut batches = Vec::new();
        for (dst, mut nodes) in remote {
            while nodes.len() > self.max_nodes_per_forward {
                let rest = nodes.split_off(self.max_nodes_per_forward);
                batches.push((dst, nodes));
                nodes = rest;
            }
            batches.push((dst, nodes));
        }
        Ok(HopOutcome::Forward { batches })
    }
}

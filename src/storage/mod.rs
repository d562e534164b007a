//! Shard-local graph storage.
//!
//! Holds the node/edge arena with its causal stamps, the edge property model
//! used by reachability predicates, and the cache of reachability sub-answers.

/// Node and edge arena owned by one shard.
///
/// Slots are append-only; deletions record a stamp instead of freeing the slot.
pub mod arena;

/// Cache of positive reachability answers keyed by start node, target and predicate.
pub mod cache;

mod types;

pub use arena::{AdjacencyStore, ArenaStore, ElementStamps, OutEdge};
pub use cache::{CacheInstall, CacheUpdate, ReachCache};
pub use types::{visible_at, PathHop, Property, PropertyPredicate};

//! Weft: a sharded graph store with a central coordinator.
//!
//! The coordinator stamps every mutation with a vector-clock timestamp and routes it to
//! the shard owning the element. Reachability queries flood across shards against a
//! consistent snapshot; shards cache positive answers, and the coordinator validates
//! each cached answer against concurrent deletions before returning it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod net;
pub mod primitives;
pub mod shard;
pub mod storage;
pub mod types;

pub use cluster::{Client, Cluster};
pub use config::{ClusterConfig, ConfigError};
pub use coordinator::{Coordinator, CoordinatorOptions, ReachabilityOutcome};
pub use storage::PropertyPredicate;
pub use types::{GraphElementHandle, Result, ShardId, WeftError};

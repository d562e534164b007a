//! Low-level building blocks shared by the coordinator and the shards.
//!
//! Includes the per-shard vector clock used to stamp mutations and the
//! worker pool that runs message handlers.

/// Per-shard logical clocks and causal stamps.
///
/// Stamps order events on one shard; snapshots capture every shard's clock at once.
pub mod clock;

/// Concurrency primitives and synchronization.
///
/// Fixed-size worker pools draining a shared job queue.
pub mod concurrency;

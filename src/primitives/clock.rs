use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{Result, ShardId, WeftError};

/// Logical timestamp of one mutation, ordered only against stamps of the same shard.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct CausalStamp {
    /// Shard whose clock issued the stamp.
    pub shard: ShardId,
    /// Value of that shard's counter after the increment.
    pub counter: u64,
}

impl CausalStamp {
    /// Creates a stamp for `shard` at `counter`.
    pub const fn new(shard: ShardId, counter: u64) -> Self {
        Self { shard, counter }
    }

    /// Returns `true` when the stamped event happened no later than `snapshot`.
    pub fn within(&self, snapshot: &ClockSnapshot) -> bool {
        snapshot
            .get(self.shard)
            .is_some_and(|seen| self.counter <= seen)
    }
}

impl PartialOrd for CausalStamp {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        if self.shard != other.shard {
            return None;
        }
        Some(self.counter.cmp(&other.counter))
    }
}

/// Read-only copy of every shard's counter, taken when a query starts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot(Vec<u64>);

impl ClockSnapshot {
    /// Builds a snapshot from explicit counters, one per shard.
    pub fn from_counters(counters: Vec<u64>) -> Self {
        Self(counters)
    }

    /// Counter observed for `shard`, if the shard exists.
    pub fn get(&self, shard: ShardId) -> Option<u64> {
        self.0.get(shard.index()).copied()
    }

    /// All counters in shard order.
    pub fn counters(&self) -> &[u64] {
        &self.0
    }
}

/// One monotonically increasing counter per shard.
///
/// Increments must happen while the caller holds whatever lock orders its messages, so the
/// stamp order on a shard matches the order in which that shard receives them.
#[derive(Debug)]
pub struct VectorClock {
    counters: Box<[AtomicU64]>,
}

impl VectorClock {
    /// Creates a clock with every counter at zero.
    pub fn new(num_shards: usize) -> Self {
        let counters = (0..num_shards).map(|_| AtomicU64::new(0)).collect();
        Self { counters }
    }

    /// Number of shards tracked.
    pub fn num_shards(&self) -> usize {
        self.counters.len()
    }

    /// Increments `shard`'s counter and returns the new stamp.
    pub fn advance(&self, shard: ShardId) -> Result<CausalStamp> {
        let counter = self
            .counters
            .get(shard.index())
            .ok_or(WeftError::Invalid("shard outside the cluster"))?;
        let next = counter.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(CausalStamp::new(shard, next))
    }

    /// Current counter of `shard`.
    pub fn current(&self, shard: ShardId) -> Option<u64> {
        self.counters
            .get(shard.index())
            .map(|c| c.load(Ordering::Acquire))
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot(
            self.counters
                .iter()
                .map(|c| c.load(Ordering::Acquire))
                .collect(),
        )
    }
}

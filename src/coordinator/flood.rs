use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::{HopId, RequestId};

/// State of a flood after a progress report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FloodStatus {
    /// Hops are still outstanding.
    Running,
    /// Every hop finished without reaching the target; the flood is forgotten.
    Exhausted,
    /// No flood is tracked for the query.
    Unknown,
}

#[derive(Debug, Default)]
struct Flood {
    outstanding: FxHashSet<HopId>,
    finished_early: FxHashSet<HopId>,
}

/// Detects when a reachability flood has run out of hops.
///
/// Each hop reports the hops it spawned when it finishes. A child may report before its
/// parent, so a hop reported before being announced is parked in `finished_early` and
/// cancels the announcement when it arrives.
#[derive(Debug, Default)]
pub struct FloodTracker {
    floods: FxHashMap<RequestId, Flood>,
}

impl FloodTracker {
    /// Starts tracking `query_id` with its root hop outstanding.
    pub fn start(&mut self, query_id: RequestId) {
        let mut flood = Flood::default();
        flood.outstanding.insert(HopId::root(query_id));
        self.floods.insert(query_id, flood);
    }

    /// Records that `hop` finished and spawned `forwarded`.
    pub fn record(&mut self, query_id: RequestId, hop: HopId, forwarded: &[HopId]) -> FloodStatus {
        let Some(flood) = self.floods.get_mut(&query_id) else {
            return FloodStatus::Unknown;
        };
        if !flood.outstanding.remove(&hop) {
            flood.finished_early.insert(hop);
        }
        for child in forwarded {
            if !flood.finished_early.remove(child) {
                flood.outstanding.insert(*child);
            }
        }
        if flood.outstanding.is_empty() {
            self.floods.remove(&query_id);
            return FloodStatus::Exhausted;
        }
        FloodStatus::Running
    }

    /// Stops tracking `query_id`. Returns `false` if it was not tracked.
    pub fn finish(&mut self, query_id: RequestId) -> bool {
        self.floods.remove(&query_id).is_some()
    }

    /// Number of floods in progress.
    pub fn len(&self) -> usize {
        self.floods.len()
    }

    /// Whether no flood is in progress.
    pub fn is_empty(&self) -> bool {
        self.floods.is_empty()
    }
}

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::storage::{CacheInstall, CacheUpdate};
use crate::types::CacheId;

use super::deletions::DeletionRegistry;

/// What a completed broadcast round did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Generation number of the round.
    pub generation: u64,
    /// Ids confirmed good.
    pub good: usize,
    /// Ids dropped.
    pub bad: usize,
    /// Installs sent for preparation.
    pub installed: usize,
    /// Ids activated.
    pub activated: usize,
    /// Installs some shard refused.
    pub rejected: Vec<CacheId>,
}

#[derive(Debug)]
struct RoundInFlight {
    acks: usize,
    rejected: FxHashSet<CacheId>,
    installed: Vec<CacheId>,
    bad: Vec<CacheId>,
    summary: RoundSummary,
}

/// Coordinator bookkeeping of cache ids between broadcasts.
///
/// Answers are installed in two steps: a round sends the install so each shard on the
/// path registers an inactive entry, and the following round activates it. A deletion
/// acknowledged in between is seen by the classifier before activation, so the id can
/// be withheld from `activate` and dropped instead.
#[derive(Debug, Default)]
pub struct CacheClassifier {
    good: FxHashSet<CacheId>,
    bad: FxHashSet<CacheId>,
    transient_bad: FxHashSet<CacheId>,
    staged: Vec<CacheInstall>,
    prepared: Vec<CacheId>,
    round: Option<RoundInFlight>,
    generation: u64,
    active_queries: BTreeMap<u64, usize>,
    retired: VecDeque<(u64, Vec<CacheId>)>,
}

impl CacheClassifier {
    /// Whether `cache_id` must not be trusted: a settled deletion invalidated it or it is
    /// bad in the current or previous broadcast.
    pub fn is_invalidated(&self, cache_id: CacheId, deletions: &DeletionRegistry) -> bool {
        deletions.is_invalidated(cache_id)
            || self.bad.contains(&cache_id)
            || self.transient_bad.contains(&cache_id)
    }

    /// Marks `cache_id` good. Ignored for invalidated ids.
    pub fn mark_good(&mut self, cache_id: CacheId, deletions: &DeletionRegistry) -> bool {
        if self.is_invalidated(cache_id, deletions) {
            return false;
        }
        self.good.insert(cache_id)
    }

    /// Marks `cache_id` bad so the next broadcast drops it everywhere.
    pub fn mark_bad(&mut self, cache_id: CacheId) {
        self.good.remove(&cache_id);
        self.bad.insert(cache_id);
    }

    /// Queues a fresh positive answer for the next broadcast.
    pub fn stage_install(&mut self, install: CacheInstall) {
        self.staged.push(install);
    }

    /// Registers a query starting now and returns the generation it must be counted under.
    pub fn enter_query(&mut self) -> u64 {
        *self.active_queries.entry(self.generation).or_default() += 1;
        self.generation
    }

    /// Unregisters a query started in `generation`.
    pub fn leave_query(&mut self, generation: u64) {
        if let Some(count) = self.active_queries.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                self.active_queries.remove(&generation);
            }
        }
    }

    /// Whether a broadcast is waiting for acknowledgments.
    pub fn round_in_flight(&self) -> bool {
        self.round.is_some()
    }

    /// Current generation; bumped by every completed round.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Installs prepared by the last round and awaiting activation.
    pub fn prepared(&self) -> &[CacheId] {
        &self.prepared
    }

    /// Builds the next broadcast, or `None` when a round is already in flight or there is
    /// nothing to send.
    pub fn begin_round(&mut self, deletions: &DeletionRegistry) -> Option<CacheUpdate> {
        if self.round.is_some() {
            return None;
        }
        let mut activate = Vec::with_capacity(self.prepared.len());
        for id in std::mem::take(&mut self.prepared) {
            if self.is_invalidated(id, deletions) {
                self.good.remove(&id);
                self.bad.insert(id);
            } else {
                activate.push(id);
            }
        }
        if self.good.is_empty() && self.bad.is_empty() && self.staged.is_empty() && activate.is_empty()
        {
            return None;
        }

        let mut good: Vec<CacheId> = self.good.drain().collect();
        let mut bad: Vec<CacheId> = self.bad.drain().collect();
        good.sort_unstable();
        bad.sort_unstable();
        self.transient_bad.extend(bad.iter().copied());
        let install = std::mem::take(&mut self.staged);
        let installed: Vec<CacheId> = install.iter().map(|i| i.cache_id).collect();

        let summary = RoundSummary {
            generation: self.generation,
            good: good.len(),
            bad: bad.len(),
            installed: installed.len(),
            activated: activate.len(),
            rejected: Vec::new(),
        };
        self.round = Some(RoundInFlight {
            acks: 0,
            rejected: FxHashSet::default(),
            installed,
            bad: bad.clone(),
            summary,
        });
        Some(CacheUpdate {
            good,
            bad,
            install,
            activate,
        })
    }

    /// Puts the contents of an unsent broadcast back so the next round carries them.
    pub fn abandon_round(&mut self, update: CacheUpdate) {
        if self.round.take().is_none() {
            return;
        }
        self.good.extend(update.good);
        self.bad.extend(update.bad);
        let mut staged = update.install;
        staged.append(&mut self.staged);
        self.staged = staged;
        self.prepared = update.activate;
    }

    /// Counts one shard acknowledgment and returns the total so far.
    pub fn record_ack(&mut self, rejected: &[CacheId]) -> Option<usize> {
        let Some(round) = self.round.as_mut() else {
            debug!("coordinator.classifier.ack_without_round");
            return None;
        };
        round.acks += 1;
        round.rejected.extend(rejected.iter().copied());
        Some(round.acks)
    }

    /// Acknowledgments received for the round in flight.
    pub fn acks(&self) -> Option<usize> {
        self.round.as_ref().map(|r| r.acks)
    }

    /// Closes the round in flight: rejected installs become bad, the rest wait for
    /// activation, and bad ids older than every running query are forgotten.
    pub fn finish_round(&mut self, deletions: &mut DeletionRegistry) -> Option<RoundSummary> {
        let round = self.round.take()?;
        let mut rejected: Vec<CacheId> = round.rejected.into_iter().collect();
        rejected.sort_unstable();
        for id in &rejected {
            self.bad.insert(*id);
        }
        self.prepared = round
            .installed
            .into_iter()
            .filter(|id| rejected.binary_search(id).is_err())
            .collect();
        self.transient_bad = round.bad.iter().copied().collect();
        self.retired.push_back((self.generation, round.bad));
        self.generation += 1;
        self.prune(deletions);

        let mut summary = round.summary;
        summary.rejected = rejected;
        Some(summary)
    }

    fn prune(&mut self, deletions: &mut DeletionRegistry) {
        let oldest_active = self.active_queries.keys().next().copied();
        while let Some((generation, _)) = self.retired.front() {
            // A query counted under an older generation may still present these ids.
            if oldest_active.is_some_and(|oldest| oldest <= *generation) {
                break;
            }
            if let Some((generation, ids)) = self.retired.pop_front() {
                debug!(generation, ids = ids.len(), "coordinator.classifier.prune");
                deletions.forget(&ids);
            }
        }
    }
}

use std::time::Instant;

use tracing::{debug, warn};

use crate::net::message::{FrontierNode, ReachabilityQuery};
use crate::net::Message;
use crate::primitives::clock::ClockSnapshot;
use crate::storage::{CacheInstall, PropertyPredicate};
use crate::types::{CacheId, GraphElementHandle, HopId, RequestId, Result, WeftError};

use super::pending::{Reply, ReplyKind, ReplyTicket};
use super::Coordinator;

/// Answer to a reachability query with the details of how it was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReachabilityOutcome {
    /// Whether the target is reachable in the query's snapshot.
    pub reachable: bool,
    /// Floods issued; more than one means a stale cached answer was discarded.
    pub attempts: u32,
    /// Cached answer the result came from, `None` when computed fresh.
    pub used_cache_id: Option<CacheId>,
}

enum Settlement {
    Settled,
    TimedOut,
}

/// Drives one query: issue a flood, wait for the answer, wait until the deletions
/// that preceded the query have settled, then accept the answer or retry without the
/// cache id it came from.
struct ReachabilityOrchestrator<'a> {
    coordinator: &'a Coordinator,
    source: GraphElementHandle,
    target: GraphElementHandle,
    predicate: PropertyPredicate,
    snapshot: ClockSnapshot,
    ignore: Vec<CacheId>,
    awaiting_deletion: Option<RequestId>,
    generation: u64,
    attempts: u32,
}

impl Coordinator {
    /// Whether `to` is reachable from `from` along edges carrying every pair of
    /// `predicate`, as of the moment the call starts.
    pub fn reachable(
        &self,
        from: GraphElementHandle,
        to: GraphElementHandle,
        predicate: &PropertyPredicate,
    ) -> Result<bool> {
        self.reachable_detailed(from, to, predicate)
            .map(|outcome| outcome.reachable)
    }

    /// Like [`Coordinator::reachable`] but also reports retries and cache use.
    pub fn reachable_detailed(
        &self,
        from: GraphElementHandle,
        to: GraphElementHandle,
        predicate: &PropertyPredicate,
    ) -> Result<ReachabilityOutcome> {
        let mut orchestrator = ReachabilityOrchestrator::begin(self, from, to, predicate)?;
        orchestrator.run()
    }
}

impl<'a> ReachabilityOrchestrator<'a> {
    fn begin(
        coordinator: &'a Coordinator,
        source: GraphElementHandle,
        target: GraphElementHandle,
        predicate: &PropertyPredicate,
    ) -> Result<Self> {
        let mut state = coordinator.state()?;
        for handle in [source, target] {
            if state.directory.node(handle)?.is_deleted() {
                warn!(%handle, "coordinator.reachable.deleted_endpoint");
                return Err(WeftError::DeletedEndpoint(handle));
            }
        }
        let snapshot = coordinator.inner.clock.snapshot();
        let awaiting_deletion = state.deletions.last_pending();
        let generation = state.classifier.enter_query();
        Ok(Self {
            coordinator,
            source,
            target,
            predicate: predicate.clone(),
            snapshot,
            ignore: Vec::new(),
            awaiting_deletion,
            generation,
            attempts: 0,
        })
    }

    fn run(&mut self) -> Result<ReachabilityOutcome> {
        if self.source == self.target {
            return Ok(ReachabilityOutcome {
                reachable: true,
                attempts: 0,
                used_cache_id: None,
            });
        }
        loop {
            self.attempts += 1;
            let ticket = self.issue()?;
            let query_id = ticket.request_id();
            let reply = self.coordinator.await_reply(ticket)?;
            let settlement = self.settle()?;
            if let Some(outcome) = self.decide(query_id, reply, settlement)? {
                return Ok(outcome);
            }
        }
    }

    fn issue(&self) -> Result<ReplyTicket> {
        let mut state = self.coordinator.state()?;
        let ticket = state.pending.register(ReplyKind::Reachability);
        let query_id = ticket.request_id();
        state.floods.start(query_id);
        let message = Message::Reachability(ReachabilityQuery {
            query_id,
            hop: HopId::root(query_id),
            sources: vec![FrontierNode {
                node: self.source,
                path: Vec::new(),
            }],
            target: self.target,
            snapshot: self.snapshot.clone(),
            predicate: self.predicate.clone(),
            ignore: self.ignore.clone(),
        });
        if let Err(err) = self
            .coordinator
            .dispatch(&mut state, query_id, self.source.shard, &message)
        {
            state.floods.finish(query_id);
            return Err(err);
        }
        debug!(
            query_id,
            attempt = self.attempts,
            ignored = self.ignore.len(),
            "coordinator.reachable.issue"
        );
        Ok(ticket)
    }

    /// Waits, once per query, until every deletion issued before the query started has
    /// been acknowledged.
    fn settle(&mut self) -> Result<Settlement> {
        let Some(last) = self.awaiting_deletion.take() else {
            return Ok(Settlement::Settled);
        };
        let inner = &self.coordinator.inner;
        let deadline = inner.options.reply_timeout.map(|t| Instant::now() + t);
        let mut state = inner.state.lock();
        while !state.deletions.settled_through(last) {
            if state.shutdown {
                return Err(WeftError::Disconnected("coordinator".into()));
            }
            match deadline {
                Some(deadline) => {
                    if inner.settled.wait_until(&mut state, deadline).timed_out()
                        && !state.deletions.settled_through(last)
                    {
                        warn!(last_deletion = last, "coordinator.reachable.settlement_timed_out");
                        return Ok(Settlement::TimedOut);
                    }
                }
                None => inner.settled.wait(&mut state),
            }
        }
        Ok(Settlement::Settled)
    }

    fn decide(
        &mut self,
        query_id: RequestId,
        reply: Reply,
        settlement: Settlement,
    ) -> Result<Option<ReachabilityOutcome>> {
        let (reachable, used_cache_id, path) = match reply {
            Reply::Reachability {
                reachable,
                used_cache_id,
                path,
            } => (reachable, used_cache_id, path),
            Reply::Rejected(reason) => return Err(WeftError::Rejected(reason)),
            _ => {
                return Err(WeftError::UnexpectedReply {
                    request_id: query_id,
                    expected: "reachability",
                })
            }
        };
        let mut guard = self.coordinator.state()?;
        let state = &mut *guard;

        if used_cache_id == query_id {
            if reachable && !path.is_empty() {
                state.classifier.stage_install(CacheInstall {
                    cache_id: query_id,
                    target: self.target,
                    predicate: self.predicate.clone(),
                    path,
                });
            }
            debug!(query_id, reachable, attempts = self.attempts, "coordinator.reachable.fresh");
            return Ok(Some(ReachabilityOutcome {
                reachable,
                attempts: self.attempts,
                used_cache_id: None,
            }));
        }

        let stale = match settlement {
            // Unverifiable: a deletion that may invalidate the entry never settled.
            Settlement::TimedOut => true,
            Settlement::Settled => state
                .classifier
                .is_invalidated(used_cache_id, &state.deletions),
        };
        if stale {
            if state.deletions.is_invalidated(used_cache_id) {
                state.classifier.mark_bad(used_cache_id);
            }
            self.ignore.push(used_cache_id);
            debug!(query_id, cache_id = used_cache_id, "coordinator.reachable.stale_cache_retry");
            return Ok(None);
        }

        state.classifier.mark_good(used_cache_id, &state.deletions);
        debug!(query_id, cache_id = used_cache_id, "coordinator.reachable.cached");
        Ok(Some(ReachabilityOutcome {
            reachable,
            attempts: self.attempts,
            used_cache_id: Some(used_cache_id),
        }))
    }
}

impl Drop for ReachabilityOrchestrator<'_> {
    fn drop(&mut self) {
        self.coordinator
            .inner
            .state
            .lock()
            .classifier
            .leave_query(self.generation);
    }
}

//! Central coordinator.
//!
//! Assigns causal stamps, places new nodes on shards, tracks every outstanding
//! request, orchestrates reachability queries with cache validation, and runs the
//! periodic cache broadcast. All bookkeeping lives behind one mutex; messages to a
//! shard are queued while that mutex is held, so a shard sees them in stamp order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::net::{send_message, Endpoint, Message, Transport};
use crate::primitives::clock::{CausalStamp, ClockSnapshot, VectorClock};
use crate::types::{CacheId, GraphElementHandle, RequestId, Result, ShardId, WeftError};

/// Cache id bookkeeping between broadcasts.
pub mod classifier;
/// Deletions awaiting acknowledgment and the cache ids they invalidated.
pub mod deletions;
/// Metadata of every created element.
pub mod directory;
/// Flood termination tracking.
pub mod flood;
/// Requests waiting for shard replies.
pub mod pending;

mod reachability;
mod server;
mod updater;

use classifier::CacheClassifier;
use deletions::DeletionRegistry;
use directory::{ElementDirectory, ElementMetadata};
use flood::FloodTracker;
use pending::{PendingRequestTable, Reply, ReplyKind, ReplyTicket};

pub use classifier::RoundSummary;
pub use reachability::ReachabilityOutcome;
pub use server::CoordinatorServer;
pub use updater::{CacheUpdater, CacheUpdaterMessage};

/// Runtime knobs of the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// How long a request waits for its shard reply; `None` waits forever.
    pub reply_timeout: Option<Duration>,
    /// Period of the cache broadcast.
    pub cache_update_interval: Duration,
    /// Threads handling shard-originated messages.
    pub shard_workers: usize,
    /// Threads handling client requests.
    pub client_workers: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            cache_update_interval: Duration::from_millis(5000),
            shard_workers: 4,
            client_workers: 4,
        }
    }
}

/// Point-in-time counters for observability and tests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Requests waiting for a shard reply.
    pub pending_requests: usize,
    /// Deletions waiting for acknowledgment.
    pub pending_deletions: usize,
    /// Reachability floods in progress.
    pub floods: usize,
    /// Elements ever created.
    pub elements: usize,
    /// Completed cache broadcast rounds.
    pub cache_generation: u64,
    /// Invalidated cache ids not yet pruned.
    pub remembered_invalidations: usize,
}

pub(crate) struct CoordinatorState {
    pub(crate) pending: PendingRequestTable,
    pub(crate) classifier: CacheClassifier,
    pub(crate) deletions: DeletionRegistry,
    pub(crate) floods: FloodTracker,
    pub(crate) directory: ElementDirectory,
    placement: u32,
    pub(crate) shutdown: bool,
}

impl CoordinatorState {
    fn next_placement(&mut self, num_shards: u32) -> ShardId {
        let shard = ShardId(self.placement % num_shards);
        self.placement = self.placement.wrapping_add(1);
        shard
    }
}

struct Inner {
    num_shards: u32,
    clock: VectorClock,
    state: Mutex<CoordinatorState>,
    settled: Condvar,
    cache_acked: Condvar,
    transport: Arc<dyn Transport>,
    options: CoordinatorOptions,
}

/// Handle to the coordinator; cheap to clone and shared by every handler thread.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Creates a coordinator for `num_shards` shards that sends through `transport`.
    ///
    /// The transport should be bound to [`Endpoint::Coordinator`] so shard replies come
    /// back to the inbox served by [`CoordinatorServer`].
    pub fn new(
        num_shards: u32,
        options: CoordinatorOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if num_shards == 0 {
            return Err(WeftError::Invalid("a cluster needs at least one shard"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                num_shards,
                clock: VectorClock::new(num_shards as usize),
                state: Mutex::new(CoordinatorState {
                    pending: PendingRequestTable::new(),
                    classifier: CacheClassifier::default(),
                    deletions: DeletionRegistry::default(),
                    floods: FloodTracker::default(),
                    directory: ElementDirectory::default(),
                    placement: 0,
                    shutdown: false,
                }),
                settled: Condvar::new(),
                cache_acked: Condvar::new(),
                transport,
                options,
            }),
        })
    }

    /// Number of shards.
    pub fn num_shards(&self) -> u32 {
        self.inner.num_shards
    }

    /// Options the coordinator was built with.
    pub fn options(&self) -> &CoordinatorOptions {
        &self.inner.options
    }

    /// Current value of every shard clock.
    pub fn clock_snapshot(&self) -> ClockSnapshot {
        self.inner.clock.snapshot()
    }

    /// Metadata recorded for `handle`.
    pub fn metadata(&self, handle: GraphElementHandle) -> Option<ElementMetadata> {
        self.inner.state.lock().directory.get(handle).cloned()
    }

    /// Bookkeeping counters.
    pub fn stats(&self) -> CoordinatorStats {
        let state = self.inner.state.lock();
        CoordinatorStats {
            pending_requests: state.pending.len(),
            pending_deletions: state.deletions.pending_len(),
            floods: state.floods.len(),
            elements: state.directory.len(),
            cache_generation: state.classifier.generation(),
            remembered_invalidations: state.deletions.invalidated_len(),
        }
    }

    /// Creates a node on the next shard in round-robin order.
    pub fn create_node(&self) -> Result<GraphElementHandle> {
        let (ticket, stamp) = {
            let mut state = self.state()?;
            let shard = state.next_placement(self.inner.num_shards);
            let stamp = self.inner.clock.advance(shard)?;
            let ticket = state.pending.register(ReplyKind::Create);
            let message = Message::CreateNode {
                request_id: ticket.request_id(),
                stamp,
            };
            self.dispatch(&mut state, ticket.request_id(), shard, &message)?;
            (ticket, stamp)
        };
        let request_id = ticket.request_id();
        let handle = created_handle(request_id, self.await_reply(ticket)?)?;
        if !handle.is_node() || handle.shard != stamp.shard {
            return Err(WeftError::UnexpectedReply {
                request_id,
                expected: "node handle",
            });
        }
        self.inner
            .state
            .lock()
            .directory
            .insert(ElementMetadata::new(handle, stamp));
        debug!(%handle, stamp = stamp.counter, "coordinator.create_node");
        Ok(handle)
    }

    /// Creates an edge `from -> to`, stored on `from`'s shard.
    pub fn create_edge(
        &self,
        from: GraphElementHandle,
        to: GraphElementHandle,
    ) -> Result<GraphElementHandle> {
        let (ticket, stamp) = {
            let mut state = self.state()?;
            let (src_shard, src_deleted) = {
                let src = state.directory.node(from)?;
                (src.owning_shard, src.is_deleted())
            };
            let (dst_created, dst_deleted) = {
                let dst = state.directory.node(to)?;
                (dst.creation_time, dst.is_deleted())
            };
            if src_deleted || dst_deleted {
                warn!(%from, %to, "coordinator.create_edge.deleted_endpoint");
                return Err(WeftError::ProtocolViolation("edge endpoint is deleted"));
            }
            let stamp = self.inner.clock.advance(src_shard)?;
            let ticket = state.pending.register(ReplyKind::Create);
            let message = Message::CreateEdge {
                request_id: ticket.request_id(),
                src: from,
                dst: to,
                dst_created,
                stamp,
            };
            self.dispatch(&mut state, ticket.request_id(), src_shard, &message)?;
            (ticket, stamp)
        };
        let request_id = ticket.request_id();
        let handle = created_handle(request_id, self.await_reply(ticket)?)?;
        if !handle.is_edge() || handle.shard != stamp.shard {
            return Err(WeftError::UnexpectedReply {
                request_id,
                expected: "edge handle",
            });
        }
        self.inner
            .state
            .lock()
            .directory
            .insert(ElementMetadata::new(handle, stamp));
        debug!(%handle, %from, %to, "coordinator.create_edge");
        Ok(handle)
    }

    /// Deletes `node` and waits until its shard acknowledges.
    ///
    /// The node counts as deleted from the moment the request is sent. If the shard
    /// refuses the deletion the node is live again.
    pub fn delete_node(&self, node: GraphElementHandle) -> Result<()> {
        let (ticket, stamp) = {
            let mut state = self.state()?;
            let meta = state.directory.node(node)?;
            if meta.is_deleted() {
                warn!(%node, "coordinator.delete_node.already_deleted");
                return Err(WeftError::ProtocolViolation("node already deleted"));
            }
            let shard = meta.owning_shard;
            let stamp = self.inner.clock.advance(shard)?;
            let message_for = |request_id| Message::DeleteNode {
                request_id,
                node,
                stamp,
            };
            let ticket = self.dispatch_deletion(&mut state, node, stamp, message_for)?;
            (ticket, stamp)
        };
        self.await_deletion(ticket, node, stamp)?;
        debug!(%node, "coordinator.delete_node");
        Ok(())
    }

    /// Deletes `edge`, which must leave `node`, and waits until its shard acknowledges.
    pub fn delete_edge(&self, node: GraphElementHandle, edge: GraphElementHandle) -> Result<()> {
        let (ticket, stamp) = {
            let mut state = self.state()?;
            let shard = Self::check_live_edge(&state, node, edge)?;
            let stamp = self.inner.clock.advance(shard)?;
            let message_for = |request_id| Message::DeleteEdge {
                request_id,
                node,
                edge,
                stamp,
            };
            let ticket = self.dispatch_deletion(&mut state, edge, stamp, message_for)?;
            (ticket, stamp)
        };
        self.await_deletion(ticket, edge, stamp)?;
        debug!(%node, %edge, "coordinator.delete_edge");
        Ok(())
    }

    /// Attaches `key = value` to `edge`. Returns once the message is queued.
    pub fn add_edge_property(
        &self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let shard = Self::check_live_edge(&state, node, edge)?;
        let stamp = self.inner.clock.advance(shard)?;
        let request_id = state.pending.next_request_id();
        let message = Message::AddEdgeProperty {
            request_id,
            node,
            edge,
            key: key.into(),
            value: value.into(),
            stamp,
        };
        send_message(&*self.inner.transport, Endpoint::Shard(shard), &message)?;
        debug!(request_id, %edge, "coordinator.add_edge_property");
        Ok(())
    }

    /// Deletes every property named `key` from `edge`. Returns once the message is
    /// queued; the deletion counts as pending until the shard acknowledges it.
    pub fn delete_edge_property(
        &self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let shard = Self::check_live_edge(&state, node, edge)?;
        let stamp = self.inner.clock.advance(shard)?;
        let request_id = state.pending.next_request_id();
        state.deletions.begin(request_id);
        let message = Message::DeleteEdgeProperty {
            request_id,
            node,
            edge,
            key: key.into(),
            stamp,
        };
        if let Err(err) = send_message(&*self.inner.transport, Endpoint::Shard(shard), &message) {
            state.deletions.settle(request_id, &[]);
            return Err(err);
        }
        debug!(request_id, %edge, "coordinator.delete_edge_property");
        Ok(())
    }

    /// Stops the coordinator: fails every waiting request and wakes blocked queries.
    ///
    /// Idempotent. Operations started afterwards fail with [`WeftError::Disconnected`].
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        let failed = state.pending.fail_all();
        self.inner.settled.notify_all();
        self.inner.cache_acked.notify_all();
        info!(failed, "coordinator.shutdown");
    }

    /// Whether [`Coordinator::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    fn state(&self) -> Result<MutexGuard<'_, CoordinatorState>> {
        let state = self.inner.state.lock();
        if state.shutdown {
            return Err(WeftError::Disconnected("coordinator".into()));
        }
        Ok(state)
    }

    fn check_live_edge(
        state: &CoordinatorState,
        node: GraphElementHandle,
        edge: GraphElementHandle,
    ) -> Result<ShardId> {
        state.directory.node(node)?;
        let meta = state.directory.edge(edge)?;
        if meta.owning_shard != node.shard {
            return Err(WeftError::Invalid("edge is not stored with the given node"));
        }
        if meta.is_deleted() {
            warn!(%edge, "coordinator.edge.already_deleted");
            return Err(WeftError::ProtocolViolation("edge already deleted"));
        }
        Ok(meta.owning_shard)
    }

    fn dispatch(
        &self,
        state: &mut CoordinatorState,
        request_id: RequestId,
        shard: ShardId,
        message: &Message,
    ) -> Result<()> {
        if let Err(err) = send_message(&*self.inner.transport, Endpoint::Shard(shard), message) {
            state.pending.cancel(request_id);
            warn!(request_id, shard = shard.0, error = %err, "coordinator.dispatch.failed");
            return Err(err);
        }
        Ok(())
    }

    fn dispatch_deletion(
        &self,
        state: &mut CoordinatorState,
        element: GraphElementHandle,
        stamp: CausalStamp,
        message_for: impl FnOnce(RequestId) -> Message,
    ) -> Result<ReplyTicket> {
        state.directory.mark_deleted(element, stamp)?;
        let ticket = state.pending.register(ReplyKind::Delete);
        let request_id = ticket.request_id();
        state.deletions.begin(request_id);
        if let Err(err) = self.dispatch(state, request_id, element.shard, &message_for(request_id)) {
            state.deletions.settle(request_id, &[]);
            state.directory.revive(element, stamp);
            return Err(err);
        }
        Ok(ticket)
    }

    fn await_reply(&self, ticket: ReplyTicket) -> Result<Reply> {
        let request_id = ticket.request_id();
        let outcome = match self.inner.options.reply_timeout {
            Some(timeout) => ticket.wait_timeout(timeout),
            None => ticket.wait(),
        };
        if let Err(WeftError::Timeout(_)) = &outcome {
            let mut state = self.inner.state.lock();
            state.pending.cancel(request_id);
            state.floods.finish(request_id);
            warn!(request_id, "coordinator.request.timed_out");
        }
        outcome
    }

    /// Waits for the deletion of `element`. A refusal revives the element; a timeout
    /// leaves it deleted since the shard may still apply the request.
    fn await_deletion(
        &self,
        ticket: ReplyTicket,
        element: GraphElementHandle,
        stamp: CausalStamp,
    ) -> Result<()> {
        let request_id = ticket.request_id();
        match self.await_reply(ticket)? {
            Reply::Deleted { .. } => Ok(()),
            Reply::Rejected(reason) => {
                self.inner.state.lock().directory.revive(element, stamp);
                warn!(request_id, %element, "coordinator.deletion.refused");
                Err(WeftError::Rejected(reason))
            }
            _ => Err(WeftError::UnexpectedReply {
                request_id,
                expected: "delete",
            }),
        }
    }

    /// Records a deletion acknowledgment: the invalidated ids become bad and queries
    /// waiting for settlement are woken.
    fn settle_deletion(
        &self,
        state: &mut CoordinatorState,
        request_id: RequestId,
        invalidated: &[CacheId],
    ) -> bool {
        if !state.deletions.settle(request_id, invalidated) {
            return false;
        }
        for id in invalidated {
            state.classifier.mark_bad(*id);
        }
        self.inner.settled.notify_all();
        debug!(
            request_id,
            invalidated = invalidated.len(),
            "coordinator.deletion.settled"
        );
        true
    }
}

fn created_handle(request_id: RequestId, reply: Reply) -> Result<GraphElementHandle> {
    match reply {
        Reply::Created(handle) => Ok(handle),
        Reply::Rejected(reason) => Err(WeftError::Rejected(reason)),
        _ => Err(WeftError::UnexpectedReply {
            request_id,
            expected: "create",
        }),
    }
}

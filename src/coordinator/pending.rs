use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::storage::PathHop;
use crate::types::{CacheId, GraphElementHandle, RequestId, Result, WeftError};

/// Which reply a pending request expects.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplyKind {
    /// `create_node` / `create_edge`.
    Create,
    /// `delete_node` / `delete_edge`.
    Delete,
    /// One attempt of a reachability query.
    Reachability,
}

impl ReplyKind {
    fn name(self) -> &'static str {
        match self {
            ReplyKind::Create => "create",
            ReplyKind::Delete => "delete",
            ReplyKind::Reachability => "reachability",
        }
    }
}

/// Shard answer handed to a waiting request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Handle of the created element.
    Created(GraphElementHandle),
    /// Deletion applied; lists the cache ids it invalidated.
    Deleted {
        /// Cache ids dropped by the owning shard.
        invalidated: Vec<CacheId>,
    },
    /// Outcome of one reachability flood.
    Reachability {
        /// Whether the target was reached.
        reachable: bool,
        /// Cache id the answer came from; equals the query id when fresh.
        used_cache_id: CacheId,
        /// Path found by a fresh positive answer.
        path: Vec<PathHop>,
    },
    /// The shard refused the request. Matches any kind.
    Rejected(String),
}

impl Reply {
    fn answers(&self, kind: ReplyKind) -> bool {
        matches!(
            (self, kind),
            (Reply::Created(_), ReplyKind::Create)
                | (Reply::Deleted { .. }, ReplyKind::Delete)
                | (Reply::Reachability { .. }, ReplyKind::Reachability)
                | (Reply::Rejected(_), _)
        )
    }
}

/// Result of routing a reply.
#[derive(Debug, Eq, PartialEq)]
pub enum DeliverOutcome {
    /// Handed to the waiter; the entry is gone.
    Delivered,
    /// No request with this id is waiting.
    UnknownRequest,
    /// The request expects a different reply; the entry stays.
    KindMismatch {
        /// Kind the request is waiting for.
        expected: ReplyKind,
    },
}

struct ReplySlot {
    result: Mutex<Option<Result<Reply>>>,
    cv: Condvar,
}

impl ReplySlot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Result<Reply>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.cv.notify_all();
        }
    }
}

/// Waiting half of a registered request.
pub struct ReplyTicket {
    request_id: RequestId,
    slot: Arc<ReplySlot>,
}

impl ReplyTicket {
    /// Id the request was registered under.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Blocks until the reply arrives or the table fails the request.
    pub fn wait(self) -> Result<Reply> {
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            self.slot.cv.wait(&mut guard);
        }
    }

    /// Like [`ReplyTicket::wait`] but gives up after `timeout` with [`WeftError::Timeout`].
    ///
    /// The caller still owns the table entry and should cancel it.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.result.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            if self.slot.cv.wait_until(&mut guard, deadline).timed_out() {
                return guard.take().unwrap_or(Err(WeftError::Timeout(self.request_id)));
            }
        }
    }
}

struct PendingRequest {
    kind: ReplyKind,
    slot: Arc<ReplySlot>,
}

/// Requests waiting for a shard reply, keyed by request id.
///
/// Also allocates request ids for every coordinator operation, including the ones that
/// never wait for a reply.
#[derive(Default)]
pub struct PendingRequestTable {
    last_id: RequestId,
    entries: FxHashMap<RequestId, PendingRequest>,
}

impl PendingRequestTable {
    /// Empty table; the first id handed out is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh request id without registering a waiter.
    pub fn next_request_id(&mut self) -> RequestId {
        self.last_id += 1;
        self.last_id
    }

    /// Allocates an id and registers a waiter expecting `kind`.
    pub fn register(&mut self, kind: ReplyKind) -> ReplyTicket {
        let request_id = self.next_request_id();
        let slot = Arc::new(ReplySlot::new());
        self.entries.insert(
            request_id,
            PendingRequest {
                kind,
                slot: Arc::clone(&slot),
            },
        );
        ReplyTicket { request_id, slot }
    }

    /// Routes `reply` to the request waiting under `request_id`.
    pub fn deliver(&mut self, request_id: RequestId, reply: Reply) -> DeliverOutcome {
        let Some(entry) = self.entries.get(&request_id) else {
            debug!(request_id, "coordinator.pending.unknown_request");
            return DeliverOutcome::UnknownRequest;
        };
        if !reply.answers(entry.kind) {
            debug!(
                request_id,
                expected = entry.kind.name(),
                "coordinator.pending.kind_mismatch"
            );
            return DeliverOutcome::KindMismatch {
                expected: entry.kind,
            };
        }
        if let Some(entry) = self.entries.remove(&request_id) {
            entry.slot.finish(Ok(reply));
        }
        DeliverOutcome::Delivered
    }

    /// Drops the entry for `request_id`; a later reply is then unknown.
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        self.entries.remove(&request_id).is_some()
    }

    /// Number of waiting requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing waits.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails every waiter with [`WeftError::Disconnected`] and returns how many there were.
    pub fn fail_all(&mut self) -> usize {
        let failed = self.entries.len();
        for (request_id, entry) in self.entries.drain() {
            entry.slot.finish(Err(WeftError::Disconnected(format!(
                "request {request_id}"
            ))));
        }
        failed
    }
}

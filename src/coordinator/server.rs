use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::net::message::{ClientRequest, ClientResponse};
use crate::net::{recv_message, send_message, Endpoint, Message, Transport};
use crate::primitives::concurrency::WorkerPool;
use crate::types::{Result, WeftError};

use super::flood::FloodStatus;
use super::pending::Reply;
use super::updater::CacheUpdater;
use super::Coordinator;

/// Threads serving a [`Coordinator`]: one receive loop per inbox feeding a worker pool,
/// plus the periodic cache updater.
///
/// Shard messages and client requests use separate pools. Client handlers block on
/// shard replies; shard handlers never block, so replies always find a free worker.
pub struct CoordinatorServer {
    coordinator: Coordinator,
    receivers: Vec<JoinHandle<()>>,
    updater: CacheUpdater,
}

impl CoordinatorServer {
    /// Starts serving `shard_inbox` (bound to [`Endpoint::Coordinator`]) and `frontend`
    /// (bound to [`Endpoint::Frontend`]).
    pub fn spawn(
        coordinator: Coordinator,
        shard_inbox: Arc<dyn Transport>,
        frontend: Arc<dyn Transport>,
    ) -> Result<Self> {
        let options = coordinator.options().clone();
        let shard_pool = WorkerPool::new("weft-shard-handler", options.shard_workers)?;
        let client_pool = WorkerPool::new("weft-client-handler", options.client_workers)?;

        let on_shard = {
            let coordinator = coordinator.clone();
            move |from: Endpoint, message: Message| coordinator.on_shard_message(from, message)
        };
        let on_client = {
            let coordinator = coordinator.clone();
            let frontend = Arc::clone(&frontend);
            move |from: Endpoint, message: Message| {
                coordinator.on_client_message(&*frontend, from, message)
            }
        };
        let receivers = vec![
            thread::Builder::new()
                .name("weft-coordinator-rx".into())
                .spawn(move || receive_loop("coordinator", &*shard_inbox, shard_pool, on_shard))?,
            thread::Builder::new()
                .name("weft-frontend-rx".into())
                .spawn(move || receive_loop("frontend", &*frontend, client_pool, on_client))?,
        ];
        let updater = CacheUpdater::spawn(coordinator.clone(), options.cache_update_interval)?;
        info!(
            shards = coordinator.num_shards(),
            shard_workers = options.shard_workers,
            client_workers = options.client_workers,
            "coordinator.server.started"
        );
        Ok(Self {
            coordinator,
            receivers,
            updater,
        })
    }

    /// The served coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Asks the updater to broadcast now instead of at the next tick.
    pub fn trigger_cache_round(&self) -> bool {
        self.updater.trigger()
    }

    /// Stops the coordinator and the updater, then joins the receive loops.
    ///
    /// The receive loops exit when their transports disconnect, so the network must be
    /// shut down before or concurrently with this call.
    pub fn shutdown(mut self) {
        self.coordinator.shutdown();
        self.updater.shutdown();
        for handle in self.receivers.drain(..) {
            if handle.join().is_err() {
                warn!("coordinator.server.receiver_panicked");
            }
        }
        info!("coordinator.server.stopped");
    }
}

fn receive_loop<F>(inbox: &'static str, transport: &dyn Transport, pool: WorkerPool, handler: F)
where
    F: Fn(Endpoint, Message) + Clone + Send + 'static,
{
    loop {
        match recv_message(transport) {
            Ok((from, message)) => {
                let handler = handler.clone();
                if !pool.submit(move || handler(from, message)) {
                    break;
                }
            }
            Err(WeftError::Disconnected(_)) => break,
            Err(err) => warn!(inbox, error = %err, "coordinator.inbox.malformed_frame"),
        }
    }
    debug!(inbox, "coordinator.inbox.closed");
}

impl Coordinator {
    pub(crate) fn on_shard_message(&self, from: Endpoint, message: Message) {
        let kind = message.kind();
        match message {
            Message::CreateAck { request_id, handle } => {
                self.inner
                    .state
                    .lock()
                    .pending
                    .deliver(request_id, Reply::Created(handle));
            }
            Message::DeleteAck {
                request_id,
                invalidated,
            } => {
                let mut state = self.inner.state.lock();
                self.settle_deletion(&mut state, request_id, &invalidated);
                state
                    .pending
                    .deliver(request_id, Reply::Deleted { invalidated });
            }
            Message::DeletePropertyAck {
                request_id,
                invalidated,
            } => {
                let mut state = self.inner.state.lock();
                self.settle_deletion(&mut state, request_id, &invalidated);
            }
            Message::Rejected { request_id, reason } => {
                warn!(%from, request_id, reason = %reason, "coordinator.request.rejected");
                let mut state = self.inner.state.lock();
                self.settle_deletion(&mut state, request_id, &[]);
                state.pending.deliver(request_id, Reply::Rejected(reason));
            }
            Message::ReachabilityReply {
                query_id,
                reachable,
                used_cache_id,
                path,
            } => {
                let mut state = self.inner.state.lock();
                state.floods.finish(query_id);
                state.pending.deliver(
                    query_id,
                    Reply::Reachability {
                        reachable,
                        used_cache_id,
                        path,
                    },
                );
            }
            Message::ReachabilityProgress {
                query_id,
                hop,
                forwarded,
            } => {
                let mut state = self.inner.state.lock();
                match state.floods.record(query_id, hop, &forwarded) {
                    FloodStatus::Running => {}
                    FloodStatus::Exhausted => {
                        debug!(query_id, "coordinator.flood.exhausted");
                        state.pending.deliver(
                            query_id,
                            Reply::Reachability {
                                reachable: false,
                                used_cache_id: query_id,
                                path: Vec::new(),
                            },
                        );
                    }
                    FloodStatus::Unknown => debug!(query_id, "coordinator.flood.stale_progress"),
                }
            }
            Message::CacheUpdateAck { rejected } => self.record_cache_ack(from, &rejected),
            _ => warn!(%from, kind, "coordinator.inbox.unexpected_message"),
        }
    }

    pub(crate) fn on_client_message(&self, frontend: &dyn Transport, client: Endpoint, message: Message) {
        let kind = message.kind();
        let Message::Client { ticket, request } = message else {
            warn!(%client, kind, "coordinator.frontend.unexpected_message");
            return;
        };
        let response = match request {
            ClientRequest::CreateNode => self.create_node().map(ClientResponse::Created),
            ClientRequest::CreateEdge { from, to } => {
                self.create_edge(from, to).map(ClientResponse::Created)
            }
            ClientRequest::DeleteNode { node } => {
                self.delete_node(node).map(|()| ClientResponse::Deleted)
            }
            ClientRequest::DeleteEdge { node, edge } => {
                self.delete_edge(node, edge).map(|()| ClientResponse::Deleted)
            }
            ClientRequest::Reachable {
                from,
                to,
                predicate,
            } => self
                .reachable(from, to, &predicate)
                .map(ClientResponse::Reachable),
            ClientRequest::AddEdgeProperty {
                node,
                edge,
                key,
                value,
            } => {
                if let Err(err) = self.add_edge_property(node, edge, key, value) {
                    warn!(%client, error = %err, "coordinator.frontend.add_edge_property_failed");
                }
                return;
            }
            ClientRequest::DeleteEdgeProperty { node, edge, key } => {
                if let Err(err) = self.delete_edge_property(node, edge, key) {
                    warn!(%client, error = %err, "coordinator.frontend.delete_edge_property_failed");
                }
                return;
            }
        };
        let response = response.unwrap_or_else(|err| {
            debug!(%client, ticket, error = %err, "coordinator.frontend.request_failed");
            ClientResponse::Rejected(err.to_string())
        });
        if let Err(err) = send_message(frontend, client, &Message::ClientReply { ticket, response }) {
            debug!(%client, error = %err, "coordinator.frontend.reply_failed");
        }
    }
}

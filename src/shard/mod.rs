//! Shard server.
//!
//! A shard owns a partition of the graph and its slice of the reachability cache.
//! One thread drains the shard's inbox in arrival order, so mutations apply in the
//! order their stamps were issued.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::net::message::{FrontierNode, ReachabilityQuery};
use crate::net::{recv_message, send_message, Endpoint, Message, Transport};
use crate::primitives::clock::CausalStamp;
use crate::storage::{AdjacencyStore, ArenaStore, CacheUpdate, Property, ReachCache};
use crate::types::{GraphElementHandle, HopId, RequestId, Result, ShardId, WeftError};

/// Single-hop reachability expansion.
pub mod propagate;

pub use propagate::{HopOutcome, ShardPropagator};

/// Runtime knobs of a shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardOptions {
    /// Maximum cached answers kept by the shard.
    pub cache_capacity: usize,
    /// Maximum frontier nodes per forwarded message.
    pub max_nodes_per_forward: usize,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            max_nodes_per_forward: 500,
        }
    }
}

/// One shard: its store, its cache and its inbox.
pub struct ShardServer<S = ArenaStore> {
    shard: ShardId,
    store: S,
    cache: ReachCache,
    transport: Arc<dyn Transport>,
    options: ShardOptions,
    next_hop: u64,
}

impl ShardServer<ArenaStore> {
    /// Shard with an empty arena.
    pub fn new(shard: ShardId, transport: Arc<dyn Transport>, options: ShardOptions) -> Self {
        Self::with_store(ArenaStore::new(shard), transport, options)
    }
}

impl<S: AdjacencyStore + Send + 'static> ShardServer<S> {
    /// Shard serving `store`.
    pub fn with_store(store: S, transport: Arc<dyn Transport>, options: ShardOptions) -> Self {
        let shard = store.shard();
        Self {
            shard,
            cache: ReachCache::new(shard, options.cache_capacity),
            store,
            transport,
            options,
            next_hop: 0,
        }
    }

    /// Shard id.
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// The shard's store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The shard's cache.
    pub fn cache(&self) -> &ReachCache {
        &self.cache
    }

    /// Runs [`ShardServer::run`] on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("weft-shard-{}", self.shard.0);
        Ok(thread::Builder::new().name(name).spawn(move || self.run())?)
    }

    /// Serves the inbox until the transport disconnects.
    pub fn run(mut self) {
        info!(shard = self.shard.0, "shard.started");
        loop {
            match recv_message(&*self.transport) {
                Ok((from, message)) => self.handle(from, message),
                Err(WeftError::Disconnected(_)) => break,
                Err(err) => warn!(shard = self.shard.0, error = %err, "shard.inbox.malformed_frame"),
            }
        }
        info!(shard = self.shard.0, "shard.stopped");
    }

    /// Applies one message.
    pub fn handle(&mut self, from: Endpoint, message: Message) {
        let kind = message.kind();
        let outcome = match message {
            Message::CreateNode { request_id, stamp } => self.on_create_node(request_id, stamp),
            Message::CreateEdge {
                request_id,
                src,
                dst,
                dst_created,
                stamp,
            } => self.on_create_edge(request_id, src, dst, dst_created, stamp),
            Message::DeleteNode {
                request_id,
                node,
                stamp,
            } => self.on_delete_node(request_id, node, stamp),
            Message::DeleteEdge {
                request_id,
                node,
                edge,
                stamp,
            } => self.on_delete_edge(request_id, node, edge, stamp),
            Message::AddEdgeProperty {
                node,
                edge,
                key,
                value,
                stamp,
                ..
            } => self
                .store
                .add_edge_property(node, edge, Property::new(key, value, stamp)),
            Message::DeleteEdgeProperty {
                request_id,
                node,
                edge,
                key,
                stamp,
            } => self.on_delete_edge_property(request_id, node, edge, &key, stamp),
            Message::Reachability(query) => self.on_reachability(&query),
            Message::CacheUpdate(update) => self.on_cache_update(&update),
            _ => {
                warn!(shard = self.shard.0, %from, kind, "shard.unexpected_message");
                Ok(())
            }
        };
        if let Err(err) = outcome {
            warn!(shard = self.shard.0, kind, error = %err, "shard.handler_failed");
        }
    }

    fn reply(&self, message: &Message) -> Result<()> {
        send_message(&*self.transport, Endpoint::Coordinator, message)
    }

    fn rejection(&self, request_id: RequestId, err: &WeftError) -> Message {
        warn!(shard = self.shard.0, request_id, error = %err, "shard.request.rejected");
        Message::Rejected {
            request_id,
            reason: err.to_string(),
        }
    }

    fn on_create_node(&mut self, request_id: RequestId, stamp: CausalStamp) -> Result<()> {
        let message = match self.store.create_node(stamp) {
            Ok(handle) => {
                debug!(shard = self.shard.0, %handle, "shard.create_node");
                Message::CreateAck { request_id, handle }
            }
            Err(err) => self.rejection(request_id, &err),
        };
        self.reply(&message)
    }

    fn on_create_edge(
        &mut self,
        request_id: RequestId,
        src: GraphElementHandle,
        dst: GraphElementHandle,
        dst_created: CausalStamp,
        stamp: CausalStamp,
    ) -> Result<()> {
        let message = match self.store.create_edge(src, dst, dst_created, stamp) {
            Ok(handle) => {
                debug!(shard = self.shard.0, %handle, %src, %dst, "shard.create_edge");
                Message::CreateAck { request_id, handle }
            }
            Err(err) => self.rejection(request_id, &err),
        };
        self.reply(&message)
    }

    fn on_delete_node(
        &mut self,
        request_id: RequestId,
        node: GraphElementHandle,
        stamp: CausalStamp,
    ) -> Result<()> {
        let message = match self.store.delete_node(node, stamp) {
            Ok(()) => Message::DeleteAck {
                request_id,
                invalidated: self.cache.invalidate(node),
            },
            Err(err) => self.rejection(request_id, &err),
        };
        self.reply(&message)
    }

    fn on_delete_edge(
        &mut self,
        request_id: RequestId,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        stamp: CausalStamp,
    ) -> Result<()> {
        let message = match self.store.delete_edge(node, edge, stamp) {
            Ok(()) => Message::DeleteAck {
                request_id,
                invalidated: self.cache.invalidate(edge),
            },
            Err(err) => self.rejection(request_id, &err),
        };
        self.reply(&message)
    }

    // Always acknowledged: the coordinator counts the deletion as pending until then.
    fn on_delete_edge_property(
        &mut self,
        request_id: RequestId,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: &str,
        stamp: CausalStamp,
    ) -> Result<()> {
        let invalidated = match self.store.delete_edge_property(node, edge, key, stamp) {
            Ok(0) => Vec::new(),
            Ok(_) => self.cache.invalidate(edge),
            Err(err) => {
                warn!(shard = self.shard.0, request_id, error = %err, "shard.delete_edge_property.failed");
                Vec::new()
            }
        };
        self.reply(&Message::DeletePropertyAck {
            request_id,
            invalidated,
        })
    }

    fn on_reachability(&mut self, query: &ReachabilityQuery) -> Result<()> {
        let outcome = ShardPropagator::new(
            &mut self.store,
            &self.cache,
            self.options.max_nodes_per_forward,
        )
        .propagate(query);
        match outcome {
            Ok(HopOutcome::Reached {
                used_cache_id,
                path,
            }) => {
                debug!(
                    shard = self.shard.0,
                    query_id = query.query_id,
                    used_cache_id,
                    "shard.reachability.reached"
                );
                self.reply(&Message::ReachabilityReply {
                    query_id: query.query_id,
                    reachable: true,
                    used_cache_id,
                    path,
                })
            }
            Ok(HopOutcome::Forward { batches }) => self.forward(query, batches),
            Err(err) => {
                // Report the hop as finished so the flood can still terminate.
                warn!(shard = self.shard.0, query_id = query.query_id, error = %err, "shard.reachability.failed");
                self.forward(query, Vec::new())
            }
        }
    }

    fn forward(
        &mut self,
        query: &ReachabilityQuery,
        batches: Vec<(ShardId, Vec<FrontierNode>)>,
    ) -> Result<()> {
        let mut forwarded = Vec::with_capacity(batches.len());
        for (dst, sources) in batches {
            let hop = self.next_hop_id();
            let message = Message::Reachability(ReachabilityQuery {
                query_id: query.query_id,
                hop,
                sources,
                target: query.target,
                snapshot: query.snapshot.clone(),
                predicate: query.predicate.clone(),
                ignore: query.ignore.clone(),
            });
            match send_message(&*self.transport, Endpoint::Shard(dst), &message) {
                Ok(()) => forwarded.push(hop),
                Err(err) => warn!(shard = self.shard.0, dst = dst.0, error = %err, "shard.reachability.forward_failed"),
            }
        }
        debug!(
            shard = self.shard.0,
            query_id = query.query_id,
            forwarded = forwarded.len(),
            "shard.reachability.progress"
        );
        self.reply(&Message::ReachabilityProgress {
            query_id: query.query_id,
            hop: query.hop,
            forwarded,
        })
    }

    fn on_cache_update(&mut self, update: &CacheUpdate) -> Result<()> {
        let rejected = self.cache.apply(update, &self.store);
        debug!(
            shard = self.shard.0,
            cached = self.cache.len(),
            rejected = rejected.len(),
            "shard.cache_update"
        );
        self.reply(&Message::CacheUpdateAck { rejected })
    }

    fn next_hop_id(&mut self) -> HopId {
        self.next_hop += 1;
        HopId::forwarded(self.shard, self.next_hop)
    }
}

//! In-process cluster: shards, coordinator and client connections on one
//! [`LocalNetwork`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::coordinator::{Coordinator, CoordinatorServer};
use crate::net::message::{ClientRequest, ClientResponse};
use crate::net::{recv_message, send_message, Endpoint, LocalNetwork, LocalTransport, Message, Transport};
use crate::shard::ShardServer;
use crate::storage::PropertyPredicate;
use crate::types::{GraphElementHandle, Result, ShardId, WeftError};

/// A running cluster.
///
/// Dropping the cluster shuts it down.
pub struct Cluster {
    network: LocalNetwork,
    coordinator: Coordinator,
    server: Option<CoordinatorServer>,
    shards: Vec<JoinHandle<()>>,
    next_client: AtomicU64,
}

impl Cluster {
    /// Validates `config` and starts every shard plus the coordinator.
    pub fn start(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let network = LocalNetwork::new();
        let num_shards = config.cluster.num_shards;

        let mut shards = Vec::with_capacity(num_shards as usize);
        for index in 0..num_shards {
            let shard = ShardId(index);
            let transport: Arc<dyn Transport> = Arc::new(network.bind(Endpoint::Shard(shard))?);
            shards.push(ShardServer::new(shard, transport, config.shard_options()).spawn()?);
        }

        let shard_inbox: Arc<dyn Transport> = Arc::new(network.bind(Endpoint::Coordinator)?);
        let frontend: Arc<dyn Transport> = Arc::new(network.bind(Endpoint::Frontend)?);
        let coordinator = Coordinator::new(
            num_shards,
            config.coordinator_options(),
            Arc::clone(&shard_inbox),
        )?;
        let server = CoordinatorServer::spawn(coordinator.clone(), shard_inbox, frontend)?;
        info!(shards = num_shards, "cluster.started");
        Ok(Self {
            network,
            coordinator,
            server: Some(server),
            shards,
            next_client: AtomicU64::new(1),
        })
    }

    /// Direct handle to the coordinator, bypassing the client frontend.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The network every participant is bound to.
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Opens a new client connection.
    pub fn client(&self) -> Result<Client> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        Client::connect(&self.network, id)
    }

    /// Asks the cache updater to broadcast now.
    pub fn trigger_cache_round(&self) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| server.trigger_cache_round())
    }

    /// Stops the coordinator, tears down the network and joins every thread.
    pub fn shutdown(&mut self) {
        let Some(server) = self.server.take() else {
            return;
        };
        self.coordinator.shutdown();
        self.network.shutdown();
        server.shutdown();
        for handle in self.shards.drain(..) {
            if handle.join().is_err() {
                warn!("cluster.shard_panicked");
            }
        }
        info!("cluster.stopped");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Blocking client speaking the frontend protocol.
///
/// Each request carries a ticket that the coordinator echoes back; replies to
/// earlier tickets (left over from a timed-out call, say) are skipped.
pub struct Client {
    transport: LocalTransport,
    next_ticket: u64,
}

impl Client {
    /// Binds `Endpoint::Client(id)` on `network`.
    pub fn connect(network: &LocalNetwork, id: u64) -> Result<Self> {
        Ok(Self {
            transport: network.bind(Endpoint::Client(id))?,
            next_ticket: 0,
        })
    }

    /// Creates a node.
    pub fn create_node(&mut self) -> Result<GraphElementHandle> {
        match self.call(ClientRequest::CreateNode)? {
            ClientResponse::Created(handle) => Ok(handle),
            _ => Err(WeftError::Invalid("expected a created handle")),
        }
    }

    /// Creates the edge `from -> to`.
    pub fn create_edge(
        &mut self,
        from: GraphElementHandle,
        to: GraphElementHandle,
    ) -> Result<GraphElementHandle> {
        match self.call(ClientRequest::CreateEdge { from, to })? {
            ClientResponse::Created(handle) => Ok(handle),
            _ => Err(WeftError::Invalid("expected a created handle")),
        }
    }

    /// Deletes a node.
    pub fn delete_node(&mut self, node: GraphElementHandle) -> Result<()> {
        self.expect_deleted(ClientRequest::DeleteNode { node })
    }

    /// Deletes an edge leaving `node`.
    pub fn delete_edge(&mut self, node: GraphElementHandle, edge: GraphElementHandle) -> Result<()> {
        self.expect_deleted(ClientRequest::DeleteEdge { node, edge })
    }

    /// Whether `to` is reachable from `from` along edges matching `predicate`.
    pub fn reachable(
        &mut self,
        from: GraphElementHandle,
        to: GraphElementHandle,
        predicate: PropertyPredicate,
    ) -> Result<bool> {
        match self.call(ClientRequest::Reachable {
            from,
            to,
            predicate,
        })? {
            ClientResponse::Reachable(reachable) => Ok(reachable),
            _ => Err(WeftError::Invalid("expected a reachability answer")),
        }
    }

    /// Attaches `key = value` to an edge. Fire and forget.
    pub fn add_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.cast(ClientRequest::AddEdgeProperty {
            node,
            edge,
            key: key.into(),
            value: value.into(),
        })
    }

    /// Removes the property `key` from an edge. Fire and forget.
    pub fn delete_edge_property(
        &mut self,
        node: GraphElementHandle,
        edge: GraphElementHandle,
        key: impl Into<String>,
    ) -> Result<()> {
        self.cast(ClientRequest::DeleteEdgeProperty {
            node,
            edge,
            key: key.into(),
        })
    }

    fn expect_deleted(&mut self, request: ClientRequest) -> Result<()> {
        match self.call(request)? {
            ClientResponse::Deleted => Ok(()),
            _ => Err(WeftError::Invalid("expected a deletion ack")),
        }
    }

    fn cast(&mut self, request: ClientRequest) -> Result<()> {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        send_message(&self.transport, Endpoint::Frontend, &Message::Client { ticket, request })
    }

    fn call(&mut self, request: ClientRequest) -> Result<ClientResponse> {
        self.cast(request)?;
        let ticket = self.next_ticket;
        loop {
            let (from, message) = recv_message(&self.transport)?;
            match message {
                Message::ClientReply {
                    ticket: answered,
                    response,
                } if answered == ticket => {
                    return match response {
                        ClientResponse::Rejected(reason) => Err(WeftError::Rejected(reason)),
                        response => Ok(response),
                    };
                }
                Message::ClientReply { ticket: stale, .. } => {
                    debug!(%from, stale, ticket, "client.stale_reply");
                }
                other => warn!(%from, kind = other.kind(), "client.unexpected_message"),
            }
        }
    }
}

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::types::{Result, WeftError};

use super::{Endpoint, Transport};

type Frame = (Endpoint, Vec<u8>);
type Routes = Arc<RwLock<FxHashMap<Endpoint, Sender<Frame>>>>;

/// Registry of in-process endpoints.
///
/// Cloning shares the registry. [`LocalNetwork::shutdown`] drops every route, which makes
/// each bound transport's `recv` fail with `Disconnected` once its inbox drains.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    routes: Routes,
}

impl LocalNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` and returns its transport.
    pub fn bind(&self, endpoint: Endpoint) -> Result<LocalTransport> {
        let (sender, receiver) = mpsc::channel();
        let mut routes = self.routes.write();
        if routes.contains_key(&endpoint) {
            return Err(WeftError::Invalid("endpoint already bound"));
        }
        routes.insert(endpoint, sender);
        debug!(%endpoint, "net.local.bind");
        Ok(LocalTransport {
            endpoint,
            routes: Arc::clone(&self.routes),
            inbox: Mutex::new(receiver),
        })
    }

    /// Removes `endpoint`; frames sent to it afterwards fail.
    pub fn unbind(&self, endpoint: Endpoint) {
        self.routes.write().remove(&endpoint);
    }

    /// Whether `endpoint` is currently bound.
    pub fn is_bound(&self, endpoint: Endpoint) -> bool {
        self.routes.read().contains_key(&endpoint)
    }

    /// Drops every route.
    pub fn shutdown(&self) {
        let mut routes = self.routes.write();
        debug!(endpoints = routes.len(), "net.local.shutdown");
        routes.clear();
    }
}

/// Transport of one endpoint on a [`LocalNetwork`].
pub struct LocalTransport {
    endpoint: Endpoint,
    routes: Routes,
    inbox: Mutex<Receiver<Frame>>,
}

impl Transport for LocalTransport {
    fn local(&self) -> Endpoint {
        self.endpoint
    }

    fn send(&self, to: Endpoint, frame: Vec<u8>) -> Result<()> {
        let sender = self
            .routes
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| WeftError::Disconnected(to.to_string()))?;
        sender
            .send((self.endpoint, frame))
            .map_err(|_| WeftError::Disconnected(to.to_string()))
    }

    fn recv(&self) -> Result<(Endpoint, Vec<u8>)> {
        self.inbox
            .lock()
            .recv()
            .map_err(|_| WeftError::Disconnected(self.endpoint.to_string()))
    }
}

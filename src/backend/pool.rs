//! Lazily-built chain clients, one per backend

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::rpc::{with_deadline, ChainClient, HttpRpcClient};

use super::registry::{BackendDescriptor, BackendRegistry};

/// Builds an unverified client for a backend
pub trait ClientFactory: Send + Sync {
    fn connect(&self, backend: &BackendDescriptor) -> Result<Arc<dyn ChainClient>>;
}

/// HTTP JSON-RPC clients with bounded connect/read timeouts
pub struct HttpClientFactory {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(rpc: &RpcConfig) -> Self {
        Self {
            connect_timeout: rpc.connect_timeout(),
            read_timeout: rpc.read_timeout(),
        }
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, backend: &BackendDescriptor) -> Result<Arc<dyn ChainClient>> {
        let client = HttpRpcClient::new(&backend.rpc_url, self.connect_timeout, self.read_timeout)?;
        Ok(Arc::new(client))
    }
}

/// Cache of live clients keyed by backend id.
///
/// A client is cached only after it answers a liveness probe. Concurrent
/// first access to the same backend is serialized by a per-backend lock, so
/// exactly one client is built and cached.
pub struct ConnectionPool {
    registry: Arc<BackendRegistry>,
    factory: Arc<dyn ClientFactory>,
    clients: DashMap<String, Arc<dyn ChainClient>>,
    creating: DashMap<String, Arc<Mutex<()>>>,
    liveness_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<BackendRegistry>,
        factory: Arc<dyn ClientFactory>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            factory,
            clients: DashMap::new(),
            creating: DashMap::new(),
            liveness_timeout,
        }
    }

    fn cached(&self, id: &str) -> Option<Arc<dyn ChainClient>> {
        self.clients.get(id).map(|c| c.value().clone())
    }

    /// Return the cached client, or build, probe and cache a new one
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<dyn ChainClient>> {
        if let Some(client) = self.cached(id) {
            return Ok(client);
        }

        let backend = self
            .registry
            .get(id)
            .ok_or_else(|| Error::UnknownBackend(id.to_string()))?;

        let lock = self
            .creating
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have finished while we waited
        if let Some(client) = self.cached(id) {
            return Ok(client);
        }

        let client = self.factory.connect(backend)?;
        let height = with_deadline(self.liveness_timeout, client.block_number()).await?;

        debug!(backend = id, height, "Connected to {}", backend.name);
        self.clients.insert(id.to_string(), client.clone());
        Ok(client)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Drop every cached client. Safe to call repeatedly.
    pub fn close_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        self.creating.clear();
        if count > 0 {
            info!("Closed {} backend connections", count);
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}

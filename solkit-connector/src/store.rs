//! # Store
//!
//! The shared state every other component reads from: registered connectors,
//! the active connector, the chosen cluster, the connected address, the
//! request-id counter and the subscription socket handle.
//!
//! The socket is remembered together with the URL it was opened on, and is
//! only handed out while that URL still belongs to the chosen cluster. Socket
//! creation is serialized by a lock owned here, so every client sharing a
//! store shares one socket.
//!
//! A `Store` is constructed explicitly and passed around as `Arc<Store>`.
//! Mutations are synchronous and immediately visible; `address` and `cluster`
//! changes are published to watchers through `tokio::sync::watch` channels at
//! the point of mutation.

use crate::{
    cluster::ClusterSocket,
    config::Cluster,
    connectors::Connector,
    error::{ConnectorError, Result},
};
use solana_sdk::pubkey::Pubkey;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

/// Everything the store needs at construction time.
pub struct StoreConfig {
    pub connectors: Vec<Connector>,
    pub cluster: Cluster,
    /// Identity of the initially active connector; the first connector if `None`.
    pub active_connector: Option<String>,
}

pub struct Store {
    connectors: Vec<Arc<Connector>>,
    active: AtomicUsize,
    address: watch::Sender<Option<Pubkey>>,
    cluster: watch::Sender<Cluster>,
    request_id: AtomicU64,
    socket: Mutex<Option<OpenSocket>>,
    socket_creation: AsyncMutex<()>,
}

/// The shared socket and the WebSocket URL it was opened on.
struct OpenSocket {
    url: String,
    socket: ClusterSocket,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("connectors", &self.connector_ids())
            .field("active", &self.active_connector_id())
            .field("address", &self.address())
            .field("cluster", &self.cluster().name)
            .finish()
    }
}

impl Store {
    /// Creates a store, validating the configured active connector.
    pub fn new(config: StoreConfig) -> Result<Self> {
        if config.connectors.is_empty() {
            return Err(ConnectorError::NoConnectors);
        }
        let connectors: Vec<Arc<Connector>> =
            config.connectors.into_iter().map(Arc::new).collect();

        let active = match &config.active_connector {
            Some(id) => position_of(&connectors, id)
                .ok_or_else(|| ConnectorError::UnknownConnector(id.clone()))?,
            None => 0,
        };

        Ok(Self {
            connectors,
            active: AtomicUsize::new(active),
            address: watch::channel(None).0,
            cluster: watch::channel(config.cluster).0,
            request_id: AtomicU64::new(1),
            socket: Mutex::new(None),
            socket_creation: AsyncMutex::new(()),
        })
    }

    /// A read-only copy of the registered connectors.
    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.connectors.clone()
    }

    pub fn connector_ids(&self) -> Vec<String> {
        self.connectors.iter().map(|c| c.name()).collect()
    }

    pub fn active_connector(&self) -> Arc<Connector> {
        self.connectors[self.active.load(Ordering::Acquire)].clone()
    }

    pub fn active_connector_id(&self) -> String {
        self.active_connector().name()
    }

    /// Switches the active connector. An unknown id leaves the previous one in place.
    pub fn set_active_connector(&self, id: &str) -> Result<()> {
        let index = position_of(&self.connectors, id)
            .ok_or_else(|| ConnectorError::UnknownConnector(id.to_string()))?;
        self.active.store(index, Ordering::Release);
        tracing::debug!("Active connector set to {}", id);
        Ok(())
    }

    pub fn address(&self) -> Option<Pubkey> {
        *self.address.borrow()
    }

    pub fn set_address(&self, address: Option<Pubkey>) {
        self.address.send_replace(address);
    }

    /// A receiver that observes every address change from now on.
    pub fn watch_address(&self) -> watch::Receiver<Option<Pubkey>> {
        self.address.subscribe()
    }

    pub fn cluster(&self) -> Cluster {
        self.cluster.borrow().clone()
    }

    /// Switches the RPC target. The subscription socket belongs to the old
    /// endpoint, so it is released and recreated lazily on the next subscribe.
    pub fn set_cluster(&self, cluster: Cluster) {
        tracing::info!("Switching cluster to {} ({})", cluster.name, cluster.endpoint);
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        *socket = None;
        self.cluster.send_replace(cluster);
    }

    pub fn watch_cluster(&self) -> watch::Receiver<Cluster> {
        self.cluster.subscribe()
    }

    /// Allocates a fresh JSON-RPC request id. Ids are never reused.
    pub fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The live socket of the current cluster, if one is open.
    pub fn socket(&self) -> Option<ClusterSocket> {
        let current = self.cluster().websocket_url().ok()?;
        let slot = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .filter(|open| open.url == current && !open.socket.is_closed())
            .map(|open| open.socket.clone())
    }

    /// Remembers `socket` as the shared one, unless the cluster moved away
    /// from `url` while it was being opened. Returns whether it was kept.
    pub(crate) fn install_socket(&self, url: &str, socket: ClusterSocket) -> bool {
        let mut slot = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cluster().websocket_url().ok().as_deref() != Some(url) {
            return false;
        }
        *slot = Some(OpenSocket {
            url: url.to_string(),
            socket,
        });
        true
    }

    /// Held while a socket is being opened for this store.
    pub(crate) async fn lock_socket_creation(&self) -> AsyncMutexGuard<'_, ()> {
        self.socket_creation.lock().await
    }
}

fn position_of(connectors: &[Arc<Connector>], id: &str) -> Option<usize> {
    connectors.iter().position(|c| c.name() == id)
}

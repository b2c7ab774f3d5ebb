//! # Public Actions
//!
//! [`Client`] is the application-facing entry point. Every wallet-related
//! action is routed through [`with_connector`] to the active connector, so an
//! unavailable connector yields `Ok(None)` ("did not run") instead of an error.
//! Store-only accessors (address, network, connector selection) bypass the gate.

use crate::{
    cluster::{ClusterClient, HttpTransport, KeyedAccount, ReqwestTransport, SocketOpener, Subscription, TungsteniteOpener},
    config::{Cluster, ConnectorConfig},
    connectors::{Connector, TransactionIntent},
    dispatch::with_connector,
    error::Result,
    store::{Store, StoreConfig},
};
use serde_json::Value;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use tokio::sync::watch;

/// A clonable handle bundling the store and the cluster layer.
#[derive(Debug, Clone)]
pub struct Client {
    cluster: ClusterClient,
}

impl Client {
    /// Builds a client talking to the configured cluster over HTTP and WebSocket.
    pub fn new(config: &ConnectorConfig, connectors: Vec<Connector>) -> Result<Self> {
        Self::with_transports(
            config,
            connectors,
            Arc::new(ReqwestTransport::new()),
            Arc::new(TungsteniteOpener),
        )
    }

    pub fn with_transports(
        config: &ConnectorConfig,
        connectors: Vec<Connector>,
        http: Arc<dyn HttpTransport>,
        opener: Arc<dyn SocketOpener>,
    ) -> Result<Self> {
        let store = Arc::new(Store::new(StoreConfig {
            connectors,
            cluster: config.cluster.clone(),
            active_connector: config.active_connector.clone(),
        })?);
        tracing::info!(
            cluster = %config.cluster.name,
            active = %store.active_connector_id(),
            "Client initialised"
        );
        let cluster = ClusterClient::new(store, http, opener)
            .with_commitment(config.commitment)
            .with_channels(config.channels.clone());
        Ok(Self { cluster })
    }

    pub fn from_cluster(cluster: ClusterClient) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &ClusterClient {
        &self.cluster
    }

    pub fn store(&self) -> &Arc<Store> {
        self.cluster.store()
    }

    /// Restores surviving pairing sessions for connectors that asked for it.
    /// Returns the first restored address.
    pub async fn restore_sessions(&self) -> Result<Option<Pubkey>> {
        let mut restored = None;
        for connector in self.store().connectors() {
            if let Connector::Pairing(pairing) = connector.as_ref() {
                if pairing.autoconnect() {
                    let address = pairing.restore(&self.cluster).await?;
                    restored = restored.or(address);
                }
            }
        }
        Ok(restored)
    }

    pub async fn connect(&self) -> Result<Option<Pubkey>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move { c.connect(cluster).await }).await
    }

    pub async fn disconnect(&self) -> Result<Option<()>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move { c.disconnect(cluster).await }).await
    }

    pub async fn sign_message(&self, message: &str) -> Result<Option<Signature>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move { c.sign_message(cluster, message).await }).await
    }

    /// Builds and signs a transaction. Returns it base58-encoded.
    pub async fn sign_transaction(&self, intent: &TransactionIntent) -> Result<Option<String>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move { c.sign_transaction(cluster, intent).await }).await
    }

    pub async fn send_transaction(&self, encoded_transaction: &str) -> Result<Option<Signature>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move {
            c.send_transaction(cluster, encoded_transaction).await
        })
        .await
    }

    pub async fn sign_and_send_transaction(
        &self,
        intent: &TransactionIntent,
    ) -> Result<Option<Signature>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move {
            c.sign_and_send_transaction(cluster, intent).await
        })
        .await
    }

    /// Balance of `address`, or of the connected address. `Ok(None)` when the
    /// connector is unavailable or there is no address to look up.
    pub async fn get_balance(&self, address: Option<Pubkey>) -> Result<Option<u64>> {
        let cluster = &self.cluster;
        let balance =
            with_connector(cluster, |c| async move { c.get_balance(cluster, address).await }).await?;
        Ok(balance.flatten())
    }

    /// Parsed account data of `address`, or of the connected address.
    pub async fn get_account(&self, address: Option<Pubkey>) -> Result<Option<Value>> {
        let cluster = &self.cluster;
        let account = with_connector(cluster, |c| async move {
            c.get_account(cluster, address, "jsonParsed").await
        })
        .await?;
        Ok(account.flatten())
    }

    pub async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Option<Vec<KeyedAccount>>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move {
            c.get_program_accounts(cluster, program_id).await
        })
        .await
    }

    pub async fn get_transaction(&self, signature: &Signature) -> Result<Option<Value>> {
        let cluster = &self.cluster;
        let tx = with_connector(cluster, |c| async move { c.get_transaction(cluster, signature).await })
            .await?;
        Ok(tx.flatten())
    }

    pub async fn get_fee_for_message(&self, intent: &TransactionIntent) -> Result<Option<u64>> {
        let cluster = &self.cluster;
        let fee = with_connector(cluster, |c| async move {
            c.get_fee_for_message(cluster, intent).await
        })
        .await?;
        Ok(fee.flatten())
    }

    pub async fn get_block(&self, slot: u64) -> Result<Option<Value>> {
        let cluster = &self.cluster;
        let block = with_connector(cluster, |c| async move { c.get_block(cluster, slot).await }).await?;
        Ok(block.flatten())
    }

    /// Subscribes to status updates of a submitted transaction.
    pub async fn watch_transaction(&self, signature: &Signature) -> Result<Option<Subscription>> {
        let cluster = &self.cluster;
        with_connector(cluster, |c| async move {
            c.watch_transaction(cluster, signature).await
        })
        .await
    }

    /// A display name for `address`, or for the connected address.
    pub async fn fetch_name(&self, address: Option<Pubkey>) -> Result<Option<String>> {
        let Some(address) = address.or_else(|| self.address()) else {
            return Ok(None);
        };
        let cluster = &self.cluster;
        let name = with_connector(cluster, |c| async move {
            Ok(c.fetch_name(cluster, &address).await)
        })
        .await?;
        Ok(name.flatten())
    }

    pub fn address(&self) -> Option<Pubkey> {
        self.store().address()
    }

    pub fn watch_address(&self) -> watch::Receiver<Option<Pubkey>> {
        self.store().watch_address()
    }

    pub fn switch_network(&self, cluster: Cluster) {
        self.store().set_cluster(cluster);
    }

    pub fn network(&self) -> Cluster {
        self.store().cluster()
    }

    pub fn watch_network(&self) -> watch::Receiver<Cluster> {
        self.store().watch_cluster()
    }

    pub fn set_active_connector(&self, id: &str) -> Result<()> {
        self.store().set_active_connector(id)
    }

    pub fn connectors(&self) -> Vec<Arc<Connector>> {
        self.store().connectors()
    }
}

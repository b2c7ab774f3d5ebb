use super::base::{encode_transaction, TransactionBuilder, TransactionIntent};
use crate::{
    cluster::ClusterClient,
    error::{ConnectorError, Result},
};
use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::sync::Arc;

/// How the bytes handed to [`InjectedProvider::sign_message`] should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Utf8,
    Hex,
}

/// What a provider answers to a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResponse {
    /// The provider returned the approved account.
    PublicKey(Pubkey),
    /// The provider approved but exposes the account via [`InjectedProvider::public_key`].
    Approved,
    Rejected,
}

/// The contract a wallet provider registered in a [`ProviderRegistry`] fulfills.
#[async_trait]
pub trait InjectedProvider: Send + Sync {
    async fn connect(&self) -> Result<ConnectResponse>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// The currently approved account, if the provider exposes one.
    fn public_key(&self) -> Option<Pubkey>;

    async fn sign_message(&self, message: &[u8], format: MessageFormat) -> Result<Signature>;

    /// Signs `transaction` and returns it with the provider's signature attached.
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction>;
}

pub type ProviderAccessor = Arc<dyn Fn() -> Option<Arc<dyn InjectedProvider>> + Send + Sync>;

/// Maps a symbolic backend name to a function that locates its provider.
///
/// An accessor may return `None` at any time (the wallet went away); the
/// owning connector then reports itself unavailable.
#[derive(Default)]
pub struct ProviderRegistry {
    accessors: DashMap<String, ProviderAccessor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, accessor: F)
    where
        F: Fn() -> Option<Arc<dyn InjectedProvider>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registered wallet provider accessor '{}'", name);
        self.accessors.insert(name, Arc::new(accessor));
    }

    /// Registers a provider that is always present.
    pub fn register_provider(&self, name: impl Into<String>, provider: Arc<dyn InjectedProvider>) {
        self.register(name, move || Some(provider.clone()));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.accessors.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InjectedProvider>> {
        // Clone the accessor out so the map shard is not held while it runs.
        let accessor = self.accessors.get(name).map(|a| a.value().clone())?;
        accessor()
    }

    pub fn names(&self) -> Vec<String> {
        self.accessors.iter().map(|e| e.key().clone()).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// A connector for a wallet that lives in the host environment and signs locally.
#[derive(Debug, Clone)]
pub struct InjectedConnector {
    wallet: String,
    registry: Arc<ProviderRegistry>,
}

impl InjectedConnector {
    pub fn new(wallet: impl Into<String>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            wallet: wallet.into(),
            registry,
        }
    }

    pub fn connector_name(wallet: &str) -> String {
        format!("injected-{wallet}")
    }

    pub fn name(&self) -> String {
        Self::connector_name(&self.wallet)
    }

    pub fn is_available(&self) -> bool {
        self.registry.get(&self.wallet).is_some()
    }

    fn provider(&self) -> Result<Arc<dyn InjectedProvider>> {
        self.registry
            .get(&self.wallet)
            .ok_or_else(|| ConnectorError::ProviderUnavailable(self.wallet.clone()))
    }

    pub async fn connect(&self, cluster: &ClusterClient) -> Result<Pubkey> {
        let provider = self.provider()?;
        let address = match provider.connect().await? {
            ConnectResponse::PublicKey(address) => address,
            ConnectResponse::Approved => provider
                .public_key()
                .ok_or_else(|| ConnectorError::Provider("approved without an account".to_string()))?,
            ConnectResponse::Rejected => {
                return Err(ConnectorError::Provider(format!(
                    "{} rejected the connection",
                    self.name()
                )))
            }
        };
        cluster.store().set_address(Some(address));
        tracing::info!("Connected {} as {}", self.name(), address);
        Ok(address)
    }

    pub async fn disconnect(&self, cluster: &ClusterClient) -> Result<()> {
        self.provider()?.disconnect().await?;
        cluster.store().set_address(None);
        tracing::info!("Disconnected {}", self.name());
        Ok(())
    }

    pub async fn sign_message(&self, message: &str) -> Result<Signature> {
        self.provider()?
            .sign_message(message.as_bytes(), MessageFormat::Utf8)
            .await
    }

    /// Builds the transaction, lets the provider sign it and returns it
    /// base58-encoded in wire format.
    pub async fn sign_transaction(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<String> {
        let provider = self.provider()?;
        let draft = TransactionBuilder::new(cluster)
            .construct_transaction(intent)
            .await?;
        let signed = provider.sign_transaction(draft.into_transaction()).await?;
        encode_transaction(&signed)
    }
}

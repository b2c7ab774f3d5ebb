//! # Connectors
//!
//! Every wallet backend sits behind the closed [`Connector`] enum. The shared
//! transaction construction and cluster reads live in [`TransactionBuilder`];
//! each variant contributes only how it acquires its provider and how it signs.
//!
//! Connector methods take the [`ClusterClient`] they operate against, which in
//! turn carries the [`crate::store::Store`] holding the connected address.

mod base;
mod injected;
mod mock;
mod pairing;

pub(crate) use base::parse_pubkey;
pub use base::{
    encode_transaction, FeePayer, ProgramArgs, TransactionBuilder, TransactionDraft,
    TransactionIntent, TransferArgs,
};
pub use injected::{
    ConnectResponse, InjectedConnector, InjectedProvider, MessageFormat, ProviderAccessor,
    ProviderRegistry,
};
pub use mock::MockConnector;
pub use pairing::{
    PairingConnector, PairingTransport, PendingSession, RemoteRequest, SerializedAccountMeta,
    SerializedInstruction, SerializedTransaction, Session, SessionProposal, SignMessageParams,
    SignatureResponse, SIGN_MESSAGE_METHOD, SIGN_TRANSACTION_METHOD,
};

use crate::{
    cluster::{ClusterClient, KeyedAccount, Subscription},
    error::Result,
};
use serde_json::Value;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

#[derive(Debug)]
pub enum Connector {
    Injected(InjectedConnector),
    Pairing(PairingConnector),
    Mock(MockConnector),
}

impl Connector {
    /// The identity string the store uses to select this connector.
    pub fn name(&self) -> String {
        match self {
            Connector::Injected(c) => c.name(),
            Connector::Pairing(c) => c.name(),
            Connector::Mock(c) => c.name(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Connector::Injected(c) => c.is_available(),
            Connector::Pairing(c) => c.is_available(),
            Connector::Mock(c) => c.is_available(),
        }
    }

    /// Connects the wallet and stores its address. Re-connecting while
    /// connected refreshes the address.
    pub async fn connect(&self, cluster: &ClusterClient) -> Result<Pubkey> {
        match self {
            Connector::Injected(c) => c.connect(cluster).await,
            Connector::Pairing(c) => c.connect(cluster).await,
            Connector::Mock(c) => c.connect(cluster).await,
        }
    }

    pub async fn disconnect(&self, cluster: &ClusterClient) -> Result<()> {
        match self {
            Connector::Injected(c) => c.disconnect(cluster).await,
            Connector::Pairing(c) => c.disconnect(cluster).await,
            Connector::Mock(c) => c.disconnect(cluster).await,
        }
    }

    pub async fn sign_message(&self, cluster: &ClusterClient, message: &str) -> Result<Signature> {
        match self {
            Connector::Injected(c) => c.sign_message(message).await,
            Connector::Pairing(c) => c.sign_message(cluster, message).await,
            Connector::Mock(c) => c.sign_message(message).await,
        }
    }

    /// Builds and signs a transaction, returning it base58-encoded in wire format.
    pub async fn sign_transaction(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<String> {
        match self {
            Connector::Injected(c) => c.sign_transaction(cluster, intent).await,
            Connector::Pairing(c) => c.sign_transaction(cluster, intent).await,
            Connector::Mock(c) => c.sign_transaction(cluster, intent).await,
        }
    }

    pub async fn send_transaction(
        &self,
        cluster: &ClusterClient,
        encoded_transaction: &str,
    ) -> Result<Signature> {
        TransactionBuilder::new(cluster)
            .send_transaction(encoded_transaction)
            .await
    }

    pub async fn sign_and_send_transaction(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<Signature> {
        let encoded = self.sign_transaction(cluster, intent).await?;
        self.send_transaction(cluster, &encoded).await
    }

    pub async fn get_balance(
        &self,
        cluster: &ClusterClient,
        address: Option<Pubkey>,
    ) -> Result<Option<u64>> {
        TransactionBuilder::new(cluster).get_balance(address).await
    }

    pub async fn get_account(
        &self,
        cluster: &ClusterClient,
        address: Option<Pubkey>,
        encoding: &str,
    ) -> Result<Option<Value>> {
        TransactionBuilder::new(cluster)
            .get_account(address, encoding)
            .await
    }

    pub async fn get_program_accounts(
        &self,
        cluster: &ClusterClient,
        program_id: &Pubkey,
    ) -> Result<Vec<KeyedAccount>> {
        TransactionBuilder::new(cluster)
            .get_program_accounts(program_id)
            .await
    }

    pub async fn get_transaction(
        &self,
        cluster: &ClusterClient,
        signature: &Signature,
    ) -> Result<Option<Value>> {
        TransactionBuilder::new(cluster)
            .get_transaction(signature)
            .await
    }

    pub async fn get_fee_for_message(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<Option<u64>> {
        TransactionBuilder::new(cluster)
            .get_fee_for_message(intent)
            .await
    }

    pub async fn get_block(&self, cluster: &ClusterClient, slot: u64) -> Result<Option<Value>> {
        TransactionBuilder::new(cluster).get_block(slot).await
    }

    pub async fn watch_transaction(
        &self,
        cluster: &ClusterClient,
        signature: &Signature,
    ) -> Result<Subscription> {
        TransactionBuilder::new(cluster)
            .watch_transaction(signature)
            .await
    }

    pub async fn fetch_name(&self, cluster: &ClusterClient, address: &Pubkey) -> Option<String> {
        TransactionBuilder::new(cluster).fetch_name(address).await
    }
}

impl From<InjectedConnector> for Connector {
    fn from(c: InjectedConnector) -> Self {
        Connector::Injected(c)
    }
}

impl From<PairingConnector> for Connector {
    fn from(c: PairingConnector) -> Self {
        Connector::Pairing(c)
    }
}

impl From<MockConnector> for Connector {
    fn from(c: MockConnector) -> Self {
        Connector::Mock(c)
    }
}

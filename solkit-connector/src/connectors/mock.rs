use super::base::{encode_transaction, TransactionBuilder, TransactionIntent};
use crate::{
    cluster::ClusterClient,
    error::{ConnectorError, Result},
};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::atomic::{AtomicBool, Ordering};

/// A deterministic in-memory wallet for tests.
#[derive(Debug)]
pub struct MockConnector {
    keypair: Keypair,
    available: AtomicBool,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub const NAME: &'static str = "mock";

    /// A mock wallet with a freshly generated key.
    pub fn new() -> Self {
        Self::with_keypair(Keypair::new())
    }

    pub fn with_keypair(keypair: Keypair) -> Self {
        Self {
            keypair,
            available: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> String {
        Self::NAME.to_string()
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Simulates the wallet appearing or going away.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub async fn connect(&self, cluster: &ClusterClient) -> Result<Pubkey> {
        let address = self.pubkey();
        cluster.store().set_address(Some(address));
        Ok(address)
    }

    pub async fn disconnect(&self, cluster: &ClusterClient) -> Result<()> {
        cluster.store().set_address(None);
        Ok(())
    }

    pub async fn sign_message(&self, message: &str) -> Result<Signature> {
        Ok(self.keypair.sign_message(message.as_bytes()))
    }

    pub async fn sign_transaction(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<String> {
        let draft = TransactionBuilder::new(cluster)
            .construct_transaction(intent)
            .await?;
        let blockhash = draft.recent_blockhash;
        let mut tx = draft.into_transaction();
        tx.try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| ConnectorError::Provider(format!("mock signer: {e}")))?;
        encode_transaction(&tx)
    }
}

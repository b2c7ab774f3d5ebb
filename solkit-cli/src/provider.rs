use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
    transaction::Transaction,
};
use solkit_connector::{
    connectors::{ConnectResponse, InjectedProvider, MessageFormat},
    ConnectorError, Result,
};
use std::path::Path;

/// A wallet provider backed by a keypair file on disk.
pub struct KeypairFileProvider {
    keypair: Keypair,
}

impl std::fmt::Debug for KeypairFileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairFileProvider")
            .field("pubkey", &self.keypair.pubkey())
            .finish()
    }
}

impl KeypairFileProvider {
    pub const NAME: &'static str = "keypair";

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let keypair = read_keypair_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to read keypair file {}: {e}", path.display()))?;
        Ok(Self { keypair })
    }
}

#[async_trait]
impl InjectedProvider for KeypairFileProvider {
    async fn connect(&self) -> Result<ConnectResponse> {
        Ok(ConnectResponse::PublicKey(self.keypair.pubkey()))
    }

    fn public_key(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn sign_message(&self, message: &[u8], _format: MessageFormat) -> Result<Signature> {
        Ok(self.keypair.sign_message(message))
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| ConnectorError::Provider(e.to_string()))?;
        Ok(transaction)
    }
}

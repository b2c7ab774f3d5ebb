//! # Pairing Connector
//!
//! A connector whose keys live in a remote signer reached through a pairing
//! session. The app proposes a session, publishes the pairing URI for the user
//! to scan or open, and waits for the remote side to approve.
//!
//! Signing requests travel as JSON (`solana_signMessage`,
//! `solana_signTransaction`). The remote signer is untrusted: every detached
//! signature it returns is verified locally before it is accepted.

use super::base::{
    encode_transaction, parse_pubkey, TransactionBuilder, TransactionDraft, TransactionIntent,
};
use crate::{
    cluster::ClusterClient,
    error::{ConnectorError, Result},
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Signature,
};
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Mutex, PoisonError},
};
use tokio::sync::watch;

pub const SIGN_MESSAGE_METHOD: &str = "solana_signMessage";
pub const SIGN_TRANSACTION_METHOD: &str = "solana_signTransaction";

/// The session an app asks the remote signer to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    /// Chain ids in `solana:<cluster id>` form.
    pub chains: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    pub rpc_map: HashMap<String, String>,
}

impl SessionProposal {
    pub fn for_cluster(cluster_id: &str, endpoint: &str) -> Self {
        let chain = format!("solana:{cluster_id}");
        Self {
            chains: vec![chain.clone()],
            methods: vec![
                SIGN_MESSAGE_METHOD.to_string(),
                SIGN_TRANSACTION_METHOD.to_string(),
            ],
            events: Vec::new(),
            rpc_map: HashMap::from([(chain, endpoint.to_string())]),
        }
    }
}

/// An approved pairing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: String,
    /// Accounts in `solana:<chain>:<address>` form.
    pub accounts: Vec<String>,
}

impl Session {
    /// The address of the first account in the session.
    pub fn address(&self) -> Result<Pubkey> {
        let account = self
            .accounts
            .first()
            .ok_or_else(|| ConnectorError::Pairing("session has no accounts".to_string()))?;
        let address = account
            .split(':')
            .nth(2)
            .ok_or_else(|| ConnectorError::Pairing(format!("malformed account '{account}'")))?;
        parse_pubkey(address)
    }
}

/// A proposed session waiting for the remote side.
pub struct PendingSession {
    /// The URI the remote signer uses to join the pairing.
    pub uri: String,
    pub approval: BoxFuture<'static, Result<Session>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAccountMeta {
    pub is_writable: bool,
    pub is_signer: bool,
    pub pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedInstruction {
    /// Base58 instruction data.
    pub data: String,
    pub keys: Vec<SerializedAccountMeta>,
    pub program_id: String,
}

/// A transport-neutral description of an unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTransaction {
    pub fee_payer: String,
    pub instructions: Vec<SerializedInstruction>,
    pub recent_blockhash: String,
}

impl From<&TransactionDraft> for SerializedTransaction {
    fn from(draft: &TransactionDraft) -> Self {
        Self {
            fee_payer: draft.fee_payer.to_string(),
            instructions: draft
                .instructions
                .iter()
                .map(|ix| SerializedInstruction {
                    data: bs58::encode(&ix.data).into_string(),
                    keys: ix
                        .accounts
                        .iter()
                        .map(|meta| SerializedAccountMeta {
                            is_writable: meta.is_writable,
                            is_signer: meta.is_signer,
                            pubkey: meta.pubkey.to_string(),
                        })
                        .collect(),
                    program_id: ix.program_id.to_string(),
                })
                .collect(),
            recent_blockhash: draft.recent_blockhash.to_string(),
        }
    }
}

impl TryFrom<&SerializedTransaction> for TransactionDraft {
    type Error = ConnectorError;

    fn try_from(tx: &SerializedTransaction) -> Result<Self> {
        let instructions = tx
            .instructions
            .iter()
            .map(|ix| {
                let accounts = ix
                    .keys
                    .iter()
                    .map(|key| {
                        Ok(AccountMeta {
                            pubkey: parse_pubkey(&key.pubkey)?,
                            is_signer: key.is_signer,
                            is_writable: key.is_writable,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let data = bs58::decode(&ix.data).into_vec().map_err(|e| {
                    ConnectorError::Serialization(format!("instruction data: {e}"))
                })?;
                Ok(Instruction {
                    program_id: parse_pubkey(&ix.program_id)?,
                    accounts,
                    data,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let recent_blockhash = Hash::from_str(&tx.recent_blockhash)
            .map_err(|e| ConnectorError::Serialization(format!("blockhash: {e}")))?;
        Ok(TransactionDraft {
            instructions,
            fee_payer: parse_pubkey(&tx.fee_payer)?,
            recent_blockhash,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageParams {
    /// Base58 message bytes.
    pub message: String,
    pub pubkey: String,
}

/// A request sent to the remote signer over an approved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RemoteRequest {
    #[serde(rename = "solana_signMessage")]
    SignMessage(SignMessageParams),
    #[serde(rename = "solana_signTransaction")]
    SignTransaction(SerializedTransaction),
}

impl RemoteRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::SignMessage(_) => SIGN_MESSAGE_METHOD,
            Self::SignTransaction(_) => SIGN_TRANSACTION_METHOD,
        }
    }
}

/// The remote signer's answer to either signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Base58 detached signature.
    pub signature: String,
}

/// The relay between this app and a remote signer.
#[async_trait]
pub trait PairingTransport: Send + Sync {
    /// Returns a previously approved session, if one survives.
    async fn restore_session(&self) -> Result<Option<Session>>;

    async fn connect(&self, proposal: SessionProposal) -> Result<PendingSession>;

    async fn request(&self, session: &Session, request: RemoteRequest) -> Result<Value>;

    async fn disconnect(&self, session: &Session) -> Result<()>;
}

pub struct PairingConnector {
    transport: std::sync::Arc<dyn PairingTransport>,
    session: Mutex<Option<Session>>,
    pairing_uri: watch::Sender<Option<String>>,
    autoconnect: bool,
}

impl std::fmt::Debug for PairingConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingConnector")
            .field("session", &self.session())
            .field("autoconnect", &self.autoconnect)
            .finish()
    }
}

impl PairingConnector {
    pub const NAME: &'static str = "pairing";

    pub fn new(transport: std::sync::Arc<dyn PairingTransport>) -> Self {
        Self {
            transport,
            session: Mutex::new(None),
            pairing_uri: watch::channel(None).0,
            autoconnect: false,
        }
    }

    /// Restore an existing session when the client starts.
    pub fn with_autoconnect(mut self, autoconnect: bool) -> Self {
        self.autoconnect = autoconnect;
        self
    }

    pub fn autoconnect(&self) -> bool {
        self.autoconnect
    }

    pub fn name(&self) -> String {
        Self::NAME.to_string()
    }

    pub fn is_available(&self) -> bool {
        true
    }

    /// Publishes the pairing URI while a connection is pending, `None` otherwise.
    pub fn pairing_uri(&self) -> watch::Receiver<Option<String>> {
        self.pairing_uri.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn require_session(&self) -> Result<Session> {
        self.session()
            .ok_or_else(|| ConnectorError::Pairing("no active session".to_string()))
    }

    /// Adopts a surviving session from the transport, if any.
    pub async fn restore(&self, cluster: &ClusterClient) -> Result<Option<Pubkey>> {
        let Some(session) = self.transport.restore_session().await? else {
            return Ok(None);
        };
        let address = session.address()?;
        self.set_session(Some(session));
        cluster.store().set_address(Some(address));
        tracing::info!("Restored pairing session for {}", address);
        Ok(Some(address))
    }

    pub async fn connect(&self, cluster: &ClusterClient) -> Result<Pubkey> {
        let chosen = cluster.store().cluster();
        let proposal = SessionProposal::for_cluster(&chosen.id, &chosen.endpoint);
        let pending = self.transport.connect(proposal).await?;

        tracing::info!("Waiting for pairing approval: {}", pending.uri);
        self.pairing_uri.send_replace(Some(pending.uri));
        let approved = pending.approval.await;
        self.pairing_uri.send_replace(None);

        let session = approved?;
        let address = session.address()?;
        self.set_session(Some(session));
        cluster.store().set_address(Some(address));
        tracing::info!("Paired with {}", address);
        Ok(address)
    }

    pub async fn disconnect(&self, cluster: &ClusterClient) -> Result<()> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            self.transport.disconnect(&session).await?;
        }
        cluster.store().set_address(None);
        tracing::info!("Pairing session closed");
        Ok(())
    }

    async fn request_signature(&self, request: RemoteRequest) -> Result<Signature> {
        let session = self.require_session()?;
        let method = request.method();
        let raw = self.transport.request(&session, request).await?;
        let response: SignatureResponse = serde_json::from_value(raw)?;
        let bytes = bs58::decode(&response.signature)
            .into_vec()
            .map_err(|e| ConnectorError::Pairing(format!("{method}: bad signature encoding: {e}")))?;
        Signature::try_from(bytes.as_slice()).map_err(|_| ConnectorError::InvalidSignature)
    }

    pub async fn sign_message(&self, cluster: &ClusterClient, message: &str) -> Result<Signature> {
        let address = cluster.store().address().ok_or(ConnectorError::NoAddress)?;
        let signature = self
            .request_signature(RemoteRequest::SignMessage(SignMessageParams {
                message: bs58::encode(message.as_bytes()).into_string(),
                pubkey: address.to_string(),
            }))
            .await?;
        if !signature.verify(address.as_ref(), message.as_bytes()) {
            return Err(ConnectorError::InvalidSignature);
        }
        Ok(signature)
    }

    /// Sends the transaction to the remote signer, attaches the returned
    /// signature for the connected address and verifies it before encoding.
    pub async fn sign_transaction(
        &self,
        cluster: &ClusterClient,
        intent: &TransactionIntent,
    ) -> Result<String> {
        let draft = TransactionBuilder::new(cluster)
            .construct_transaction(intent)
            .await?;
        let address = cluster.store().address().ok_or(ConnectorError::NoAddress)?;

        let signature = self
            .request_signature(RemoteRequest::SignTransaction(SerializedTransaction::from(
                &draft,
            )))
            .await?;

        let mut tx = draft.into_transaction();
        let signers = usize::from(tx.message.header.num_required_signatures);
        let index = tx.message.account_keys[..signers]
            .iter()
            .position(|key| *key == address)
            .ok_or_else(|| {
                ConnectorError::Pairing(format!("{address} is not a signer of the transaction"))
            })?;
        tx.signatures[index] = signature;

        if !signature.verify(address.as_ref(), &tx.message_data()) {
            tracing::warn!(%address, "Remote signer returned an invalid signature");
            return Err(ConnectorError::InvalidSignature);
        }
        encode_transaction(&tx)
    }
}

//! # Transaction Builder
//!
//! The shared half of every connector: turning a typed [`TransactionIntent`]
//! into an unsigned transaction stamped with a fresh blockhash, and the
//! read-only cluster calls every backend exposes the same way.
//!
//! Signing is left to the connector variants. The builder never caches a
//! blockhash; each construction costs one `getLatestBlockhash` round trip.

use crate::{
    cluster::{ClusterClient, KeyedAccount, SubscribeMethod, Subscription},
    config::commitment_str,
    error::{ConnectorError, Result},
    name_service::{NameResolver, SplNameService},
};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use std::str::FromStr;

/// Which side of a transfer pays the transaction fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePayer {
    From,
    To,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub to: Pubkey,
    pub amount_in_lamports: u64,
    pub fee_payer: FeePayer,
}

/// A single generic instruction sent by the connected address.
///
/// The connected address is always the first account and always a signer.
/// `accounts` are appended after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramArgs {
    pub program_id: Pubkey,
    pub is_writable_sender: bool,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// What the caller wants a transaction to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionIntent {
    Transfer(TransferArgs),
    Program(ProgramArgs),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    to: String,
    amount_in_lamports: u64,
    fee_payer: FeePayer,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccountMeta {
    pubkey: String,
    #[serde(default)]
    is_signer: bool,
    #[serde(default)]
    is_writable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProgram {
    program_id: String,
    #[serde(default)]
    is_writable_sender: bool,
    #[serde(default)]
    accounts: Vec<RawAccountMeta>,
    /// Base58 instruction payload.
    #[serde(default)]
    data: String,
}

pub(crate) fn parse_pubkey(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|_| ConnectorError::InvalidAddress(s.to_string()))
}

impl TransactionIntent {
    /// Parses an intent from its type name and JSON parameters, e.g.
    /// `("transfer", {"to": "..", "amountInLamports": 1000, "feePayer": "from"})`.
    pub fn parse(kind: &str, params: Value) -> Result<Self> {
        match kind {
            "transfer" => {
                let raw: RawTransfer = serde_json::from_value(params)?;
                Ok(Self::Transfer(TransferArgs {
                    to: parse_pubkey(&raw.to)?,
                    amount_in_lamports: raw.amount_in_lamports,
                    fee_payer: raw.fee_payer,
                }))
            }
            "program" => {
                let raw: RawProgram = serde_json::from_value(params)?;
                let accounts = raw
                    .accounts
                    .iter()
                    .map(|meta| {
                        Ok(AccountMeta {
                            pubkey: parse_pubkey(&meta.pubkey)?,
                            is_signer: meta.is_signer,
                            is_writable: meta.is_writable,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let data = bs58::decode(&raw.data)
                    .into_vec()
                    .map_err(|e| ConnectorError::Serialization(format!("program data: {e}")))?;
                Ok(Self::Program(ProgramArgs {
                    program_id: parse_pubkey(&raw.program_id)?,
                    is_writable_sender: raw.is_writable_sender,
                    accounts,
                    data,
                }))
            }
            other => Err(ConnectorError::UnsupportedTransactionType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transfer(_) => "transfer",
            Self::Program(_) => "program",
        }
    }
}

/// An unsigned transaction before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
    pub instructions: Vec<Instruction>,
    pub fee_payer: Pubkey,
    pub recent_blockhash: Hash,
}

impl TransactionDraft {
    pub fn message(&self) -> Message {
        Message::new_with_blockhash(
            &self.instructions,
            Some(&self.fee_payer),
            &self.recent_blockhash,
        )
    }

    pub fn into_transaction(self) -> Transaction {
        Transaction::new_unsigned(self.message())
    }
}

/// Serializes a signed transaction in wire format and base58-encodes it.
pub fn encode_transaction(tx: &Transaction) -> Result<String> {
    let bytes = bincode::serde::encode_to_vec(tx, bincode::config::legacy())
        .map_err(|e| ConnectorError::Serialization(format!("transaction: {e}")))?;
    Ok(bs58::encode(bytes).into_string())
}

/// Builds transactions and issues the cluster calls shared by all connectors.
#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder<'a> {
    cluster: &'a ClusterClient,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(cluster: &'a ClusterClient) -> Self {
        Self { cluster }
    }

    /// Builds an unsigned transaction for the connected address.
    ///
    /// Fails with [`ConnectorError::NoAddress`] when nothing is connected.
    /// The blockhash is fetched from the cluster on every call.
    pub async fn construct_transaction(&self, intent: &TransactionIntent) -> Result<TransactionDraft> {
        let from = self.cluster.store().address().ok_or(ConnectorError::NoAddress)?;

        let (instructions, fee_payer) = match intent {
            TransactionIntent::Transfer(args) => {
                let ix = solana_system_interface::instruction::transfer(
                    &from,
                    &args.to,
                    args.amount_in_lamports,
                );
                let fee_payer = match args.fee_payer {
                    FeePayer::From => from,
                    FeePayer::To => args.to,
                };
                (vec![ix], fee_payer)
            }
            TransactionIntent::Program(args) => {
                let mut accounts = Vec::with_capacity(args.accounts.len() + 1);
                accounts.push(AccountMeta {
                    pubkey: from,
                    is_signer: true,
                    is_writable: args.is_writable_sender,
                });
                accounts.extend(args.accounts.iter().cloned());
                let ix = Instruction {
                    program_id: args.program_id,
                    accounts,
                    data: args.data.clone(),
                };
                (vec![ix], from)
            }
        };

        let recent_blockhash = self.cluster.get_latest_blockhash().await?;
        tracing::debug!(
            kind = intent.kind(),
            %fee_payer,
            %recent_blockhash,
            "Constructed transaction"
        );

        Ok(TransactionDraft {
            instructions,
            fee_payer,
            recent_blockhash,
        })
    }

    pub async fn send_transaction(&self, encoded_transaction: &str) -> Result<Signature> {
        self.cluster.send_transaction(encoded_transaction).await
    }

    /// Balance of `address`, or of the connected address. `None` when there is
    /// no address to look up.
    pub async fn get_balance(&self, address: Option<Pubkey>) -> Result<Option<u64>> {
        let Some(address) = address.or_else(|| self.cluster.store().address()) else {
            return Ok(None);
        };
        self.cluster.get_balance(&address).await.map(Some)
    }

    /// Account data of `address`, or of the connected address.
    pub async fn get_account(&self, address: Option<Pubkey>, encoding: &str) -> Result<Option<Value>> {
        let Some(address) = address.or_else(|| self.cluster.store().address()) else {
            return Ok(None);
        };
        self.cluster.get_account_info(&address, encoding).await
    }

    pub async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<KeyedAccount>> {
        self.cluster
            .get_program_accounts(
                program_id,
                json!({
                    "encoding": "base64",
                    "commitment": commitment_str(self.cluster.commitment()),
                }),
            )
            .await
    }

    pub async fn get_transaction(&self, signature: &Signature) -> Result<Option<Value>> {
        self.cluster.get_transaction(signature).await
    }

    /// The fee the cluster would charge for the transaction `intent` builds.
    pub async fn get_fee_for_message(&self, intent: &TransactionIntent) -> Result<Option<u64>> {
        let draft = self.construct_transaction(intent).await?;
        self.cluster.get_fee_for_message(&draft.message()).await
    }

    pub async fn get_block(&self, slot: u64) -> Result<Option<Value>> {
        self.cluster.get_block(slot).await
    }

    /// Subscribes to status updates for `signature`.
    pub async fn watch_transaction(&self, signature: &Signature) -> Result<Subscription> {
        self.cluster
            .subscribe(
                SubscribeMethod::Signature,
                json!([
                    signature.to_string(),
                    { "commitment": commitment_str(self.cluster.commitment()) }
                ]),
            )
            .await
    }

    /// A display name for `address`. Resolution failures are logged and
    /// reported as `None`.
    pub async fn fetch_name(&self, address: &Pubkey) -> Option<String> {
        let resolver = SplNameService::new(self.cluster.clone());
        match resolver.favorite_domain(address).await {
            Ok(name) => return Some(name),
            Err(e) => tracing::debug!(%address, "No favorite domain: {}", e),
        }
        match resolver.domains(address).await {
            Ok(domains) => domains.into_iter().next(),
            Err(e) => {
                tracing::debug!(%address, "Domain lookup failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::testing::{CannedHttp, PairedOpener},
        config::Cluster,
        connectors::{Connector, MockConnector},
        store::{Store, StoreConfig},
    };
    use std::sync::Arc;

    fn cluster() -> (ClusterClient, Arc<CannedHttp>) {
        let store = Arc::new(
            Store::new(StoreConfig {
                connectors: vec![Connector::Mock(MockConnector::new())],
                cluster: Cluster::devnet(),
                active_connector: None,
            })
            .unwrap(),
        );
        let http = Arc::new(CannedHttp::default());
        let client = ClusterClient::new(store, http.clone(), Arc::new(PairedOpener::default()));
        (client, http)
    }

    fn blockhash_response(hash: &Hash) -> Value {
        json!({ "context": { "slot": 1 }, "value": { "blockhash": hash.to_string(), "lastValidBlockHeight": 10 } })
    }

    #[tokio::test]
    async fn transfer_from_connected_address() {
        let (cluster, http) = cluster();
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let h1 = Hash::new_unique();
        cluster.store().set_address(Some(from));
        http.respond_result("getLatestBlockhash", blockhash_response(&h1));

        let intent = TransactionIntent::Transfer(TransferArgs {
            to,
            amount_in_lamports: 1000,
            fee_payer: FeePayer::From,
        });
        let draft = TransactionBuilder::new(&cluster)
            .construct_transaction(&intent)
            .await
            .unwrap();

        assert_eq!(draft.fee_payer, from);
        assert_eq!(draft.recent_blockhash, h1);
        assert_eq!(
            draft.instructions,
            vec![solana_system_interface::instruction::transfer(&from, &to, 1000)]
        );

        let tx = draft.into_transaction();
        assert_eq!(tx.message.account_keys[0], from);
        assert_eq!(tx.message.recent_blockhash, h1);
    }

    #[tokio::test]
    async fn recipient_can_pay_the_fee() {
        let (cluster, http) = cluster();
        let from = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        cluster.store().set_address(Some(from));
        http.respond_result("getLatestBlockhash", blockhash_response(&Hash::new_unique()));

        let intent = TransactionIntent::parse(
            "transfer",
            json!({ "to": to.to_string(), "amountInLamports": 5, "feePayer": "to" }),
        )
        .unwrap();
        let draft = TransactionBuilder::new(&cluster)
            .construct_transaction(&intent)
            .await
            .unwrap();
        assert_eq!(draft.fee_payer, to);
    }

    #[tokio::test]
    async fn program_instruction_puts_sender_first() {
        let (cluster, http) = cluster();
        let from = Pubkey::new_unique();
        let program_id = Pubkey::new_unique();
        let extra = Pubkey::new_unique();
        cluster.store().set_address(Some(from));
        http.respond_result("getLatestBlockhash", blockhash_response(&Hash::new_unique()));

        let intent = TransactionIntent::parse(
            "program",
            json!({
                "programId": program_id.to_string(),
                "isWritableSender": true,
                "accounts": [{ "pubkey": extra.to_string(), "isWritable": true }],
                "data": bs58::encode([1u8, 2, 3]).into_string(),
            }),
        )
        .unwrap();
        let draft = TransactionBuilder::new(&cluster)
            .construct_transaction(&intent)
            .await
            .unwrap();

        let ix = &draft.instructions[0];
        assert_eq!(ix.program_id, program_id);
        assert_eq!(ix.accounts[0], AccountMeta::new(from, true));
        assert_eq!(ix.accounts[1], AccountMeta::new(extra, false));
        assert_eq!(ix.data, vec![1, 2, 3]);
        assert_eq!(draft.fee_payer, from);
    }

    #[tokio::test]
    async fn every_construction_fetches_a_fresh_blockhash() {
        let (cluster, http) = cluster();
        cluster.store().set_address(Some(Pubkey::new_unique()));
        let (h1, h2) = (Hash::new_unique(), Hash::new_unique());
        http.respond_result("getLatestBlockhash", blockhash_response(&h1));
        http.respond_result("getLatestBlockhash", blockhash_response(&h2));

        let intent = TransactionIntent::Transfer(TransferArgs {
            to: Pubkey::new_unique(),
            amount_in_lamports: 1,
            fee_payer: FeePayer::From,
        });
        let builder = TransactionBuilder::new(&cluster);
        let first = builder.construct_transaction(&intent).await.unwrap();
        let second = builder.construct_transaction(&intent).await.unwrap();

        assert_eq!(first.recent_blockhash, h1);
        assert_eq!(second.recent_blockhash, h2);
        assert_eq!(http.requests_for("getLatestBlockhash").len(), 2);
    }

    #[tokio::test]
    async fn construction_requires_an_address() {
        let (cluster, _) = cluster();
        let intent = TransactionIntent::Transfer(TransferArgs {
            to: Pubkey::new_unique(),
            amount_in_lamports: 1,
            fee_payer: FeePayer::From,
        });
        let err = TransactionBuilder::new(&cluster)
            .construct_transaction(&intent)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NoAddress));
    }

    #[test]
    fn unknown_intent_kind_is_rejected() {
        let err = TransactionIntent::parse("stake", json!({})).unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedTransactionType(kind) if kind == "stake"));

        let err = TransactionIntent::parse(
            "transfer",
            json!({ "to": "not-a-key", "amountInLamports": 1, "feePayer": "from" }),
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn balance_without_address_is_none() {
        let (cluster, http) = cluster();
        let builder = TransactionBuilder::new(&cluster);
        assert_eq!(builder.get_balance(None).await.unwrap(), None);
        assert!(http.requests_for("getBalance").is_empty());

        http.respond_result("getBalance", json!({ "value": 42 }));
        cluster.store().set_address(Some(Pubkey::new_unique()));
        assert_eq!(builder.get_balance(None).await.unwrap(), Some(42));
    }
}

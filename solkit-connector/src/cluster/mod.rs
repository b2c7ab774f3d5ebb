//! # Cluster Communication Layer
//!
//! The single point of truth for talking to the chosen cluster endpoint:
//!
//! - one-shot JSON-RPC calls over HTTP ([`ClusterClient::request`] and its typed helpers);
//! - push subscriptions over one lazily opened, shared WebSocket
//!   ([`ClusterClient::subscribe`]).
//!
//! Every outbound call consumes a fresh request id from the [`Store`], so
//! responses can always be correlated. There is no retry and no timeout here;
//! callers impose those externally if they need them.

mod socket;
mod subscription;

pub use socket::{ClusterSocket, SocketOpener, TungsteniteOpener};
pub use subscription::{SubscribeMethod, Subscription, SubscriptionStream, Unsubscribe};

use crate::{
    config::{commitment_str, ChannelConfig},
    error::{ConnectorError, Result},
    store::Store,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use solana_rpc_client_api::request::RpcRequest;
use solana_sdk::{
    commitment_config::CommitmentLevel, hash::Hash, message::Message, pubkey::Pubkey,
    signature::Signature,
};
use std::{str::FromStr, sync::Arc};
use tokio::sync::mpsc;

/// A trait abstracting over the HTTP side of the cluster connection.
///
/// This keeps [`ClusterClient`] independent from the concrete HTTP stack, so it
/// can be driven by a canned transport in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POSTs `body` as JSON to `endpoint` and returns the parsed JSON response body.
    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value>;
}

/// The default [`HttpTransport`], backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}

/// A cluster response wrapped in an RPC context; only the value is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcValue<T> {
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    #[serde(default)]
    pub last_valid_block_height: u64,
}

/// One entry of a `getProgramAccounts` result.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedAccount {
    pub pubkey: String,
    pub account: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Issues JSON-RPC calls and subscriptions against the store's chosen cluster.
///
/// Cheap to clone; clones share the transports. The subscription socket and
/// the lock that guards its creation live in the [`Store`].
#[derive(Clone)]
pub struct ClusterClient {
    store: Arc<Store>,
    http: Arc<dyn HttpTransport>,
    opener: Arc<dyn SocketOpener>,
    commitment: CommitmentLevel,
    channels: ChannelConfig,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("cluster", &self.store.cluster().endpoint)
            .field("commitment", &self.commitment)
            .finish()
    }
}

impl ClusterClient {
    pub fn new(
        store: Arc<Store>,
        http: Arc<dyn HttpTransport>,
        opener: Arc<dyn SocketOpener>,
    ) -> Self {
        Self {
            store,
            http,
            opener,
            commitment: CommitmentLevel::Confirmed,
            channels: ChannelConfig::default(),
        }
    }

    pub fn with_commitment(mut self, commitment: CommitmentLevel) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn commitment(&self) -> CommitmentLevel {
        self.commitment
    }

    /// Sends a single JSON-RPC call over HTTP and returns its `result`.
    ///
    /// A body without a `result` field is an [`ConnectorError::Rpc`]; a `null`
    /// result is handed to the caller, who decides whether it is meaningful.
    pub async fn request<T: DeserializeOwned>(&self, method: RpcRequest, params: Value) -> Result<T> {
        let id = self.store.next_request_id();
        let body = method.build_request_json(id, params);
        let endpoint = self.store.cluster().endpoint;
        tracing::debug!(%method, id, "Cluster request");

        let mut response = self.http.post(&endpoint, &body).await?;
        match response.get_mut("result").map(Value::take) {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => {
                let error: RpcErrorObject = response
                    .get("error")
                    .cloned()
                    .and_then(|e| serde_json::from_value(e).ok())
                    .unwrap_or_default();
                tracing::debug!(%method, id, code = error.code, "Cluster request failed");
                Err(ConnectorError::Rpc {
                    method: method.to_string(),
                    code: error.code,
                    message: if error.message.is_empty() {
                        "response has no result".to_string()
                    } else {
                        error.message
                    },
                })
            }
        }
    }

    fn commitment_config(&self) -> Value {
        json!({ "commitment": commitment_str(self.commitment) })
    }

    pub async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        let balance: RpcValue<u64> = self
            .request(
                RpcRequest::GetBalance,
                json!([address.to_string(), self.commitment_config()]),
            )
            .await?;
        Ok(balance.value)
    }

    /// Fetches the latest blockhash. Never cached: a stale blockhash makes a
    /// transaction unconfirmable once its validity window has passed.
    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        let latest: RpcValue<LatestBlockhash> = self
            .request(RpcRequest::GetLatestBlockhash, json!([self.commitment_config()]))
            .await?;
        Hash::from_str(&latest.value.blockhash)
            .map_err(|e| ConnectorError::Serialization(format!("blockhash: {e}")))
    }

    /// Submits a base58-encoded, signed transaction and returns its signature.
    pub async fn send_transaction(&self, encoded_transaction: &str) -> Result<Signature> {
        let signature: String = self
            .request(
                RpcRequest::SendTransaction,
                json!([
                    encoded_transaction,
                    {
                        "encoding": "base58",
                        "preflightCommitment": commitment_str(self.commitment),
                    }
                ]),
            )
            .await?;
        Signature::from_str(&signature)
            .map_err(|e| ConnectorError::Serialization(format!("signature: {e}")))
    }

    /// Returns the account at `address`, or `None` if it does not exist.
    pub async fn get_account_info(&self, address: &Pubkey, encoding: &str) -> Result<Option<Value>> {
        let account: RpcValue<Option<Value>> = self
            .request(
                RpcRequest::GetAccountInfo,
                json!([
                    address.to_string(),
                    { "encoding": encoding, "commitment": commitment_str(self.commitment) }
                ]),
            )
            .await?;
        Ok(account.value)
    }

    /// Lists the accounts owned by `program_id`. `config` is passed through
    /// verbatim (encoding, filters, data slices).
    pub async fn get_program_accounts(&self, program_id: &Pubkey, config: Value) -> Result<Vec<KeyedAccount>> {
        self.request(
            RpcRequest::GetProgramAccounts,
            json!([program_id.to_string(), config]),
        )
        .await
    }

    pub async fn get_transaction(&self, signature: &Signature) -> Result<Option<Value>> {
        // `processed` is not accepted for historical queries.
        let commitment = match self.commitment {
            CommitmentLevel::Processed => CommitmentLevel::Confirmed,
            other => other,
        };
        self.request(
            RpcRequest::GetTransaction,
            json!([
                signature.to_string(),
                {
                    "encoding": "json",
                    "commitment": commitment_str(commitment),
                    "maxSupportedTransactionVersion": 0,
                }
            ]),
        )
        .await
    }

    /// Returns the fee the cluster would charge for `message`, if the blockhash is still valid.
    pub async fn get_fee_for_message(&self, message: &Message) -> Result<Option<u64>> {
        let fee: RpcValue<Option<u64>> = self
            .request(
                RpcRequest::GetFeeForMessage,
                json!([BASE64.encode(message.serialize()), self.commitment_config()]),
            )
            .await?;
        Ok(fee.value)
    }

    pub async fn get_block(&self, slot: u64) -> Result<Option<Value>> {
        self.request(
            RpcRequest::GetBlock,
            json!([
                slot,
                {
                    "encoding": "json",
                    "transactionDetails": "full",
                    "rewards": false,
                    "maxSupportedTransactionVersion": 0,
                }
            ]),
        )
        .await
    }

    /// Opens a push subscription on the shared socket.
    ///
    /// The socket is created on first use and reused by every later
    /// subscription. Resolves once the cluster acknowledges the subscribe; a
    /// rejection is returned as [`ConnectorError::Rpc`]. The returned
    /// [`Subscription`] yields each notification's `params.result`.
    pub async fn subscribe(&self, method: SubscribeMethod, params: Value) -> Result<Subscription> {
        let socket = self.socket().await?;
        let request_id = self.store.next_request_id();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method.as_str(),
            "params": params,
        })
        .to_string();

        let (sink, notifications) = mpsc::channel(self.channels.subscription_buffer);
        // Dropped unarmed if this future is cancelled before the ack, which
        // cancels the subscription once the cluster assigns its id.
        let unsubscribe = Unsubscribe::new(request_id, method, socket.clone(), self.store.clone());
        match socket.subscribe(request_id, method, payload, sink).await {
            Ok(subscription_id) => {
                tracing::debug!(
                    method = method.as_str(),
                    request_id,
                    subscription_id,
                    "Subscription established"
                );
                Ok(Subscription::new(notifications, unsubscribe))
            }
            Err(e) => {
                unsubscribe.disarm();
                Err(e)
            }
        }
    }

    /// Returns the shared socket of the current cluster, opening it if there
    /// is none (or it died).
    async fn socket(&self) -> Result<ClusterSocket> {
        loop {
            if let Some(socket) = self.store.socket() {
                return Ok(socket);
            }

            let _creating = self.store.lock_socket_creation().await;
            if let Some(socket) = self.store.socket() {
                return Ok(socket);
            }

            let url = self.store.cluster().websocket_url()?;
            tracing::info!("Opening cluster socket at {}", url);
            let (outgoing, incoming) = self.opener.open(&url, self.channels.socket_buffer).await?;
            let socket = ClusterSocket::spawn(outgoing, incoming, &self.channels);
            if self.store.install_socket(&url, socket.clone()) {
                return Ok(socket);
            }
            tracing::info!("Cluster changed while opening {}, reopening", url);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CannedHttp, PairedOpener};
    use super::*;
    use crate::{
        config::Cluster,
        connectors::{Connector, MockConnector},
        store::StoreConfig,
    };

    fn client() -> (ClusterClient, Arc<CannedHttp>, Arc<PairedOpener>) {
        let store = Arc::new(
            Store::new(StoreConfig {
                connectors: vec![Connector::Mock(MockConnector::new())],
                cluster: Cluster::devnet(),
                active_connector: None,
            })
            .unwrap(),
        );
        let http = Arc::new(CannedHttp::default());
        let opener = Arc::new(PairedOpener::default());
        (ClusterClient::new(store, http.clone(), opener.clone()), http, opener)
    }

    #[tokio::test]
    async fn request_builds_jsonrpc_envelope() {
        let (client, http, _) = client();
        http.respond_result("getBalance", json!({ "context": { "slot": 1 }, "value": 42 }));

        let address = Pubkey::new_unique();
        assert_eq!(client.get_balance(&address).await.unwrap(), 42);

        let sent = http.requests_for("getBalance");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["jsonrpc"], "2.0");
        assert_eq!(sent[0]["params"][0], address.to_string());
        assert!(sent[0]["id"].as_u64().is_some());
    }

    #[tokio::test]
    async fn every_request_consumes_a_fresh_id() {
        let (client, http, _) = client();
        http.respond_result("getBalance", json!({ "value": 1 }));

        let address = Pubkey::new_unique();
        for _ in 0..3 {
            client.get_balance(&address).await.unwrap();
        }
        let ids: Vec<u64> = http
            .requests_for("getBalance")
            .iter()
            .map(|r| r["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn missing_result_is_an_rpc_error() {
        let (client, http, _) = client();
        http.respond(
            "getBalance",
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32602, "message": "Invalid param" } }),
        );

        let err = client.get_balance(&Pubkey::new_unique()).await.unwrap_err();
        match err {
            ConnectorError::Rpc { method, code, message } => {
                assert_eq!(method, "getBalance");
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid param");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_result_reaches_the_caller() {
        let (client, http, _) = client();
        http.respond_result("getTransaction", Value::Null);

        let tx = client.get_transaction(&Signature::default()).await.unwrap();
        assert!(tx.is_none());
    }

    #[tokio::test]
    async fn blockhash_is_parsed() {
        let (client, http, _) = client();
        let hash = Hash::new_unique();
        http.respond_result(
            "getLatestBlockhash",
            json!({ "context": { "slot": 7 }, "value": { "blockhash": hash.to_string(), "lastValidBlockHeight": 99 } }),
        );
        assert_eq!(client.get_latest_blockhash().await.unwrap(), hash);
    }

    #[tokio::test]
    async fn concurrent_subscribers_share_one_socket() {
        let (client, _, opener) = client();

        let acks = async {
            let mut peer = opener.next_peer().await;
            peer.ack_next(1).await;
            peer.ack_next(2).await;
            peer
        };
        let (a, b, _peer) = tokio::join!(
            client.subscribe(SubscribeMethod::Slot, json!([])),
            client.subscribe(SubscribeMethod::Root, json!([])),
            acks,
        );
        a.unwrap();
        b.unwrap();

        let opened = opener.opened.lock().unwrap().clone();
        assert_eq!(opened, vec!["wss://api.devnet.solana.com".to_string()]);
    }

    #[tokio::test]
    async fn clients_over_one_store_share_one_socket() {
        let (first, http, opener) = client();
        let second = ClusterClient::new(first.store().clone(), http, opener.clone());

        let acks = async {
            let mut peer = opener.next_peer().await;
            peer.ack_next(1).await;
            peer.ack_next(2).await;
            peer
        };
        let (a, b, _peer) = tokio::join!(
            first.subscribe(SubscribeMethod::Slot, json!([])),
            second.subscribe(SubscribeMethod::Slot, json!([])),
            acks,
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(opener.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_subscribe_is_an_rpc_error() {
        let (client, _, opener) = client();

        let reject = async {
            let mut peer = opener.next_peer().await;
            let request = peer.recv_json().await;
            peer.push(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32602, "message": "Invalid params" }
            }))
            .await;
            peer
        };
        let (outcome, _peer) = tokio::join!(
            client.subscribe(SubscribeMethod::Account, json!(["not-a-key"])),
            reject,
        );

        match outcome.unwrap_err() {
            ConnectorError::Rpc { method, code, message } => {
                assert_eq!(method, "accountSubscribe");
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid params");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

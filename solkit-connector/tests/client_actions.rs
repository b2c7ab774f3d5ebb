use async_trait::async_trait;
use serde_json::{json, Value};
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature};
use solkit_connector::{
    cluster::{HttpTransport, SocketOpener},
    connectors::{FeePayer, InjectedConnector, MockConnector, ProviderRegistry, TransferArgs},
    Client, Cluster, Connector, ConnectorConfig, ConnectorError, Result, TransactionIntent,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{mpsc, Notify};

/// Answers each JSON-RPC method with a fixed `result`.
#[derive(Default)]
struct FixedHttp {
    results: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<Value>>,
}

impl FixedHttp {
    fn set(&self, method: &str, result: Value) {
        self.results.lock().unwrap().insert(method.to_string(), result);
    }

    fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c["method"] == method)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FixedHttp {
    async fn post(&self, _endpoint: &str, body: &Value) -> Result<Value> {
        self.calls.lock().unwrap().push(body.clone());
        let method = body["method"].as_str().unwrap_or_default();
        match self.results.lock().unwrap().get(method) {
            Some(result) => Ok(json!({ "jsonrpc": "2.0", "id": body["id"], "result": result })),
            None => Ok(json!({ "jsonrpc": "2.0", "id": body["id"], "error": { "code": -32601, "message": "Method not found" } })),
        }
    }
}

/// Hands the cluster side of every opened socket to the test.
#[derive(Default)]
struct LoopbackOpener {
    peers: Mutex<Vec<(mpsc::Receiver<String>, mpsc::Sender<String>)>>,
}

#[async_trait]
impl SocketOpener for LoopbackOpener {
    async fn open(
        &self,
        _url: &str,
        buffer: usize,
    ) -> Result<(mpsc::Sender<String>, mpsc::Receiver<String>)> {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        self.peers.lock().unwrap().push((out_rx, in_tx));
        Ok((out_tx, in_rx))
    }
}

impl LoopbackOpener {
    async fn next_peer(&self) -> (mpsc::Receiver<String>, mpsc::Sender<String>) {
        loop {
            {
                let mut peers = self.peers.lock().unwrap();
                if !peers.is_empty() {
                    return peers.remove(0);
                }
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Parks the first socket open until the test releases it.
#[derive(Default)]
struct Gate {
    started: Notify,
    release: Notify,
}

/// Opens sockets whose far end answers every request on its own, and records
/// which URL each request arrived on.
#[derive(Default)]
struct AnsweringOpener {
    opened: Mutex<Vec<String>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
    /// Sent as the `error` of every answer instead of a subscription id.
    rejection: Option<Value>,
    gate: Option<Gate>,
}

#[async_trait]
impl SocketOpener for AnsweringOpener {
    async fn open(
        &self,
        url: &str,
        buffer: usize,
    ) -> Result<(mpsc::Sender<String>, mpsc::Receiver<String>)> {
        let first = {
            let mut opened = self.opened.lock().unwrap();
            opened.push(url.to_string());
            opened.len() == 1
        };
        if let (true, Some(gate)) = (first, &self.gate) {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<String>(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let url = url.to_string();
        let requests = self.requests.clone();
        let rejection = self.rejection.clone();
        tokio::spawn(async move {
            let mut next_subscription = 100u64;
            while let Some(text) = out_rx.recv().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                requests.lock().unwrap().push((url.clone(), method));
                let answer = match &rejection {
                    Some(error) => json!({ "jsonrpc": "2.0", "id": request["id"], "error": error }),
                    None => {
                        next_subscription += 1;
                        json!({ "jsonrpc": "2.0", "id": request["id"], "result": next_subscription })
                    }
                };
                if in_tx.send(answer.to_string()).await.is_err() {
                    break;
                }
            }
        });
        Ok((out_tx, in_rx))
    }
}

fn answering_client(opener: AnsweringOpener) -> (Client, Arc<AnsweringOpener>) {
    let opener = Arc::new(opener);
    let client = Client::with_transports(
        &ConnectorConfig::default(),
        vec![MockConnector::new().into()],
        Arc::new(FixedHttp::default()),
        opener.clone(),
    )
    .unwrap();
    (client, opener)
}

async fn recv_json(rx: &mut mpsc::Receiver<String>) -> Value {
    serde_json::from_str(&rx.recv().await.unwrap()).unwrap()
}

fn client(connectors: Vec<Connector>) -> (Client, Arc<FixedHttp>, Arc<LoopbackOpener>) {
    let http = Arc::new(FixedHttp::default());
    let opener = Arc::new(LoopbackOpener::default());
    let client = Client::with_transports(
        &ConnectorConfig::default(),
        connectors,
        http.clone(),
        opener.clone(),
    )
    .unwrap();
    (client, http, opener)
}

#[tokio::test]
async fn connect_against_unavailable_connector_is_none() {
    let registry = Arc::new(ProviderRegistry::new());
    let (client, _, _) = client(vec![InjectedConnector::new("phantom", registry).into()]);

    assert_eq!(client.connect().await.unwrap(), None);
    assert_eq!(client.sign_message("hi").await.unwrap(), None);
    assert_eq!(client.address(), None);
}

#[tokio::test]
async fn balance_of_connected_address() {
    let (client, http, _) = client(vec![MockConnector::new().into()]);
    http.set("getBalance", json!({ "context": { "slot": 3 }, "value": 42 }));

    assert_eq!(client.get_balance(None).await.unwrap(), None);

    let address = client.connect().await.unwrap().unwrap();
    assert_eq!(client.get_balance(None).await.unwrap(), Some(42));
    assert_eq!(http.calls("getBalance")[0]["params"][0], address.to_string());
}

#[tokio::test]
async fn rpc_failure_surfaces_as_error() {
    let (client, _, _) = client(vec![MockConnector::new().into()]);
    client.connect().await.unwrap();

    let err = client.get_balance(None).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Rpc { code: -32601, .. }));
}

#[tokio::test]
async fn watch_transaction_delivers_and_unsubscribes_once() {
    let (client, _, opener) = client(vec![MockConnector::new().into()]);
    let signature = Signature::new_unique();

    let (subscription, (mut from_client, to_client)) = tokio::join!(
        client.watch_transaction(&signature),
        async {
            let (mut from_client, to_client) = opener.next_peer().await;
            let subscribe = recv_json(&mut from_client).await;
            assert_eq!(subscribe["method"], "signatureSubscribe");
            assert_eq!(subscribe["params"][0], signature.to_string());
            to_client
                .send(json!({ "jsonrpc": "2.0", "id": subscribe["id"], "result": 1234 }).to_string())
                .await
                .unwrap();
            (from_client, to_client)
        },
    );
    let mut subscription = subscription.unwrap().unwrap();

    to_client
        .send(
            json!({
                "jsonrpc": "2.0",
                "method": "signatureNotification",
                "params": { "subscription": 1234, "result": { "context": { "slot": 5 }, "value": { "err": null } } }
            })
            .to_string(),
        )
        .await
        .unwrap();

    let notification = subscription.next().await.unwrap();
    assert_eq!(notification["value"]["err"], Value::Null);

    let unsubscribe = subscription.unsubscriber();
    unsubscribe.unsubscribe().await.unwrap();
    unsubscribe.unsubscribe().await.unwrap();
    drop(subscription);

    let sent = recv_json(&mut from_client).await;
    assert_eq!(sent["method"], "signatureUnsubscribe");
    assert_eq!(sent["params"], json!([1234]));

    drop(unsubscribe);
    tokio::task::yield_now().await;
    assert!(from_client.try_recv().is_err());
}

#[tokio::test]
async fn rejected_watch_is_an_rpc_error() {
    let (client, opener) = answering_client(AnsweringOpener {
        rejection: Some(json!({ "code": -32602, "message": "Invalid signature" })),
        ..AnsweringOpener::default()
    });

    let err = client
        .watch_transaction(&Signature::new_unique())
        .await
        .unwrap_err();
    match err {
        ConnectorError::Rpc { method, code, message } => {
            assert_eq!(method, "signatureSubscribe");
            assert_eq!(code, -32602);
            assert_eq!(message, "Invalid signature");
        }
        other => panic!("unexpected error {other:?}"),
    }
    // A rejected subscription has nothing to cancel.
    tokio::task::yield_now().await;
    assert_eq!(opener.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn switching_network_while_the_socket_opens_subscribes_on_the_new_cluster() {
    let (client, opener) = answering_client(AnsweringOpener {
        gate: Some(Gate::default()),
        ..AnsweringOpener::default()
    });
    let gate = opener.gate.as_ref().unwrap();

    let watching = tokio::spawn({
        let client = client.clone();
        async move { client.watch_transaction(&Signature::new_unique()).await }
    });
    gate.started.notified().await;
    client.switch_network(Cluster::testnet());
    gate.release.notify_one();
    let _first = watching.await.unwrap().unwrap().unwrap();

    assert_eq!(
        *opener.opened.lock().unwrap(),
        vec![
            "wss://api.devnet.solana.com".to_string(),
            "wss://api.testnet.solana.com".to_string(),
        ]
    );
    assert_eq!(
        *opener.requests.lock().unwrap(),
        vec![(
            "wss://api.testnet.solana.com".to_string(),
            "signatureSubscribe".to_string()
        )]
    );

    // The next subscription reuses the testnet socket.
    let _second = client
        .watch_transaction(&Signature::new_unique())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opener.opened.lock().unwrap().len(), 2);
    assert!(opener
        .requests
        .lock()
        .unwrap()
        .iter()
        .all(|(url, _)| url == "wss://api.testnet.solana.com"));
}

#[tokio::test]
async fn unknown_connector_id_keeps_the_previous_one() {
    let registry = Arc::new(ProviderRegistry::new());
    let (client, _, _) = client(vec![
        MockConnector::new().into(),
        InjectedConnector::new("phantom", registry).into(),
    ]);
    client.set_active_connector("injected-phantom").unwrap();

    let err = client.set_active_connector("walletconnect").unwrap_err();
    assert!(matches!(err, ConnectorError::UnknownConnector(_)));
    assert_eq!(client.store().active_connector_id(), "injected-phantom");
}

#[tokio::test]
async fn switching_network_moves_requests_and_notifies() {
    let (client, _, _) = client(vec![MockConnector::new().into()]);
    let mut network = client.watch_network();

    client.switch_network(Cluster::testnet());
    network.changed().await.unwrap();
    assert_eq!(network.borrow().name, "testnet");
    assert_eq!(client.network().endpoint, "https://api.testnet.solana.com");
}

#[tokio::test]
async fn fee_for_message_builds_a_fresh_transaction() {
    let (client, http, _) = client(vec![MockConnector::new().into()]);
    http.set(
        "getLatestBlockhash",
        json!({ "value": { "blockhash": Hash::new_unique().to_string(), "lastValidBlockHeight": 1 } }),
    );
    http.set("getFeeForMessage", json!({ "context": { "slot": 1 }, "value": 5000 }));
    client.connect().await.unwrap();

    let intent = TransactionIntent::Transfer(TransferArgs {
        to: Pubkey::new_unique(),
        amount_in_lamports: 10,
        fee_payer: FeePayer::From,
    });
    assert_eq!(client.get_fee_for_message(&intent).await.unwrap(), Some(5000));
    assert_eq!(http.calls("getLatestBlockhash").len(), 1);
}

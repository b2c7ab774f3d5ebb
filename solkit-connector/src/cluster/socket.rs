//! # Subscription Socket
//!
//! One persistent WebSocket carries every push subscription. A background
//! [`Router`] owns the socket's read half and all subscription bookkeeping;
//! the rest of the crate talks to it through the clonable [`ClusterSocket`]
//! handle.
//!
//! ## Identifier spaces
//! A subscribe call is sent with a client-chosen request id, but the cluster
//! pushes notifications tagged with the subscription id it assigned in its
//! ack. The router keeps registrations keyed by request id and fills in the
//! `subscription id -> request id` mapping when the ack arrives.
//!
//! Notifications that arrive before their ack are held in a bounded buffer and
//! replayed once the mapping is known, instead of being dropped.
//!
//! ## Acks
//! A subscribe call resolves on the cluster's answer: the assigned
//! subscription id, or the rejection as [`ConnectorError::Rpc`]. An
//! unsubscribe that reaches the router before the ack is held on the
//! registration and sent as soon as the subscription id is known.

use super::{subscription::SubscribeMethod, RpcErrorObject};
use crate::{
    config::ChannelConfig,
    error::{ConnectorError, Result},
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Opens the raw text socket used for subscriptions.
///
/// Implementations resolve only once the connection is open and hand back a
/// writer queue and a reader queue of text frames.
#[async_trait]
pub trait SocketOpener: Send + Sync {
    async fn open(
        &self,
        url: &str,
        buffer: usize,
    ) -> Result<(mpsc::Sender<String>, mpsc::Receiver<String>)>;
}

/// The default [`SocketOpener`], backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteOpener;

#[async_trait]
impl SocketOpener for TungsteniteOpener {
    async fn open(
        &self,
        url: &str,
        buffer: usize,
    ) -> Result<(mpsc::Sender<String>, mpsc::Receiver<String>)> {
        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(buffer);
        let (in_tx, in_rx) = mpsc::channel::<String>(buffer);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!("Cluster socket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Cluster socket read failed: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("Cluster socket reader finished.");
        });

        Ok((out_tx, in_rx))
    }
}

/// Commands accepted by the [`Router`] task.
#[derive(Debug)]
enum RouterCommand {
    Subscribe {
        request_id: u64,
        method: SubscribeMethod,
        payload: String,
        sink: mpsc::Sender<Value>,
        reply: oneshot::Sender<Result<u64>>,
    },
    Unsubscribe {
        request_id: u64,
        unsubscribe_id: u64,
    },
}

/// A clonable handle to the shared subscription socket.
#[derive(Debug, Clone)]
pub struct ClusterSocket {
    command_tx: mpsc::Sender<RouterCommand>,
}

impl ClusterSocket {
    /// Starts a router over an already open socket.
    pub(crate) fn spawn(
        outgoing: mpsc::Sender<String>,
        incoming: mpsc::Receiver<String>,
        channels: &ChannelConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(channels.router_command_buffer);
        let router = Router {
            registrations: HashMap::new(),
            subscriptions: HashMap::new(),
            early: VecDeque::new(),
            early_capacity: channels.early_notification_buffer,
            outgoing,
            incoming,
            command_rx,
        };
        tokio::spawn(router.run());
        Self { command_tx }
    }

    /// `true` once the router has stopped (socket closed or failed).
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Registers `sink` under `request_id`, writes the subscribe request and
    /// waits for the cluster's answer. Returns the assigned subscription id.
    pub(crate) async fn subscribe(
        &self,
        request_id: u64,
        method: SubscribeMethod,
        payload: String,
        sink: mpsc::Sender<Value>,
    ) -> Result<u64> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(RouterCommand::Subscribe {
                request_id,
                method,
                payload,
                sink,
                reply,
            })
            .await
            .map_err(|_| ConnectorError::SocketClosed)?;
        response.await.map_err(|_| ConnectorError::SocketClosed)?
    }

    pub(crate) async fn unsubscribe(&self, request_id: u64, unsubscribe_id: u64) -> Result<()> {
        self.command_tx
            .send(RouterCommand::Unsubscribe {
                request_id,
                unsubscribe_id,
            })
            .await
            .map_err(|_| ConnectorError::SocketClosed)
    }

    /// Non-async variant of [`Self::unsubscribe`] for use from `Drop`.
    pub(crate) fn try_unsubscribe(&self, request_id: u64, unsubscribe_id: u64) -> Result<()> {
        self.command_tx
            .try_send(RouterCommand::Unsubscribe {
                request_id,
                unsubscribe_id,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => ConnectorError::Socket("router queue is full".to_string()),
                TrySendError::Closed(_) => ConnectorError::SocketClosed,
            })
    }
}

struct Registration {
    method: SubscribeMethod,
    sink: mpsc::Sender<Value>,
    subscription_id: Option<u64>,
    /// Answered once, on the ack or the rejection.
    reply: Option<oneshot::Sender<Result<u64>>>,
    /// Request id of an unsubscribe issued before the ack.
    deferred_unsubscribe: Option<u64>,
}

/// An inbound frame: either a response (`id` + `result`/`error`) or a
/// notification (`params.subscription` + `params.result`).
#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: u64,
    #[serde(default)]
    result: Value,
}

/// The background task that owns all subscription state for one socket.
struct Router {
    /// Keyed by the request id of the subscribe call.
    registrations: HashMap<u64, Registration>,
    /// Server subscription id -> request id, filled on ack.
    subscriptions: HashMap<u64, u64>,
    /// Notifications whose subscription id is not mapped yet.
    early: VecDeque<(u64, Value)>,
    early_capacity: usize,
    outgoing: mpsc::Sender<String>,
    incoming: mpsc::Receiver<String>,
    command_rx: mpsc::Receiver<RouterCommand>,
}

impl Router {
    async fn run(mut self) {
        tracing::info!("Socket router started.");
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("All socket handles dropped. Router shutting down.");
                        break;
                    }
                },
                message = self.incoming.recv() => match message {
                    Some(text) => self.handle_message(&text).await,
                    None => {
                        tracing::warn!("Cluster socket closed. Router shutting down.");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_command(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Subscribe {
                request_id,
                method,
                payload,
                sink,
                reply,
            } => {
                if self.outgoing.send(payload).await.is_err() {
                    let _ = reply.send(Err(ConnectorError::SocketClosed));
                    return;
                }
                self.registrations.insert(
                    request_id,
                    Registration {
                        method,
                        sink,
                        subscription_id: None,
                        reply: Some(reply),
                        deferred_unsubscribe: None,
                    },
                );
            }
            RouterCommand::Unsubscribe {
                request_id,
                unsubscribe_id,
            } => {
                let Some(registration) = self.registrations.get_mut(&request_id) else {
                    tracing::debug!("Unsubscribe for unknown request {}, ignoring", request_id);
                    return;
                };
                match registration.subscription_id {
                    Some(subscription_id) => {
                        let method = registration.method;
                        self.registrations.remove(&request_id);
                        self.subscriptions.remove(&subscription_id);
                        self.send_unsubscribe(method, subscription_id, unsubscribe_id)
                            .await;
                    }
                    None => {
                        tracing::debug!(
                            "Request {} cancelled before its ack; unsubscribing once acknowledged",
                            request_id
                        );
                        registration.reply = None;
                        registration.deferred_unsubscribe = Some(unsubscribe_id);
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let inbound: Inbound = match serde_json::from_str(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Discarding malformed socket message: {}", e);
                return;
            }
        };

        if let Some(id) = inbound.id {
            self.handle_response(id, inbound.result, inbound.error).await;
        }

        if let Some(params) = inbound.params {
            match self.subscriptions.get(&params.subscription) {
                Some(&request_id) => self.deliver(request_id, params.result),
                None => self.hold_early(params.subscription, params.result),
            }
        }
    }

    async fn handle_response(&mut self, id: u64, result: Option<Value>, error: Option<Value>) {
        let Some(registration) = self.registrations.get_mut(&id) else {
            // Unsubscribe acks and anything else we did not ask to track.
            tracing::trace!("Socket response for untracked request {}", id);
            return;
        };
        if registration.subscription_id.is_some() {
            return;
        }
        let method = registration.method;
        let reply = registration.reply.take();

        let Some(subscription_id) = result.as_ref().and_then(Value::as_u64) else {
            let rejection = rejection(method, error);
            tracing::warn!(
                method = method.as_str(),
                request_id = id,
                "Subscribe rejected by cluster: {}",
                rejection
            );
            // Dropping the sink ends the subscriber's stream.
            self.registrations.remove(&id);
            if let Some(reply) = reply {
                let _ = reply.send(Err(rejection));
            }
            return;
        };

        if let Some(unsubscribe_id) = registration.deferred_unsubscribe {
            self.registrations.remove(&id);
            self.early.retain(|(sub, _)| *sub != subscription_id);
            self.send_unsubscribe(method, subscription_id, unsubscribe_id)
                .await;
            return;
        }

        tracing::debug!(
            method = method.as_str(),
            request_id = id,
            subscription_id,
            "Subscription acknowledged"
        );
        registration.subscription_id = Some(subscription_id);
        self.subscriptions.insert(subscription_id, id);
        if let Some(reply) = reply {
            let _ = reply.send(Ok(subscription_id));
        }
        self.replay_early(subscription_id, id);
    }

    fn deliver(&mut self, request_id: u64, value: Value) {
        let Some(registration) = self.registrations.get(&request_id) else {
            return;
        };
        match registration.sink.try_send(value) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::warn!(
                method = registration.method.as_str(),
                request_id,
                "Subscriber queue full, dropping notification"
            ),
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(request_id, "Subscriber gone, dropping notification")
            }
        }
    }

    fn hold_early(&mut self, subscription_id: u64, value: Value) {
        if self.early_capacity == 0 {
            tracing::warn!(subscription_id, "Dropping notification for unmapped subscription");
            return;
        }
        if self.early.len() == self.early_capacity {
            if let Some((dropped, _)) = self.early.pop_front() {
                tracing::warn!(
                    subscription_id = dropped,
                    "Early notification buffer full, dropping oldest"
                );
            }
        }
        self.early.push_back((subscription_id, value));
    }

    fn replay_early(&mut self, subscription_id: u64, request_id: u64) {
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.early)
            .into_iter()
            .partition(|(sub, _)| *sub == subscription_id);
        self.early = rest;
        for (_, value) in matching {
            self.deliver(request_id, value);
        }
    }

    async fn send_unsubscribe(
        &mut self,
        method: SubscribeMethod,
        subscription_id: u64,
        unsubscribe_id: u64,
    ) {
        let unsubscribe_method = method.unsubscribe_method();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": unsubscribe_id,
            "method": unsubscribe_method,
            "params": [subscription_id],
        })
        .to_string();
        tracing::debug!(method = %unsubscribe_method, subscription_id, "Unsubscribing");
        if self.outgoing.send(payload).await.is_err() {
            tracing::warn!(subscription_id, "Socket closed before unsubscribe could be sent");
        }
    }
}

/// Turns the `error` object of a rejected subscribe into a typed error.
fn rejection(method: SubscribeMethod, error: Option<Value>) -> ConnectorError {
    let error: RpcErrorObject = error
        .and_then(|e| serde_json::from_value(e).ok())
        .unwrap_or_default();
    ConnectorError::Rpc {
        method: method.as_str().to_string(),
        code: error.code,
        message: if error.message.is_empty() {
            "subscribe rejected without a result".to_string()
        } else {
            error.message
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    struct Harness {
        socket: ClusterSocket,
        from_client: mpsc::Receiver<String>,
        to_client: mpsc::Sender<String>,
    }

    fn harness(early_notification_buffer: usize) -> Harness {
        let (outgoing, from_client) = mpsc::channel(16);
        let (to_client, incoming) = mpsc::channel(16);
        let channels = ChannelConfig {
            early_notification_buffer,
            ..ChannelConfig::default()
        };
        Harness {
            socket: ClusterSocket::spawn(outgoing, incoming, &channels),
            from_client,
            to_client,
        }
    }

    impl Harness {
        /// Starts a subscribe and waits until its request is on the wire.
        async fn subscribe(&mut self, request_id: u64) -> (JoinHandle<Result<u64>>, mpsc::Receiver<Value>) {
            let (sink, rx) = mpsc::channel(8);
            let payload = json!({ "id": request_id, "method": "signatureSubscribe" }).to_string();
            let socket = self.socket.clone();
            let pending = tokio::spawn(async move {
                socket
                    .subscribe(request_id, SubscribeMethod::Signature, payload, sink)
                    .await
            });
            assert_eq!(self.next_sent().await["id"], request_id);
            (pending, rx)
        }

        async fn push(&self, value: Value) {
            self.to_client.send(value.to_string()).await.unwrap();
        }

        async fn next_sent(&mut self) -> Value {
            serde_json::from_str(&self.from_client.recv().await.unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn routes_notification_by_subscription_id() {
        let mut h = harness(8);
        let (pending, mut rx) = h.subscribe(5).await;

        h.push(json!({ "jsonrpc": "2.0", "id": 5, "result": 900 })).await;
        assert_eq!(pending.await.unwrap().unwrap(), 900);
        h.push(json!({
            "jsonrpc": "2.0",
            "method": "signatureNotification",
            "params": { "subscription": 900, "result": { "value": { "err": null } } }
        }))
        .await;

        let got = rx.recv().await.unwrap();
        assert_eq!(got, json!({ "value": { "err": null } }));
    }

    #[tokio::test]
    async fn early_notification_is_replayed_after_ack() {
        let mut h = harness(8);
        let (pending, mut rx) = h.subscribe(1).await;

        h.push(json!({ "params": { "subscription": 77, "result": "first" } }))
            .await;
        h.push(json!({ "id": 1, "result": 77 })).await;
        h.push(json!({ "params": { "subscription": 77, "result": "second" } }))
            .await;

        assert_eq!(pending.await.unwrap().unwrap(), 77);
        assert_eq!(rx.recv().await.unwrap(), json!("first"));
        assert_eq!(rx.recv().await.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn unknown_subscription_is_dropped_without_buffer() {
        let mut h = harness(0);
        let (_pending, mut rx) = h.subscribe(1).await;

        h.push(json!({ "params": { "subscription": 3, "result": "lost" } }))
            .await;
        h.push(json!({ "id": 1, "result": 3 })).await;
        h.push(json!({ "params": { "subscription": 3, "result": "kept" } }))
            .await;

        assert_eq!(rx.recv().await.unwrap(), json!("kept"));
    }

    #[tokio::test]
    async fn unsubscribe_uses_server_subscription_id() {
        let mut h = harness(8);
        let (pending, _rx) = h.subscribe(2).await;
        h.push(json!({ "id": 2, "result": 41 })).await;
        pending.await.unwrap().unwrap();

        h.socket.unsubscribe(2, 3).await.unwrap();
        let sent = h.next_sent().await;
        assert_eq!(sent["method"], "signatureUnsubscribe");
        assert_eq!(sent["params"], json!([41]));
        assert_eq!(sent["id"], 3);
    }

    #[tokio::test]
    async fn unsubscribe_before_ack_is_deferred() {
        let mut h = harness(8);
        let (pending, mut rx) = h.subscribe(10).await;

        h.socket.unsubscribe(10, 11).await.unwrap();
        h.push(json!({ "id": 10, "result": 500 })).await;

        let sent = h.next_sent().await;
        assert_eq!(sent["method"], "signatureUnsubscribe");
        assert_eq!(sent["params"], json!([500]));
        assert_eq!(sent["id"], 11);
        assert!(rx.recv().await.is_none());
        assert!(matches!(pending.await.unwrap(), Err(ConnectorError::SocketClosed)));
    }

    #[tokio::test]
    async fn rejected_subscribe_returns_the_cluster_error() {
        let mut h = harness(8);
        let (pending, mut rx) = h.subscribe(4).await;

        h.push(json!({ "id": 4, "error": { "code": -32602, "message": "Invalid params" } }))
            .await;
        match pending.await.unwrap() {
            Err(ConnectorError::Rpc { method, code, message }) => {
                assert_eq!(method, "signatureSubscribe");
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid params");
            }
            other => panic!("unexpected subscribe outcome {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_socket_fails_pending_subscribes() {
        let mut h = harness(8);
        let (pending, _rx) = h.subscribe(6).await;
        let Harness { socket, to_client, from_client } = h;
        drop(to_client);
        drop(from_client);

        assert!(matches!(pending.await.unwrap(), Err(ConnectorError::SocketClosed)));
        for _ in 0..50 {
            if socket.is_closed() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("router kept running after its socket closed");
    }
}

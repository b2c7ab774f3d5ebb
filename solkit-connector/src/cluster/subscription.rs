use super::socket::ClusterSocket;
use crate::{error::Result, store::Store};
use serde_json::Value;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream};

/// The push subscription methods the cluster layer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeMethod {
    Account,
    Logs,
    Program,
    Signature,
    Slot,
    Root,
}

impl SubscribeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscribeMethod::Account => "accountSubscribe",
            SubscribeMethod::Logs => "logsSubscribe",
            SubscribeMethod::Program => "programSubscribe",
            SubscribeMethod::Signature => "signatureSubscribe",
            SubscribeMethod::Slot => "slotSubscribe",
            SubscribeMethod::Root => "rootSubscribe",
        }
    }

    /// `xSubscribe` -> `xUnsubscribe`.
    pub fn unsubscribe_method(&self) -> String {
        self.as_str().replace("Subscribe", "Unsubscribe")
    }
}

impl std::fmt::Display for SubscribeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct UnsubscribeInner {
    request_id: u64,
    method: SubscribeMethod,
    socket: ClusterSocket,
    store: Arc<Store>,
    done: AtomicBool,
}

impl UnsubscribeInner {
    /// Claims the one-and-only unsubscribe. Returns `false` if already claimed.
    fn claim(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }
}

impl Drop for UnsubscribeInner {
    fn drop(&mut self) {
        if !self.claim() {
            return;
        }
        let unsubscribe_id = self.store.next_request_id();
        if let Err(e) = self.socket.try_unsubscribe(self.request_id, unsubscribe_id) {
            tracing::warn!(
                method = %self.method,
                request_id = self.request_id,
                "Failed to unsubscribe on drop: {}",
                e
            );
        }
    }
}

/// A clonable cancellation handle for one subscription.
///
/// The `*Unsubscribe` request is sent at most once, no matter how many clones
/// call [`Unsubscribe::unsubscribe`] or how often. When the last handle is
/// dropped without having been called, the subscription is cancelled anyway.
#[derive(Clone)]
pub struct Unsubscribe {
    inner: Arc<UnsubscribeInner>,
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("request_id", &self.inner.request_id)
            .field("method", &self.inner.method)
            .field("done", &self.is_done())
            .finish()
    }
}

impl Unsubscribe {
    pub(crate) fn new(
        request_id: u64,
        method: SubscribeMethod,
        socket: ClusterSocket,
        store: Arc<Store>,
    ) -> Self {
        Self {
            inner: Arc::new(UnsubscribeInner {
                request_id,
                method,
                socket,
                store,
                done: AtomicBool::new(false),
            }),
        }
    }

    /// Cancels the subscription. Calling it again, or after the notification
    /// already fired, is a no-op.
    pub async fn unsubscribe(&self) -> Result<()> {
        if !self.inner.claim() {
            return Ok(());
        }
        let unsubscribe_id = self.inner.store.next_request_id();
        self.inner
            .socket
            .unsubscribe(self.inner.request_id, unsubscribe_id)
            .await
    }

    /// Marks the handle as spent without sending anything, for a subscribe
    /// the cluster never accepted.
    pub(crate) fn disarm(&self) {
        self.inner.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }
}

/// A live push subscription. Each item is a notification's `params.result`.
///
/// The stream ends when the subscription is cancelled or the socket closes.
#[derive(Debug)]
pub struct Subscription {
    notifications: mpsc::Receiver<Value>,
    unsubscribe: Unsubscribe,
}

impl Subscription {
    pub(crate) fn new(notifications: mpsc::Receiver<Value>, unsubscribe: Unsubscribe) -> Self {
        Self {
            notifications,
            unsubscribe,
        }
    }

    pub async fn next(&mut self) -> Option<Value> {
        self.notifications.recv().await
    }

    pub fn request_id(&self) -> u64 {
        self.unsubscribe.request_id()
    }

    pub fn unsubscriber(&self) -> Unsubscribe {
        self.unsubscribe.clone()
    }

    pub async fn unsubscribe(self) -> Result<()> {
        self.unsubscribe.unsubscribe().await
    }

    pub fn into_stream(self) -> SubscriptionStream {
        SubscriptionStream {
            inner: ReceiverStream::new(self.notifications),
            _unsubscribe: self.unsubscribe,
        }
    }

    /// Runs `callback` for every notification on a dedicated task.
    ///
    /// The task keeps the subscription alive until the returned handle (or any
    /// clone) is used to unsubscribe, or the socket goes away.
    pub fn on_notification<F>(mut self, mut callback: F) -> Unsubscribe
    where
        F: FnMut(Value) + Send + 'static,
    {
        let handle = self.unsubscribe.clone();
        tokio::spawn(async move {
            while let Some(value) = self.next().await {
                callback(value);
            }
            tracing::debug!(request_id = self.request_id(), "Notification task finished");
        });
        handle
    }
}

/// [`Subscription`] as a [`Stream`]. Dropping it cancels the subscription.
#[derive(Debug)]
pub struct SubscriptionStream {
    inner: ReceiverStream<Value>,
    _unsubscribe: Unsubscribe,
}

impl Stream for SubscriptionStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

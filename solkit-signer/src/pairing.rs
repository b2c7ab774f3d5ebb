use crate::{error::SignerError, keys::Handle, remote::RemoteSigner};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use solkit_connector::{
    connectors::{
        PairingTransport, PendingSession, RemoteRequest, Session, SessionProposal,
        SIGN_MESSAGE_METHOD, SIGN_TRANSACTION_METHOD,
    },
    ConnectorError, Result,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex, PoisonError,
};

/// A [`PairingTransport`] that pairs with a [`RemoteSigner`] in the same process.
///
/// Each proposal is approved for a single account. The last approved session
/// survives `connect` calls and is handed back by `restore_session` until it
/// is disconnected.
pub struct LocalPairing {
    signer: RemoteSigner,
    account: Handle,
    approve: AtomicBool,
    next_topic: AtomicU64,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for LocalPairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPairing")
            .field("account", &self.account)
            .field("session", &self.current())
            .finish()
    }
}

impl LocalPairing {
    /// Pairs with `signer`, approving sessions for the key behind `account`.
    pub fn new(signer: RemoteSigner, account: Handle) -> Self {
        Self {
            signer,
            account,
            approve: AtomicBool::new(true),
            next_topic: AtomicU64::new(1),
            session: Mutex::new(None),
        }
    }

    /// Whether future proposals are approved or rejected.
    pub fn set_approve(&self, approve: bool) {
        self.approve.store(approve, Ordering::Release);
    }

    pub fn current(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn approve_proposal(&self, proposal: &SessionProposal) -> std::result::Result<Session, SignerError> {
        if !self.approve.load(Ordering::Acquire) {
            return Err(SignerError::Rejected("user declined".to_string()));
        }
        for method in &proposal.methods {
            if method != SIGN_MESSAGE_METHOD && method != SIGN_TRANSACTION_METHOD {
                return Err(SignerError::Rejected(format!("unsupported method '{method}'")));
            }
        }
        let chain = proposal
            .chains
            .first()
            .ok_or_else(|| SignerError::Rejected("no chain requested".to_string()))?;
        let pubkey = self.signer.keys().public_key(self.account)?;
        let topic = format!("{:016x}", self.next_topic.fetch_add(1, Ordering::Relaxed));

        Ok(Session {
            topic,
            accounts: vec![format!("{chain}:{pubkey}")],
        })
    }
}

#[async_trait]
impl PairingTransport for LocalPairing {
    async fn restore_session(&self) -> Result<Option<Session>> {
        Ok(self.current())
    }

    async fn connect(&self, proposal: SessionProposal) -> Result<PendingSession> {
        let approved = self.approve_proposal(&proposal);
        let uri = match &approved {
            Ok(session) => format!("solkit:{}@local", session.topic),
            Err(_) => "solkit:rejected@local".to_string(),
        };
        if let Ok(session) = &approved {
            tracing::info!(topic = %session.topic, "Local pairing approved");
            self.set_current(Some(session.clone()));
        }
        let approval = approved.map_err(ConnectorError::from);
        Ok(PendingSession {
            uri,
            approval: async move { approval }.boxed(),
        })
    }

    async fn request(&self, session: &Session, request: RemoteRequest) -> Result<Value> {
        let current = self
            .current()
            .filter(|current| current.topic == session.topic)
            .ok_or_else(|| SignerError::UnknownSession(session.topic.clone()))?;
        let response = self.signer.handle(&current, &request)?;
        Ok(serde_json::to_value(response)?)
    }

    async fn disconnect(&self, session: &Session) -> Result<()> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().is_some_and(|s| s.topic == session.topic) {
            *guard = None;
            tracing::info!(topic = %session.topic, "Local pairing closed");
        }
        Ok(())
    }
}

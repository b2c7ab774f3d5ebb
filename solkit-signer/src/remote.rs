use crate::{error::SignerError, keys::KeyTable};
use solana_sdk::pubkey::Pubkey;
use solkit_connector::connectors::{
    RemoteRequest, Session, SignatureResponse, TransactionDraft,
};
use std::{str::FromStr, sync::Arc};

/// Answers signing requests arriving over a pairing session.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    keys: Arc<KeyTable>,
}

impl RemoteSigner {
    pub fn new(keys: Arc<KeyTable>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyTable> {
        &self.keys
    }

    /// Produces a detached signature for `request`.
    ///
    /// Only accounts listed in `session` are ever used for signing.
    pub fn handle(
        &self,
        session: &Session,
        request: &RemoteRequest,
    ) -> Result<SignatureResponse, SignerError> {
        let (signer, payload) = match request {
            RemoteRequest::SignMessage(params) => {
                let signer = Pubkey::from_str(&params.pubkey)
                    .map_err(|_| SignerError::Malformed(format!("pubkey '{}'", params.pubkey)))?;
                let message = bs58::decode(&params.message)
                    .into_vec()
                    .map_err(|e| SignerError::Malformed(format!("message: {e}")))?;
                (signer, message)
            }
            RemoteRequest::SignTransaction(wire) => {
                let draft = TransactionDraft::try_from(wire)
                    .map_err(|e| SignerError::Malformed(e.to_string()))?;
                let message = draft.message();
                let required = usize::from(message.header.num_required_signatures);
                let signer = message.account_keys[..required]
                    .iter()
                    .find(|key| in_session(session, key) && self.keys.find(key).is_some())
                    .copied()
                    .ok_or_else(|| {
                        SignerError::Malformed("no session account signs this transaction".to_string())
                    })?;
                (signer, message.serialize())
            }
        };

        if !in_session(session, &signer) {
            return Err(SignerError::NotInSession(signer));
        }
        let handle = self
            .keys
            .find(&signer)
            .ok_or(SignerError::KeyNotLoaded(signer))?;
        let signature = self.keys.sign(handle, &payload)?;
        tracing::debug!(method = request.method(), %signer, "Signed remote request");

        Ok(SignatureResponse {
            signature: signature.to_string(),
        })
    }
}

fn in_session(session: &Session, key: &Pubkey) -> bool {
    let key = key.to_string();
    session
        .accounts
        .iter()
        .any(|account| account.rsplit(':').next() == Some(key.as_str()))
}

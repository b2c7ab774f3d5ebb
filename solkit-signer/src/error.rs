use solana_sdk::pubkey::Pubkey;
use solkit_connector::ConnectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid handle {0}")]
    InvalidHandle(u64),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("no key loaded for {0}")]
    KeyNotLoaded(Pubkey),

    #[error("{0} is not part of the session")]
    NotInSession(Pubkey),

    #[error("unknown or closed session '{0}'")]
    UnknownSession(String),

    #[error("session proposal rejected: {0}")]
    Rejected(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<SignerError> for ConnectorError {
    fn from(err: SignerError) -> Self {
        ConnectorError::Pairing(err.to_string())
    }
}

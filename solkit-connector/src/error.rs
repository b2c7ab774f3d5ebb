use thiserror::Error;

/// Errors surfaced by the connector, the cluster layer and the store.
///
/// "Did not run" is never an error: an action against an unavailable
/// connector resolves to `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("no address connected")]
    NoAddress,

    #[error("unsupported transaction type '{0}'")]
    UnsupportedTransactionType(String),

    #[error("unknown connector '{0}'")]
    UnknownConnector(String),

    #[error("store requires at least one connector")]
    NoConnectors,

    #[error("signature invalid")]
    InvalidSignature,

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid cluster endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("cluster call '{method}' failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("http transport error: {0}")]
    Http(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("socket is closed")]
    SocketClosed,

    #[error("wallet provider error: {0}")]
    Provider(String),

    #[error("wallet provider '{0}' is not available")]
    ProviderUnavailable(String),

    #[error("pairing error: {0}")]
    Pairing(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no name found")]
    NameNotFound,
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        ConnectorError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectorError::Socket(err.to_string())
    }
}

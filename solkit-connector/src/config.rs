use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentLevel;

use crate::error::{ConnectorError, Result};

/// The top-level configuration for the `solkit-connector` library.
///
/// It is typically deserialized from a configuration file and handed to
/// [`crate::actions::Client::new`] together with the registered connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    #[serde(default)]
    pub cluster: Cluster,
    #[serde(default = "default_commitment", with = "serde_commitment")]
    pub commitment: CommitmentLevel,
    /// Identity of the connector that actions are routed to. Defaults to the
    /// first registered connector.
    #[serde(default)]
    pub active_connector: Option<String>,
    #[serde(default)]
    pub channels: ChannelConfig,
}

/// A blockchain network endpoint this library talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub name: String,
    /// Chain identifier used in pairing namespaces (`solana:<id>`).
    pub id: String,
    /// HTTP JSON-RPC endpoint.
    pub endpoint: String,
    /// Explicit WebSocket endpoint. Derived from `endpoint` when absent.
    #[serde(default)]
    pub ws_endpoint: Option<String>,
}

/// Defines capacities for the MPSC channels of the subscription socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    /// Buffer capacity of each subscription's notification queue.
    pub subscription_buffer: usize,
    /// Maximum number of notifications held while waiting for a subscribe ack.
    pub early_notification_buffer: usize,
    /// Buffer capacity for the command channel to the socket router.
    pub router_command_buffer: usize,
    /// Buffer capacity of the raw socket read/write queues.
    pub socket_buffer: usize,
}

impl Cluster {
    pub fn mainnet_beta() -> Self {
        Self {
            name: "mainnet-beta".to_string(),
            id: "4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZ".to_string(),
            endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            ws_endpoint: None,
        }
    }

    pub fn testnet() -> Self {
        Self {
            name: "testnet".to_string(),
            id: "4uhcVJyU9pJkvQyS88uRDiswHXSCkY3z".to_string(),
            endpoint: "https://api.testnet.solana.com".to_string(),
            ws_endpoint: None,
        }
    }

    pub fn devnet() -> Self {
        Self {
            name: "devnet".to_string(),
            id: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1".to_string(),
            endpoint: "https://api.devnet.solana.com".to_string(),
            ws_endpoint: None,
        }
    }

    /// A local test validator. Its pubsub port is the RPC port plus one.
    pub fn localnet() -> Self {
        Self {
            name: "localnet".to_string(),
            id: "localnet".to_string(),
            endpoint: "http://127.0.0.1:8899".to_string(),
            ws_endpoint: Some("ws://127.0.0.1:8900".to_string()),
        }
    }

    /// Looks up one of the well-known clusters by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "mainnet-beta" | "mainnetBeta" | "mainnet" => Some(Self::mainnet_beta()),
            "testnet" => Some(Self::testnet()),
            "devnet" => Some(Self::devnet()),
            "localnet" | "localhost" => Some(Self::localnet()),
            _ => None,
        }
    }

    /// The WebSocket URL used for subscriptions.
    pub fn websocket_url(&self) -> Result<String> {
        if let Some(ws) = &self.ws_endpoint {
            return Ok(ws.clone());
        }
        if let Some(rest) = self.endpoint.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else {
            Err(ConnectorError::InvalidEndpoint(self.endpoint.clone()))
        }
    }
}

fn default_commitment() -> CommitmentLevel {
    CommitmentLevel::Confirmed
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            cluster: Cluster::default(),
            commitment: default_commitment(),
            active_connector: None,
            channels: ChannelConfig::default(),
        }
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::devnet()
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: 64,
            early_notification_buffer: 128,
            router_command_buffer: 128,
            socket_buffer: 256,
        }
    }
}

/// Wire name of a commitment level, as the cluster expects it in request configs.
pub(crate) fn commitment_str(c: CommitmentLevel) -> &'static str {
    match c {
        CommitmentLevel::Processed => "processed",
        CommitmentLevel::Confirmed => "confirmed",
        CommitmentLevel::Finalized => "finalized",
    }
}

mod serde_commitment {

    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(c: &CommitmentLevel, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(commitment_str(*c))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<CommitmentLevel, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "processed" => CommitmentLevel::Processed,
            "confirmed" => CommitmentLevel::Confirmed,
            "finalized" => CommitmentLevel::Finalized,
            _ => CommitmentLevel::Confirmed,
        };
        Ok(level)
    }
}

//! A client-side toolkit for talking to a Solana cluster through a pluggable wallet.
//!
//! Applications build a [`Client`] from a [`ConnectorConfig`] and a list of
//! connectors, then call actions on it without caring which wallet backend or
//! transport is behind them.
//!
//! # Key Components
//!
//! *   [`store`]: The shared state (connectors, cluster, connected address) with change notification.
//! *   [`cluster`]: JSON-RPC over HTTP plus push subscriptions over one shared WebSocket.
//! *   [`connectors`]: The [`Connector`] enum (injected provider, pairing, mock) and
//!     transaction construction.
//! *   [`actions`]: The [`Client`] façade, gated by [`dispatch::with_connector`].
//! *   [`name_service`]: `.sol` display-name resolution.
pub mod actions;
pub mod cluster;
/// Defines configuration structures for the connector.
pub mod config;
pub mod connectors;
pub mod dispatch;
pub mod error;
pub mod name_service;
pub mod store;

pub use actions::Client;
pub use config::{Cluster, ConnectorConfig};
pub use connectors::{Connector, TransactionIntent};
pub use error::{ConnectorError, Result};

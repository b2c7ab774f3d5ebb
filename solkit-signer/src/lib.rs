//! # Solkit Signer
//!
//! The wallet side of the pairing protocol. Keys are held in an in-memory
//! [`KeyTable`]; a [`RemoteSigner`] answers `solana_signMessage` and
//! `solana_signTransaction` requests with detached signatures, and
//! [`LocalPairing`] wires it to a `PairingConnector` inside the same process.
//!
//! ## Key Features
//!
//! - **Key Hygiene**: secret bytes are zeroized when a key is unloaded or the table is dropped.
//! - **Thread-Safe**: the key table is backed by `DashMap` and can be shared across tasks.
//! - **Session Scoping**: a request is only answered for accounts the session was approved for.

mod error;
pub mod keys;
pub mod pairing;
pub mod remote;

pub use error::SignerError;
pub use keys::{Handle, KeyTable};
pub use pairing::LocalPairing;
pub use remote::RemoteSigner;

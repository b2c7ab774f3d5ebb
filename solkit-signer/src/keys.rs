//! # Key Table
//!
//! An in-memory store of keypairs addressed by opaque numeric handles.
//!
//! ## Memory and Lifetime
//! - Handles stay valid until [`KeyTable::unload`] or [`KeyTable::clear`].
//! - Secret bytes are zeroized when their entry is removed or the table is dropped.
//! - A [`Keypair`] is rebuilt for each signature and never kept around.

use crate::error::SignerError;
use dashmap::DashMap;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::Zeroize;

pub type Handle = u64;

/// Secret key bytes (`[secret || public]`, 64 bytes) with their public key.
struct KeyEntry {
    secret: Vec<u8>,
    pubkey: Pubkey,
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

pub struct KeyTable {
    entries: DashMap<Handle, KeyEntry>,
    next_handle: AtomicU64,
}

impl Default for KeyTable {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl std::fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyTable")
            .field("loaded", &self.entries.len())
            .finish()
    }
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh keypair and loads it.
    pub fn generate(&self) -> Handle {
        let keypair = Keypair::new();
        let mut bytes = keypair.to_bytes();
        let handle = self.insert(bytes.to_vec(), keypair.pubkey());
        bytes.zeroize();
        handle
    }

    /// Loads a 64-byte keypair. The caller keeps ownership of `bytes`.
    pub fn load(&self, bytes: &[u8]) -> Result<Handle, SignerError> {
        let keypair =
            Keypair::try_from(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(self.insert(bytes.to_vec(), keypair.pubkey()))
    }

    fn insert(&self, secret: Vec<u8>, pubkey: Pubkey) -> Handle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(handle, KeyEntry { secret, pubkey });
        tracing::debug!(handle, %pubkey, "Key loaded");
        handle
    }

    pub fn unload(&self, handle: Handle) -> Result<(), SignerError> {
        self.entries
            .remove(&handle)
            .map(|_| ())
            .ok_or(SignerError::InvalidHandle(handle))
    }

    /// Drops every key, zeroizing the secrets.
    pub fn clear(&self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn public_key(&self, handle: Handle) -> Result<Pubkey, SignerError> {
        self.entries
            .get(&handle)
            .map(|entry| entry.pubkey)
            .ok_or(SignerError::InvalidHandle(handle))
    }

    /// The handle holding the key for `pubkey`, if loaded.
    pub fn find(&self, pubkey: &Pubkey) -> Option<Handle> {
        self.entries
            .iter()
            .find(|entry| entry.pubkey == *pubkey)
            .map(|entry| *entry.key())
    }

    pub fn sign(&self, handle: Handle, message: &[u8]) -> Result<Signature, SignerError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(SignerError::InvalidHandle(handle))?;
        let keypair = Keypair::try_from(entry.secret.as_slice())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(keypair.sign_message(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_unload_lifecycle() {
        let table = KeyTable::new();
        let keypair = Keypair::new();
        let handle = table.load(&keypair.to_bytes()).unwrap();
        assert_ne!(handle, 0);
        assert_eq!(table.public_key(handle).unwrap(), keypair.pubkey());
        assert_eq!(table.find(&keypair.pubkey()), Some(handle));

        table.unload(handle).unwrap();
        assert!(matches!(
            table.unload(handle),
            Err(SignerError::InvalidHandle(h)) if h == handle
        ));
        assert!(table.find(&keypair.pubkey()).is_none());
    }

    #[test]
    fn signatures_match_the_keypair() {
        let table = KeyTable::new();
        let keypair = Keypair::new();
        let handle = table.load(&keypair.to_bytes()).unwrap();

        let signature = table.sign(handle, b"payload").unwrap();
        assert_eq!(signature, keypair.sign_message(b"payload"));
    }

    #[test]
    fn rejects_malformed_keys() {
        let table = KeyTable::new();
        assert!(matches!(table.load(&[0u8; 10]), Err(SignerError::InvalidKey(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn handles_are_unique_and_clear_empties_the_table() {
        let table = KeyTable::new();
        let a = table.generate();
        let b = table.generate();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        table.clear();
        assert!(table.is_empty());
        assert!(matches!(table.sign(a, b"x"), Err(SignerError::InvalidHandle(_))));
    }
}

//! # Name Service
//!
//! Resolves `.sol` display names for addresses through the SPL name service.
//!
//! Two lookups are supported: the owner's favorite domain (a record kept by
//! the name-offers program) and the list of `.sol` domains an owner holds.
//! Both end in a reverse lookup that turns a name account into its text.

use crate::{
    cluster::ClusterClient,
    connectors::parse_pubkey,
    error::{ConnectorError, Result},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use borsh::BorshDeserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

pub const HASH_PREFIX: &str = "SPL Name Service";
pub const NAME_OFFERS_ID: Pubkey = solana_sdk::pubkey!("85iDfUvr3HJyLM2zcq5BXSiDvUWfw6cSE1FfNBo8Ap29");
/// The `.sol` top-level domain.
pub const ROOT_DOMAIN_ACCOUNT: Pubkey =
    solana_sdk::pubkey!("58PwtjSDuFHuUkYjH9BYnnQKHfwo9reZhC2zMJv9JPkx");
pub const NAME_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("namesLPneVptA9Z5rqUDD9tMTWEJwofgaYwp8cawRkX");
pub const REVERSE_LOOKUP_CLASS: Pubkey =
    solana_sdk::pubkey!("33m47vH6Eav6jr5Ry86XjhRft2jRBLDnDgPSHoquXi2Z");

const MAX_DOMAINS: usize = 5;

/// Looks up display names for an owner address.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn favorite_domain(&self, owner: &Pubkey) -> Result<String>;

    /// Up to five `.sol` domains held by `owner`.
    async fn domains(&self, owner: &Pubkey) -> Result<Vec<String>>;
}

/// Account tags of the name-offers program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Uninitialized = 0,
    ActiveOffer = 1,
    CancelledOffer = 2,
    AcceptedOffer = 3,
    FavouriteDomain = 4,
    FixedPriceOffer = 5,
    AcceptedFixedPriceOffer = 6,
    CancelledFixedPriceOffer = 7,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshDeserialize)]
pub struct FavouriteDomain {
    pub tag: u8,
    pub name_account: [u8; 32],
}

impl FavouriteDomain {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::deserialize(&mut &data[..])
            .map_err(|e| ConnectorError::Serialization(format!("favourite domain: {e}")))
    }

    pub fn name_account(&self) -> Pubkey {
        Pubkey::new_from_array(self.name_account)
    }

    /// Address of `owner`'s favorite-domain record.
    pub fn key(owner: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[b"favourite_domain".as_ref(), owner.as_ref()], &NAME_OFFERS_ID).0
    }
}

/// The fixed header of every name account, followed by free-form data.
#[derive(Debug, Clone, PartialEq, Eq, BorshDeserialize)]
pub struct NameRegistryHeader {
    pub parent_name: [u8; 32],
    pub owner: [u8; 32],
    pub class: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRegistry {
    pub parent_name: Pubkey,
    pub owner: Pubkey,
    pub class: Pubkey,
    pub data: Vec<u8>,
}

impl NameRegistry {
    pub const HEADER_LEN: usize = 96;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = NameRegistryHeader::deserialize(&mut &data[..])
            .map_err(|e| ConnectorError::Serialization(format!("name registry: {e}")))?;
        Ok(Self {
            parent_name: Pubkey::new_from_array(header.parent_name),
            owner: Pubkey::new_from_array(header.owner),
            class: Pubkey::new_from_array(header.class),
            data: data[Self::HEADER_LEN..].to_vec(),
        })
    }

    /// The name stored in a reverse-lookup record: a u32 LE length followed
    /// by the name bytes.
    pub fn reverse_name(&self) -> Result<String> {
        let too_short = || ConnectorError::Serialization("reverse lookup record too short".to_string());
        let len_bytes: [u8; 4] = self
            .data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(too_short)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let name = self.data.get(4..4 + len).ok_or_else(too_short)?;
        Ok(String::from_utf8_lossy(name).into_owned())
    }
}

pub fn hashed_name(name: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(HASH_PREFIX.as_bytes());
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Derives a name account. Missing class or parent are 32 zero bytes.
pub fn name_account_key(hashed: &[u8; 32], class: Option<&Pubkey>, parent: Option<&Pubkey>) -> Pubkey {
    let zeros = [0u8; 32];
    let class = class.map_or(&zeros[..], |c| c.as_ref());
    let parent = parent.map_or(&zeros[..], |p| p.as_ref());
    Pubkey::find_program_address(&[&hashed[..], class, parent], &NAME_PROGRAM_ID).0
}

/// [`NameResolver`] backed by the active cluster.
#[derive(Debug, Clone)]
pub struct SplNameService {
    cluster: ClusterClient,
}

impl SplNameService {
    pub fn new(cluster: ClusterClient) -> Self {
        Self { cluster }
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        let account = self
            .cluster
            .get_account_info(address, "base64")
            .await?
            .ok_or(ConnectorError::NameNotFound)?;
        decode_account_data(&account)
    }

    /// The `.sol` name a name account resolves to.
    pub async fn reverse_lookup(&self, name_account: &Pubkey) -> Result<String> {
        let hashed = hashed_name(&name_account.to_string());
        let key = name_account_key(&hashed, Some(&REVERSE_LOOKUP_CLASS), None);
        let registry = NameRegistry::parse(&self.account_data(&key).await?)?;
        Ok(format!("{}.sol", registry.reverse_name()?))
    }
}

fn decode_account_data(account: &Value) -> Result<Vec<u8>> {
    let encoded = account["data"][0]
        .as_str()
        .ok_or_else(|| ConnectorError::Serialization("account data is not base64".to_string()))?;
    BASE64
        .decode(encoded)
        .map_err(|e| ConnectorError::Serialization(format!("account data: {e}")))
}

#[async_trait]
impl NameResolver for SplNameService {
    async fn favorite_domain(&self, owner: &Pubkey) -> Result<String> {
        let record = FavouriteDomain::parse(&self.account_data(&FavouriteDomain::key(owner)).await?)?;
        self.reverse_lookup(&record.name_account()).await
    }

    async fn domains(&self, owner: &Pubkey) -> Result<Vec<String>> {
        let accounts = self
            .cluster
            .get_program_accounts(
                &NAME_PROGRAM_ID,
                json!({
                    "encoding": "base64",
                    "filters": [
                        { "memcmp": { "offset": 32, "bytes": owner.to_string() } },
                        { "memcmp": { "offset": 0, "bytes": ROOT_DOMAIN_ACCOUNT.to_string() } },
                    ],
                }),
            )
            .await?;

        let mut names = Vec::new();
        for account in accounts.iter().take(MAX_DOMAINS) {
            let key = parse_pubkey(&account.pubkey)?;
            names.push(self.reverse_lookup(&key).await?);
        }
        Ok(names)
    }
}

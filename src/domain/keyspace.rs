use crate::error::{GatewayError, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Prefix carried by every receiving address.
pub const ACCOUNT_PREFIX: &str = "bcb_";
const CHECKSUM_LEN: usize = 5;
const ACCOUNT_HEX_LEN: usize = (32 + CHECKSUM_LEN) * 2;

/// Master seed all receiving keys are derived from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 32]);

impl Seed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a 64 character hex seed.
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value.trim())
            .map_err(|_| GatewayError::invalid("seed must be hex encoded"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GatewayError::invalid("seed must be exactly 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed(..)")
    }
}

/// Ed25519 public key of a receiving account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex::serde")] [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_account(&self) -> Account {
        let checksum = blake3::hash(&self.0);
        Account(format!(
            "{ACCOUNT_PREFIX}{}{}",
            hex::encode(self.0),
            hex::encode(&checksum.as_bytes()[..CHECKSUM_LEN])
        ))
    }
}

/// A receiving address on the ledger.
///
/// Always holds a well-formed address: construction goes through
/// [`PublicKey::to_account`] or [`Account::parse`], which validates the
/// checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account(String);

impl Account {
    pub fn parse(value: &str) -> Result<Self> {
        let body = value
            .strip_prefix(ACCOUNT_PREFIX)
            .ok_or_else(|| GatewayError::invalid("account has wrong prefix"))?;
        if body.len() != ACCOUNT_HEX_LEN {
            return Err(GatewayError::invalid("account has wrong length"));
        }
        let bytes =
            hex::decode(body).map_err(|_| GatewayError::invalid("account is not hex encoded"))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[..32]);

        let account = PublicKey(key).to_account();
        if account.0 != value {
            return Err(GatewayError::invalid("account checksum mismatch"));
        }
        Ok(account)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Account {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Account {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.0
    }
}

/// Keypair and address derived for one payment index.
pub struct DerivedKey {
    pub public_key: PublicKey,
    pub account: Account,
    pub signing_key: SigningKey,
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Deterministic receiving-key derivation from a master seed.
#[derive(Debug, Clone)]
pub struct KeySpace {
    seed: Seed,
}

impl KeySpace {
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    /// Derives the keypair for `index`.
    ///
    /// The derivation path is 32 bits wide; larger indices are rejected
    /// instead of truncated.
    pub fn derive(&self, index: u64) -> Result<DerivedKey> {
        let index = u32::try_from(index).map_err(|_| {
            GatewayError::invalid(format!("index {index} exceeds the derivation width"))
        })?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.0);
        hasher.update(&index.to_be_bytes());
        let mut secret: [u8; 32] = *hasher.finalize().as_bytes();

        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();

        let public_key = PublicKey(signing_key.verifying_key().to_bytes());
        Ok(DerivedKey {
            account: public_key.to_account(),
            public_key,
            signing_key,
        })
    }
}

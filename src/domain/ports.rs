use super::keyspace::Account;
use super::payment::{Currency, Payment, TerminalOutcome};
use super::transfer::{Cursor, IncomingTransfer};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durable payment records keyed by receiving account.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts or overwrites the record for `payment.account`.
    async fn save(&self, payment: &Payment) -> Result<()>;
    /// Fails with `NotFound` when no record exists.
    async fn load(&self, account: &Account) -> Result<Payment>;
    /// Payments still `Pending` or `Checking`.
    async fn list_active(&self) -> Result<Vec<Payment>>;
    async fn list_all(&self) -> Result<Vec<Payment>>;
    /// Moves a `Pending` record to `Checking`; a no-op in other states.
    async fn mark_checking(&self, account: &Account) -> Result<()>;
    /// Applies `outcome` in one transaction if the record is not yet
    /// terminal. Returns the updated record, or `None` when another
    /// transition already won.
    async fn finalize(&self, account: &Account, outcome: &TerminalOutcome)
    -> Result<Option<Payment>>;
    async fn delete(&self, account: &Account) -> Result<()>;
}

/// Durable counter handing out derivation indices.
#[async_trait]
pub trait IndexAllocator: Send + Sync {
    /// Returns an index never returned before, across restarts.
    async fn next_index(&self) -> Result<u64>;
}

/// Read access to a ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Transfers into `account` after `since` (or from the start).
    async fn query_incoming(
        &self,
        account: &Account,
        since: Option<&Cursor>,
    ) -> Result<Vec<IncomingTransfer>>;
}

/// Fiat price source.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one ledger unit in `currency`.
    async fn get_rate(&self, currency: &Currency) -> Result<Decimal>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub index: u64,
    pub account: Account,
}

/// Signed bearer tokens binding a client to one account.
pub trait TokenCodec: Send + Sync {
    fn issue(&self, index: u64, account: &Account) -> Result<String>;
    /// Fails with `InvalidInput` for malformed or tampered tokens.
    fn parse(&self, token: &str) -> Result<TokenClaims>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type IndexAllocatorRef = Arc<dyn IndexAllocator>;
pub type LedgerClientRef = Arc<dyn LedgerClient>;
pub type PriceOracleRef = Arc<dyn PriceOracle>;
pub type TokenCodecRef = Arc<dyn TokenCodec>;

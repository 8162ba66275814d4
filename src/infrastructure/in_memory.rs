use crate::domain::keyspace::Account;
use crate::domain::payment::{Currency, Payment, RawAmount, TerminalOutcome};
use crate::domain::ports::{IndexAllocator, LedgerClient, PaymentStore, PriceOracle};
use crate::domain::transfer::{BlockHash, Cursor, IncomingTransfer};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    payments: HashMap<Account, Payment>,
    last_index: u64,
}

/// A thread-safe in-memory payment store and index allocator.
///
/// Both collections sit behind one `RwLock`, so the allocator's
/// read-increment-write and every terminal transition are serialized the
/// same way a database transaction would serialize them. Nothing survives
/// the process; use it for tests or throwaway runs.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn save(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        state.payments.insert(payment.account.clone(), payment.clone());
        Ok(())
    }

    async fn load(&self, account: &Account) -> Result<Payment> {
        let state = self.state.read().await;
        state.payments.get(account).cloned().ok_or(GatewayError::NotFound)
    }

    async fn list_active(&self) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut active: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|p| p.index);
        Ok(active)
    }

    async fn list_all(&self) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut all: Vec<Payment> = state.payments.values().cloned().collect();
        all.sort_by_key(|p| p.index);
        Ok(all)
    }

    async fn mark_checking(&self, account: &Account) -> Result<()> {
        let mut state = self.state.write().await;
        let payment = state.payments.get_mut(account).ok_or(GatewayError::NotFound)?;
        payment.mark_checking();
        Ok(())
    }

    async fn finalize(
        &self,
        account: &Account,
        outcome: &TerminalOutcome,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.write().await;
        let payment = state.payments.get_mut(account).ok_or(GatewayError::NotFound)?;
        if payment.apply(outcome) {
            Ok(Some(payment.clone()))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, account: &Account) -> Result<()> {
        let mut state = self.state.write().await;
        state.payments.remove(account);
        Ok(())
    }
}

#[async_trait]
impl IndexAllocator for InMemoryStore {
    async fn next_index(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let next = state
            .last_index
            .checked_add(1)
            .ok_or_else(|| GatewayError::Conflict("index space exhausted".into()))?;
        state.last_index = next;
        Ok(next)
    }
}

/// A scriptable ledger for tests and local runs.
///
/// Transfers are appended with [`InMemoryLedger::deposit`]; queries can be
/// made to fail a number of times with [`InMemoryLedger::fail_next`].
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    transfers: Arc<RwLock<HashMap<Account, Vec<IncomingTransfer>>>>,
    sequence: Arc<AtomicU64>,
    failures_left: Arc<AtomicU32>,
    queries: Arc<AtomicU64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transfer of `amount` to `account` and returns its block hash.
    pub async fn deposit(&self, account: &Account, amount: RawAmount) -> BlockHash {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(account.as_str().as_bytes());
        hasher.update(&seq.to_be_bytes());
        let hash = hex::encode_upper(hasher.finalize().as_bytes());

        let transfer = IncomingTransfer {
            amount,
            block_hash: BlockHash(hash.clone()),
            cursor: Cursor(hash.clone()),
        };
        self.transfers
            .write()
            .await
            .entry(account.clone())
            .or_default()
            .push(transfer);
        BlockHash(hash)
    }

    /// Makes the next `n` queries fail with `UpstreamUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of queries served, failed ones included.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn query_incoming(
        &self,
        account: &Account,
        since: Option<&Cursor>,
    ) -> Result<Vec<IncomingTransfer>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::UpstreamUnavailable(
                "ledger node unreachable".into(),
            ));
        }

        let transfers = self.transfers.read().await;
        let history = match transfers.get(account) {
            Some(history) => history,
            None => return Ok(Vec::new()),
        };
        let start = since
            .and_then(|cursor| history.iter().position(|t| &t.cursor == cursor))
            .map_or(0, |pos| pos + 1);
        Ok(history[start..].to_vec())
    }
}

/// Price oracle answering from a fixed rate table.
#[derive(Debug, Default, Clone)]
pub struct FixedRateOracle {
    rates: HashMap<Currency, Decimal>,
}

impl FixedRateOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, currency: &str, rate: Decimal) -> Self {
        if let Ok(currency) = Currency::parse(currency) {
            self.rates.insert(currency, rate);
        }
        self
    }
}

#[async_trait]
impl PriceOracle for FixedRateOracle {
    async fn get_rate(&self, currency: &Currency) -> Result<Decimal> {
        self.rates.get(currency).copied().ok_or_else(|| {
            GatewayError::UpstreamUnavailable(format!("no price available for {currency}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::keyspace::{KeySpace, Seed};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn payment(index: u64) -> Payment {
        let key = KeySpace::new(Seed::from_bytes([5u8; 32]))
            .derive(index)
            .unwrap();
        Payment::new(
            index,
            &key,
            RawAmount(100),
            dec!(1),
            Currency::native(),
            String::new(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_in_memory_store_save_and_load() {
        let store = InMemoryStore::new();
        let p = payment(1);
        store.save(&p).await.unwrap();

        assert_eq!(store.load(&p.account).await.unwrap(), p);
        assert!(matches!(
            store.load(&payment(2).account).await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_in_memory_list_active_skips_terminal() {
        let store = InMemoryStore::new();
        let (a, b) = (payment(1), payment(2));
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let outcome = TerminalOutcome::Expired { at: Utc::now() };
        assert!(store.finalize(&b.account, &outcome).await.unwrap().is_some());

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].account, a.account);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_finalize_once() {
        let store = InMemoryStore::new();
        let p = payment(1);
        store.save(&p).await.unwrap();

        let outcome = TerminalOutcome::Confirmed {
            block_hash: BlockHash("H".into()),
            received: RawAmount(100),
            at: Utc::now(),
        };
        assert!(store.finalize(&p.account, &outcome).await.unwrap().is_some());
        assert!(store.finalize(&p.account, &outcome).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_allocator_is_monotonic() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_index().await.unwrap(), 1);
        assert_eq!(store.next_index().await.unwrap(), 2);
        assert_eq!(store.next_index().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_in_memory_ledger_cursor() {
        let ledger = InMemoryLedger::new();
        let account = payment(1).account;
        let first = ledger.deposit(&account, RawAmount(5)).await;
        ledger.deposit(&account, RawAmount(7)).await;

        let all = ledger.query_incoming(&account, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let after = ledger
            .query_incoming(&account, Some(&Cursor(first.0)))
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].amount, RawAmount(7));
    }

    #[tokio::test]
    async fn test_in_memory_ledger_injected_failures() {
        let ledger = InMemoryLedger::new();
        let account = payment(1).account;
        ledger.fail_next(2);
        assert!(ledger.query_incoming(&account, None).await.is_err());
        assert!(ledger.query_incoming(&account, None).await.is_err());
        assert!(ledger.query_incoming(&account, None).await.is_ok());
        assert_eq!(ledger.query_count(), 3);
    }

    #[tokio::test]
    async fn test_fixed_rate_oracle() {
        let oracle = FixedRateOracle::new().with_rate("usd", dec!(0.85));
        let usd = Currency::parse("USD").unwrap();
        assert_eq!(oracle.get_rate(&usd).await.unwrap(), dec!(0.85));
        let xyz = Currency::parse("XYZ").unwrap();
        assert!(matches!(
            oracle.get_rate(&xyz).await,
            Err(GatewayError::UpstreamUnavailable(_))
        ));
    }
}

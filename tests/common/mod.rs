#![allow(dead_code)]

use async_trait::async_trait;
use paygate::application::scheduler::SchedulerConfig;
use paygate::application::service::{PaymentService, Ports};
use paygate::config::EngineConfig;
use paygate::domain::keyspace::{Account, KeySpace, Seed};
use paygate::domain::payment::{Payment, TerminalOutcome};
use paygate::domain::ports::{IndexAllocator, PaymentStore};
use paygate::error::Result;
use paygate::infrastructure::in_memory::{FixedRateOracle, InMemoryLedger, InMemoryStore};
use paygate::infrastructure::token::HmacTokenCodec;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const SEED: [u8; 32] = [7u8; 32];
pub const TOKEN_SECRET: &str = "integration-secret";

/// In-memory store that counts every `load`.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    loads: Arc<AtomicU64>,
}

impl CountingStore {
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStore for CountingStore {
    async fn save(&self, payment: &Payment) -> Result<()> {
        self.inner.save(payment).await
    }
    async fn load(&self, account: &Account) -> Result<Payment> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(account).await
    }
    async fn list_active(&self) -> Result<Vec<Payment>> {
        self.inner.list_active().await
    }
    async fn list_all(&self) -> Result<Vec<Payment>> {
        self.inner.list_all().await
    }
    async fn mark_checking(&self, account: &Account) -> Result<()> {
        self.inner.mark_checking(account).await
    }
    async fn finalize(&self, account: &Account, outcome: &TerminalOutcome) -> Result<Option<Payment>> {
        self.inner.finalize(account, outcome).await
    }
    async fn delete(&self, account: &Account) -> Result<()> {
        self.inner.delete(account).await
    }
}

#[async_trait]
impl IndexAllocator for CountingStore {
    async fn next_index(&self) -> Result<u64> {
        self.inner.next_index().await
    }
}

pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig {
            check_interval: Duration::from_millis(10),
            max_check_interval: Duration::from_millis(40),
            payment_timeout: Duration::from_secs(60),
        },
        ..EngineConfig::default()
    }
}

pub fn keyspace() -> KeySpace {
    KeySpace::new(Seed::from_bytes(SEED))
}

/// A service over in-memory adapters, with handles to drive them.
pub struct Harness {
    pub store: CountingStore,
    pub ledger: InMemoryLedger,
    pub service: Arc<PaymentService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CountingStore::default(), InMemoryLedger::new(), fast_engine())
    }

    /// Builds a service over existing adapters, as a restarted process would.
    pub fn with(store: CountingStore, ledger: InMemoryLedger, engine: EngineConfig) -> Self {
        let ports = Ports {
            store: Arc::new(store.clone()),
            allocator: Arc::new(store.clone()),
            ledger: Arc::new(ledger.clone()),
            oracle: Arc::new(FixedRateOracle::new().with_rate("USD", dec!(0.5))),
            tokens: Arc::new(HmacTokenCodec::new(TOKEN_SECRET).unwrap()),
        };
        let service = Arc::new(PaymentService::new(keyspace(), ports, engine));
        Self {
            store,
            ledger,
            service,
        }
    }
}

pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

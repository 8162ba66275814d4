use crate::application::event_bus::{EventBus, Subscription};
use crate::application::scheduler::CheckScheduler;
use crate::config::{EngineConfig, RetentionPolicy};
use crate::domain::events::PaymentEvent;
use crate::domain::keyspace::{Account, KeySpace};
use crate::domain::payment::{Currency, FIAT_CONVERSION_SCALE, Payment, RawAmount, TerminalOutcome};
use crate::domain::ports::{
    IndexAllocatorRef, LedgerClientRef, PaymentStoreRef, PriceOracleRef, TokenCodecRef,
};
use crate::domain::transfer::BlockHash;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info};

/// The collaborators the service is wired with.
///
/// `store` and `allocator` are normally two views of the same database so
/// allocation and persistence share one transactional store.
#[derive(Clone)]
pub struct Ports {
    pub store: PaymentStoreRef,
    pub allocator: IndexAllocatorRef,
    pub ledger: LedgerClientRef,
    pub oracle: PriceOracleRef,
    pub tokens: TokenCodecRef,
}

/// A merchant's request for a new payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    /// Amount in `currency`, or in ledger units when no currency is given.
    pub amount: Decimal,
    pub currency: Option<String>,
    pub state: String,
}

/// Manual terminal transition requested by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualOverride {
    Confirmed,
    Expired,
}

/// The main entry point for the payment gateway.
///
/// `PaymentService` owns the key space, the event bus and the check
/// scheduler, and orchestrates them over the injected ports. The transport
/// layer only talks to this type.
pub struct PaymentService {
    keyspace: KeySpace,
    ports: Ports,
    bus: EventBus,
    scheduler: CheckScheduler,
    retention: RetentionPolicy,
}

impl PaymentService {
    /// Creates a new `PaymentService`. No watch is armed until
    /// [`PaymentService::resume`] or the first created payment.
    pub fn new(keyspace: KeySpace, ports: Ports, config: EngineConfig) -> Self {
        let bus = EventBus::new();
        let scheduler = CheckScheduler::new(
            ports.store.clone(),
            ports.ledger.clone(),
            bus.clone(),
            config.scheduler,
        );
        Self {
            keyspace,
            ports,
            bus,
            scheduler,
            retention: config.retention,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &CheckScheduler {
        &self.scheduler
    }

    /// Allocates, derives, persists and starts watching a new payment.
    ///
    /// Fiat amounts are converted before an index is allocated, so a price
    /// failure consumes nothing.
    pub async fn create_payment(&self, request: PaymentRequest) -> Result<(Payment, String)> {
        let currency = Currency::parse(request.currency.as_deref().unwrap_or_default())?;
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::invalid("amount must be positive"));
        }
        let amount = self.to_raw(request.amount, &currency).await?;

        let index = self.ports.allocator.next_index().await?;
        let key = self.keyspace.derive(index)?;
        match self.ports.store.load(&key.account).await {
            Ok(existing) => {
                error!(
                    index,
                    existing_index = existing.index,
                    account = %key.account,
                    "derived account already has a payment"
                );
                return Err(GatewayError::Conflict(format!(
                    "account {} already allocated",
                    key.account
                )));
            }
            Err(GatewayError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let payment = Payment::new(
            index,
            &key,
            amount,
            request.amount,
            currency,
            request.state,
            Utc::now(),
        );
        let token = self.ports.tokens.issue(index, &payment.account)?;
        self.ports.store.save(&payment).await?;
        self.scheduler.watch(payment.clone());

        info!(
            index,
            account = %payment.account,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment created"
        );
        Ok((payment, token))
    }

    async fn to_raw(&self, amount: Decimal, currency: &Currency) -> Result<RawAmount> {
        if currency.is_native() {
            return RawAmount::from_units(amount);
        }
        let rate = self.ports.oracle.get_rate(currency).await?;
        if rate <= Decimal::ZERO {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "non-positive rate for {currency}"
            )));
        }
        let units = amount
            .checked_div(rate)
            .ok_or_else(|| GatewayError::invalid("amount too large"))?
            .round_dp(FIAT_CONVERSION_SCALE);
        if units.is_zero() {
            return Err(GatewayError::invalid("amount too small"));
        }
        RawAmount::from_units(units)
    }

    /// Looks up the payment a token was issued for.
    ///
    /// The token is checked before any store access.
    pub async fn verify_payment(&self, token: &str) -> Result<Payment> {
        let claims = self.ports.tokens.parse(token)?;
        let payment = self.ports.store.load(&claims.account).await?;
        if payment.index != claims.index {
            return Err(GatewayError::NotFound);
        }
        Ok(payment)
    }

    /// Subscribes to the confirmation of the payment a token was issued for.
    ///
    /// Returns the subscription together with the current record, read
    /// after subscribing, so a confirmation that already happened is seen
    /// through the snapshot and a later one through the subscription.
    /// Dropping the subscription releases it.
    pub async fn watch_payment(&self, token: &str) -> Result<(Subscription, Payment)> {
        let claims = self.ports.tokens.parse(token)?;
        let subscription = self.bus.subscribe(&claims.account);
        let payment = self.ports.store.load(&claims.account).await?;
        Ok((subscription, payment))
    }

    /// Price of one ledger unit in `currency`.
    pub async fn price(&self, currency: &str) -> Result<Decimal> {
        let currency = Currency::parse(currency)?;
        if currency.is_native() {
            return Ok(Decimal::ONE);
        }
        self.ports.oracle.get_rate(&currency).await
    }

    pub async fn list_active(&self) -> Result<Vec<Payment>> {
        self.ports.store.list_active().await
    }

    pub async fn admin_payment(&self, account: &str) -> Result<Payment> {
        let account = Account::parse(account)?;
        self.ports.store.load(&account).await
    }

    /// Re-arms the watch for an active payment.
    ///
    /// Returns whether a new task was started; `false` when the payment is
    /// final or already watched.
    pub async fn recheck(&self, account: &str) -> Result<bool> {
        let account = Account::parse(account)?;
        let payment = self.ports.store.load(&account).await?;
        Ok(self.scheduler.watch(payment))
    }

    /// Forces a terminal state. A forced confirmation is published like an
    /// observed one.
    pub async fn override_status(&self, account: &str, status: ManualOverride) -> Result<Payment> {
        let account = Account::parse(account)?;
        let now = Utc::now();
        let outcome = match status {
            ManualOverride::Confirmed => {
                let current = self.ports.store.load(&account).await?;
                TerminalOutcome::Confirmed {
                    block_hash: BlockHash("manual".into()),
                    received: current.amount,
                    at: now,
                }
            }
            ManualOverride::Expired => TerminalOutcome::Expired { at: now },
        };

        let payment = self
            .ports
            .store
            .finalize(&account, &outcome)
            .await?
            .ok_or_else(|| GatewayError::invalid("payment is already final"))?;
        info!(account = %account, status = %payment.status, "payment status overridden");
        if payment.is_confirmed() {
            self.bus
                .publish(&account, PaymentEvent::Confirmed(payment.clone()));
        }
        Ok(payment)
    }

    /// Arms a watch for every active payment. Used after a restart.
    pub async fn resume(&self) -> Result<usize> {
        let active = self.ports.store.list_active().await?;
        let armed = active
            .into_iter()
            .filter(|payment| self.scheduler.watch(payment.clone()))
            .count();
        info!(armed, "resumed watches for active payments");
        Ok(armed)
    }

    /// Applies the retention policy once and returns how many records were
    /// deleted.
    pub async fn sweep_retention(&self, now: DateTime<Utc>) -> Result<usize> {
        let RetentionPolicy::DeleteAfter(keep) = self.retention else {
            return Ok(0);
        };
        let keep = chrono::Duration::from_std(keep).unwrap_or(chrono::Duration::MAX);

        let mut deleted = 0;
        for payment in self.ports.store.list_all().await? {
            let Some(finished) = payment.finished_at() else {
                continue;
            };
            if payment.is_active() || now - finished <= keep {
                continue;
            }
            self.ports.store.delete(&payment.account).await?;
            deleted += 1;
        }
        if deleted > 0 {
            debug!(deleted, "retention sweep removed finished payments");
        }
        Ok(deleted)
    }

    /// Stops all watch tasks, letting in-flight confirmation writes land.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::scheduler::SchedulerConfig;
    use crate::domain::keyspace::Seed;
    use crate::domain::payment::{PaymentStatus, RAW_PER_UNIT};
    use crate::domain::ports::PaymentStore;
    use crate::infrastructure::in_memory::{FixedRateOracle, InMemoryLedger, InMemoryStore};
    use crate::infrastructure::token::HmacTokenCodec;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn service_with(store: InMemoryStore, retention: RetentionPolicy) -> PaymentService {
        let ports = Ports {
            store: Arc::new(store.clone()),
            allocator: Arc::new(store),
            ledger: Arc::new(InMemoryLedger::new()),
            oracle: Arc::new(FixedRateOracle::new().with_rate("USD", dec!(2))),
            tokens: Arc::new(HmacTokenCodec::new("test-secret").unwrap()),
        };
        let config = EngineConfig {
            scheduler: SchedulerConfig {
                check_interval: Duration::from_millis(10),
                max_check_interval: Duration::from_millis(20),
                payment_timeout: Duration::from_secs(30),
            },
            retention,
        };
        PaymentService::new(KeySpace::new(Seed::from_bytes([2u8; 32])), ports, config)
    }

    fn request(amount: Decimal, currency: Option<&str>) -> PaymentRequest {
        PaymentRequest {
            amount,
            currency: currency.map(str::to_string),
            state: "cart-9".into(),
        }
    }

    #[tokio::test]
    async fn test_create_native_payment() {
        let store = InMemoryStore::new();
        let service = service_with(store.clone(), RetentionPolicy::KeepForever);

        let (payment, token) = service.create_payment(request(dec!(1.5), None)).await.unwrap();
        assert_eq!(payment.index, 1);
        assert_eq!(payment.amount, RawAmount(15 * RAW_PER_UNIT / 10));
        assert!(payment.currency.is_native());
        assert_eq!(payment.state, "cart-9");

        let stored = store.load(&payment.account).await.unwrap();
        assert!(!stored.is_confirmed());
        assert_eq!(service.verify_payment(&token).await.unwrap().account, payment.account);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_fiat_payment_converts_with_rounding() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);

        // 10 USD at 2 USD per unit -> 5 units
        let (payment, _) = service
            .create_payment(request(dec!(10), Some("usd")))
            .await
            .unwrap();
        assert_eq!(payment.amount, RawAmount(5 * RAW_PER_UNIT));
        assert_eq!(payment.currency.as_str(), "USD");
        assert_eq!(payment.amount_in_currency, dec!(10));

        // 1 USD / 3 would not terminate; it is cut to 6 places
        let service = {
            let store = InMemoryStore::new();
            let mut s = service_with(store, RetentionPolicy::KeepForever);
            s.ports.oracle = Arc::new(FixedRateOracle::new().with_rate("USD", dec!(3)));
            s
        };
        let (payment, _) = service
            .create_payment(request(dec!(1), Some("USD")))
            .await
            .unwrap();
        assert_eq!(payment.amount, RawAmount(333_333 * 10u128.pow(24)));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);
        assert!(matches!(
            service.create_payment(request(dec!(0), None)).await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(matches!(
            service.create_payment(request(dec!(1), Some("$$$"))).await,
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_index() {
        let store = InMemoryStore::new();
        let service = service_with(store, RetentionPolicy::KeepForever);
        let (payment, _) = service.create_payment(request(dec!(1), None)).await.unwrap();

        // Correctly signed, but bound to a different index than the record
        let forged = service.ports.tokens.issue(99, &payment.account).unwrap();
        assert!(matches!(
            service.verify_payment(&forged).await,
            Err(GatewayError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_override_status_and_recheck() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);
        let (payment, token) = service.create_payment(request(dec!(1), None)).await.unwrap();
        let account = payment.account.to_string();

        // Already watched by create_payment
        assert!(!service.recheck(&account).await.unwrap());

        let (mut sub, snapshot) = service.watch_payment(&token).await.unwrap();
        assert!(!snapshot.is_confirmed());

        let confirmed = service
            .override_status(&account, ManualOverride::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Confirmed);
        assert!(sub.recv().await.is_some());

        assert!(matches!(
            service.override_status(&account, ManualOverride::Expired).await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(!service.recheck(&account).await.unwrap());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_payment_lookup() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);
        let (payment, _) = service.create_payment(request(dec!(1), None)).await.unwrap();
        let found = service.admin_payment(payment.account.as_str()).await.unwrap();
        assert_eq!(found.index, payment.index);
        assert!(matches!(
            service.admin_payment("garbage").await,
            Err(GatewayError::InvalidInput(_))
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_price() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);
        assert_eq!(service.price("usd").await.unwrap(), dec!(2));
        assert_eq!(service.price("").await.unwrap(), Decimal::ONE);
        assert!(matches!(
            service.price("EUR").await,
            Err(GatewayError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_sweep() {
        let store = InMemoryStore::new();
        let service = service_with(
            store.clone(),
            RetentionPolicy::DeleteAfter(Duration::from_secs(60)),
        );
        let (done, _) = service.create_payment(request(dec!(1), None)).await.unwrap();
        let (open, _) = service.create_payment(request(dec!(1), None)).await.unwrap();
        service
            .override_status(done.account.as_str(), ManualOverride::Expired)
            .await
            .unwrap();

        assert_eq!(service.sweep_retention(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(service.sweep_retention(later).await.unwrap(), 1);

        assert!(matches!(store.load(&done.account).await, Err(GatewayError::NotFound)));
        assert!(store.load(&open.account).await.is_ok());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_keep_forever_never_sweeps() {
        let service = service_with(InMemoryStore::new(), RetentionPolicy::KeepForever);
        let (p, _) = service.create_payment(request(dec!(1), None)).await.unwrap();
        service
            .override_status(p.account.as_str(), ManualOverride::Expired)
            .await
            .unwrap();
        let far = Utc::now() + chrono::Duration::days(3650);
        assert_eq!(service.sweep_retention(far).await.unwrap(), 0);
    }
}

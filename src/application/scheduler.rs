use crate::application::event_bus::EventBus;
use crate::domain::events::PaymentEvent;
use crate::domain::keyspace::Account;
use crate::domain::payment::{Payment, RawAmount, TerminalOutcome};
use crate::domain::ports::{LedgerClientRef, PaymentStoreRef};
use crate::domain::transfer::{BlockHash, Cursor};
use crate::error::GatewayError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Timing knobs for the per-payment polling tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay after a tick that made progress, and the initial delay.
    pub check_interval: Duration,
    /// Upper bound for the exponential backoff between empty ticks.
    pub max_check_interval: Duration,
    /// Age after which an unpaid payment expires.
    pub payment_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            max_check_interval: Duration::from_secs(30),
            payment_timeout: Duration::from_secs(3600),
        }
    }
}

impl SchedulerConfig {
    fn backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_check_interval)
    }
}

struct Inner {
    store: PaymentStoreRef,
    ledger: LedgerClientRef,
    bus: EventBus,
    config: SchedulerConfig,
    /// Accounts with a live watch task; at most one task per account.
    watching: Mutex<HashSet<Account>>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
}

/// Runs one polling task per open payment until it confirms or expires.
///
/// Cloning is cheap and every clone drives the same set of tasks.
#[derive(Clone)]
pub struct CheckScheduler {
    inner: Arc<Inner>,
}

impl CheckScheduler {
    pub fn new(
        store: PaymentStoreRef,
        ledger: LedgerClientRef,
        bus: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                ledger,
                bus,
                config,
                watching: Mutex::new(HashSet::new()),
                tasks: Mutex::new(JoinSet::new()),
                shutdown,
            }),
        }
    }

    /// Arms a watch task for `payment`.
    ///
    /// The payment must already be persisted. Returns `false` without
    /// spawning when the payment is terminal, already watched, or the
    /// scheduler is shutting down.
    pub fn watch(&self, payment: Payment) -> bool {
        if *self.inner.shutdown.borrow() || !payment.is_active() {
            return false;
        }
        if !self.inner.watching.lock().insert(payment.account.clone()) {
            debug!(account = %payment.account, "payment already watched");
            return false;
        }

        let guard = WatchGuard {
            inner: self.inner.clone(),
            account: payment.account.clone(),
        };
        let shutdown = self.inner.shutdown.subscribe();
        let inner = self.inner.clone();

        let mut tasks = self.inner.tasks.lock();
        // Shutdown may have taken the set since the check above
        if *self.inner.shutdown.borrow() {
            return false;
        }
        // Reap finished tasks so the set only holds live ones
        while tasks.try_join_next().is_some() {}
        debug!(account = %payment.account, index = payment.index, "watch armed");
        tasks.spawn(async move {
            let _guard = guard;
            inner.run(payment, shutdown).await;
        });
        true
    }

    pub fn is_watching(&self, account: &Account) -> bool {
        self.inner.watching.lock().contains(account)
    }

    /// Number of live watch tasks.
    pub fn active_watches(&self) -> usize {
        self.inner.watching.lock().len()
    }

    /// Signals every task to stop and waits for them.
    ///
    /// Tasks idle in a query or a delay exit at once. A task that has
    /// observed a confirmation finishes its in-flight store write first.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        info!(tasks = tasks.len(), "draining check tasks");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!(error = %e, "check task panicked");
            }
        }
    }
}

struct WatchGuard {
    inner: Arc<Inner>,
    account: Account,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.inner.watching.lock().remove(&self.account);
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // An error means the scheduler itself is gone, which is a stop as well
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Inner {
    async fn run(&self, payment: Payment, mut shutdown: watch::Receiver<bool>) {
        let account = payment.account.clone();
        if let Err(e) = self.store.mark_checking(&account).await {
            warn!(account = %account, error = %e, "could not mark payment as checking");
        }

        let timeout =
            chrono::Duration::from_std(self.config.payment_timeout).unwrap_or(chrono::Duration::MAX);
        let mut cursor: Option<Cursor> = None;
        let mut seen: HashSet<BlockHash> = HashSet::new();
        let mut received = RawAmount::ZERO;
        let mut delay = self.config.check_interval;

        loop {
            let result = tokio::select! {
                result = self.ledger.query_incoming(&account, cursor.as_ref()) => result,
                _ = stopped(&mut shutdown) => {
                    debug!(account = %account, "watch stopped by shutdown");
                    return;
                }
            };

            match result {
                Ok(transfers) => {
                    let mut progressed = false;
                    for transfer in transfers {
                        cursor = Some(transfer.cursor.clone());
                        if !seen.insert(transfer.block_hash.clone()) {
                            continue;
                        }
                        progressed = true;
                        received = received + transfer.amount;
                        debug!(
                            account = %account,
                            block = %transfer.block_hash,
                            amount = %transfer.amount,
                            total = %received,
                            "incoming transfer observed"
                        );
                        if received >= payment.amount {
                            let outcome = TerminalOutcome::Confirmed {
                                block_hash: transfer.block_hash,
                                received,
                                at: Utc::now(),
                            };
                            self.conclude(&account, outcome, &mut shutdown).await;
                            return;
                        }
                    }

                    // A manual override may have finalized the record meanwhile
                    match self.store.load(&account).await {
                        Ok(current) if !current.is_active() => {
                            debug!(account = %account, status = %current.status, "payment already final, watch ends");
                            return;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(account = %account, error = %e, "could not reload payment"),
                    }
                    if payment.is_past_deadline(Utc::now(), timeout) {
                        let outcome = TerminalOutcome::Expired { at: Utc::now() };
                        self.conclude(&account, outcome, &mut shutdown).await;
                        return;
                    }
                    delay = if progressed {
                        self.config.check_interval
                    } else {
                        self.config.backoff(delay)
                    };
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "ledger query failed, retrying");
                    delay = self.config.backoff(delay);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => {
                    debug!(account = %account, "watch stopped by shutdown");
                    return;
                }
            }
        }
    }

    /// Writes the terminal transition, retrying storage failures until it
    /// lands or shutdown is signalled, then publishes on confirmation.
    async fn conclude(
        &self,
        account: &Account,
        outcome: TerminalOutcome,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let mut delay = self.config.check_interval;
        loop {
            match self.store.finalize(account, &outcome).await {
                Ok(Some(payment)) => {
                    match &outcome {
                        TerminalOutcome::Confirmed { block_hash, .. } => {
                            info!(account = %account, block = %block_hash, "payment confirmed");
                            self.bus
                                .publish(account, PaymentEvent::Confirmed(payment));
                        }
                        TerminalOutcome::Expired { .. } => {
                            info!(account = %account, "payment expired");
                        }
                    }
                    return;
                }
                Ok(None) => {
                    debug!(account = %account, "payment already final");
                    return;
                }
                Err(GatewayError::NotFound) => {
                    error!(account = %account, "watched payment has no stored record");
                    return;
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        error!(account = %account, error = %e, "terminal write abandoned at shutdown");
                        return;
                    }
                    error!(account = %account, error = %e, "terminal write failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stopped(shutdown) => {}
                    }
                    delay = self.config.backoff(delay);
                }
            }
        }
    }
}

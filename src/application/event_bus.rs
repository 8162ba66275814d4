//! # Payment Event Bus
//!
//! In-process publish/subscribe keyed by receiving account. Each subscriber
//! owns a bounded channel; publishing uses `try_send` so a slow subscriber
//! never stalls the check task that raised the event.

use crate::domain::events::PaymentEvent;
use crate::domain::keyspace::Account;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-subscriber channel capacity.
///
/// Only one confirmation is ever published per account, so any capacity of
/// one or more is lossless for subscribers registered at publish time.
pub const EVENT_CHANNEL_CAPACITY: usize = 4;

type Registry = HashMap<Account, HashMap<u64, mpsc::Sender<PaymentEvent>>>;

/// Registry of live subscribers, shared between the bus and its handles.
#[derive(Default, Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
    events_published: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `account`.
    ///
    /// The returned [`Subscription`] unregisters itself when dropped.
    #[must_use]
    pub fn subscribe(&self, account: &Account) -> Subscription {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(account.clone())
            .or_default()
            .insert(id, sender);

        debug!(account = %account, id, "subscription created");
        Subscription {
            receiver,
            handle: SubscriptionHandle {
                subscribers: self.subscribers.clone(),
                account: account.clone(),
                id,
            },
        }
    }

    /// Delivers `event` to every subscriber of `account`.
    ///
    /// Returns the number of subscribers that accepted the event. No
    /// subscribers is not an error.
    pub fn publish(&self, account: &Account, event: PaymentEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let senders: Vec<mpsc::Sender<PaymentEvent>> = match self.subscribers.read().get(account) {
            Some(subs) => subs.values().cloned().collect(),
            None => {
                debug!(account = %account, "event published with no subscribers");
                return 0;
            }
        };

        let mut delivered = 0;
        for sender in senders {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(account = %account, "subscriber channel full, event dropped");
                }
                // Receiver went away between lookup and send
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        debug!(account = %account, receivers = delivered, "event published");
        delivered
    }

    /// Number of live subscriptions for `account`.
    pub fn subscriber_count(&self, account: &Account) -> usize {
        self.subscribers.read().get(account).map_or(0, HashMap::len)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

/// Cancels one subscription. Cloneable and idempotent.
#[derive(Clone)]
pub struct SubscriptionHandle {
    subscribers: Arc<RwLock<Registry>>,
    account: Account,
    id: u64,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        let mut subs = self.subscribers.write();
        let Some(for_account) = subs.get_mut(&self.account) else {
            return;
        };
        if for_account.remove(&self.id).is_some() {
            debug!(account = %self.account, id = self.id, "subscription cancelled");
        }
        if for_account.is_empty() {
            subs.remove(&self.account);
        }
    }
}

/// A live subscription: the receive side plus its cancel handle.
pub struct Subscription {
    receiver: mpsc::Receiver<PaymentEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Waits for the next event. `None` once cancelled and drained.
    pub async fn recv(&mut self) -> Option<PaymentEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PaymentEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn account(&self) -> &Account {
        &self.handle.account
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

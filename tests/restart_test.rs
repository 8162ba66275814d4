mod common;

use common::{Harness, fast_engine, wait_until};
use paygate::application::service::PaymentRequest;
use paygate::domain::payment::{PaymentStatus, RawAmount};
use paygate::domain::ports::PaymentStore;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_resume_rearms_open_payments_once() {
    let first = Harness::new();
    let mut created = Vec::new();
    for _ in 0..2 {
        let (payment, _) = first
            .service
            .create_payment(PaymentRequest {
                amount: dec!(1),
                currency: None,
                state: String::new(),
            })
            .await
            .unwrap();
        created.push(payment);
    }

    let store = first.store.clone();
    let accounts: Vec<_> = created.iter().map(|p| p.account.clone()).collect();
    wait_until(|| {
        let store = store.clone();
        let accounts = accounts.clone();
        async move {
            for account in &accounts {
                if store.load(account).await.unwrap().status != PaymentStatus::Checking {
                    return false;
                }
            }
            true
        }
    })
    .await;
    first.service.shutdown().await;

    // Same storage and ledger, fresh process state
    let second = Harness::with(first.store.clone(), first.ledger.clone(), fast_engine());
    assert_eq!(second.service.resume().await.unwrap(), 2);
    assert_eq!(second.service.resume().await.unwrap(), 0);

    let mut subscriptions = Vec::new();
    for payment in &created {
        subscriptions.push(second.service.bus().subscribe(&payment.account));
        second.ledger.deposit(&payment.account, payment.amount).await;
        // A second qualifying transfer must not confirm twice
        second
            .ledger
            .deposit(&payment.account, RawAmount(payment.amount.0 * 2))
            .await;
    }

    for subscription in &mut subscriptions {
        let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.payment().is_confirmed());
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for subscription in &mut subscriptions {
        assert!(subscription.try_recv().is_none());
    }
    assert_eq!(second.service.bus().events_published(), 2);
    assert_eq!(first.service.bus().events_published(), 0);
    second.service.shutdown().await;
}

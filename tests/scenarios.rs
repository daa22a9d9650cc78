use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_stream::StreamExt;

use payout_ledger::clock::ManualClock;
use payout_ledger::config::LedgerConfig;
use payout_ledger::gateway::{GatewayAck, GatewayError, LoggingGateway, SettlementGateway};
use payout_ledger::model::{EntryKind, EntryStatus, MethodId, MethodKind, PayoutId};
use payout_ledger::{
    Amount, EarningStatus, Engine, EngineError, PaymentMethod, PayoutError, PayoutStatus,
    SettlementOutcome,
};

#[derive(Debug)]
struct DecliningGateway;

#[async_trait]
impl SettlementGateway for DecliningGateway {
    async fn submit_payout(
        &self,
        _payout: PayoutId,
        _amount: Amount,
        _method: &PaymentMethod,
    ) -> Result<GatewayAck, GatewayError> {
        Err(GatewayError::Rejected("invalid beneficiary account".to_string()))
    }
}

fn units(n: i64) -> Amount {
    Amount::from_units(n)
}

fn engine_with(gateway: Arc<dyn SettlementGateway>) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Engine::with_clock(LedgerConfig::default(), gateway, clock.clone());
    (engine, clock)
}

fn register_bank(engine: &Engine, provider: &str) -> MethodId {
    engine
        .methods()
        .register(provider, MethodKind::BankAccount, "Provider", "0011223344556677", true)
        .unwrap()
        .id
}

/// A provider with 8,500 available after one 10,000 case.
async fn cleared(engine: &Engine, clock: &ManualClock, provider: &str) -> MethodId {
    engine
        .record_earning(provider, "case-1", "client-1", units(10_000))
        .await
        .unwrap();
    clock.advance(Duration::days(7));
    engine.sweep().await;
    register_bank(engine, provider)
}

async fn ledger_sum(engine: &Engine, provider: &str) -> Amount {
    engine
        .stream_since(provider, 0)
        .await
        .unwrap()
        .map(|entry| entry.amount)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum()
}

#[tokio::test]
async fn earning_creation() {
    let (engine, _) = engine_with(Arc::new(LoggingGateway));

    let earning = engine
        .record_earning("provider-1", "case-1", "client-1", units(10_000))
        .await
        .unwrap();

    assert_eq!(earning.net, units(8_500));
    assert_eq!(earning.status, EarningStatus::Pending);
    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.pending, units(8_500));
    assert_eq!(wallet.available, Amount::ZERO);
    assert_eq!(wallet.total_earned, units(8_500));
    assert_eq!(ledger_sum(&engine, "provider-1").await, wallet.balance());
}

#[tokio::test]
async fn clearing_after_holding_period() {
    let (engine, clock) = engine_with(Arc::new(LoggingGateway));
    let earning = engine
        .record_earning("provider-1", "case-1", "client-1", units(10_000))
        .await
        .unwrap();

    clock.advance(Duration::days(7));
    engine.sweep().await;

    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.pending, Amount::ZERO);
    assert_eq!(wallet.available, units(8_500));
    assert_eq!(
        engine.earning(earning.id).await.unwrap().status,
        EarningStatus::Available
    );
    assert_eq!(ledger_sum(&engine, "provider-1").await, wallet.balance());
}

#[tokio::test]
async fn successful_payout() {
    let (engine, clock) = engine_with(Arc::new(LoggingGateway));
    let method = cleared(&engine, &clock, "provider-1").await;

    let payout = engine
        .submit_payout("provider-1", units(5_000), method)
        .await
        .unwrap();
    assert_eq!(
        engine.get_wallet("provider-1").unwrap().available,
        units(3_500)
    );

    engine
        .on_settlement(payout.id, SettlementOutcome::Completed)
        .await
        .unwrap();

    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.available, units(3_500));
    assert_eq!(wallet.total_withdrawn, units(5_000));
    assert_eq!(
        engine.payout(payout.id).await.unwrap().status,
        PayoutStatus::Completed
    );

    let entries: Vec<_> = engine
        .stream_since("provider-1", 0)
        .await
        .unwrap()
        .collect()
        .await;
    let payout_entry = entries.iter().find(|e| e.id == payout.entry).unwrap();
    assert_eq!(payout_entry.kind, EntryKind::Payout);
    assert_eq!(payout_entry.status, EntryStatus::Completed);
    assert_eq!(payout_entry.amount, -units(5_000));
}

#[tokio::test]
async fn failed_payout_is_compensated() {
    let (engine, clock) = engine_with(Arc::new(DecliningGateway));
    let method = cleared(&engine, &clock, "provider-1").await;

    let err = engine
        .submit_payout("provider-1", units(5_000), method)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Payout(PayoutError::SettlementFailed { .. })
    ));

    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.available, units(8_500));
    assert_eq!(wallet.total_withdrawn, Amount::ZERO);

    let payouts = engine.payouts("provider-1").await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Failed);

    let entries: Vec<_> = engine
        .stream_since("provider-1", 0)
        .await
        .unwrap()
        .collect()
        .await;
    let payout_entry = entries.iter().find(|e| e.id == payouts[0].entry).unwrap();
    assert_eq!(payout_entry.status, EntryStatus::Failed);
    assert!(
        entries
            .iter()
            .any(|e| e.kind == EntryKind::Refund && e.amount == units(5_000))
    );
    assert_eq!(ledger_sum(&engine, "provider-1").await, wallet.balance());
}

#[tokio::test]
async fn payout_below_minimum() {
    let (engine, clock) = engine_with(Arc::new(LoggingGateway));
    let method = cleared(&engine, &clock, "provider-1").await;

    let err = engine
        .submit_payout("provider-1", units(500), method)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Payout(PayoutError::BelowMinimumPayout {
            minimum: units(1_000),
            requested: units(500),
        })
    );
    assert!(engine.payouts("provider-1").await.unwrap().is_empty());
    assert_eq!(
        engine.get_wallet("provider-1").unwrap().available,
        units(8_500)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payouts_never_overdraw() {
    let (engine, clock) = engine_with(Arc::new(LoggingGateway));
    let engine = Arc::new(engine);
    let method = cleared(&engine, &clock, "provider-1").await;

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .request_payout("provider-1", units(6_000), method)
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::Payout(PayoutError::InsufficientBalance { .. })) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((accepted, rejected), (1, 1));
    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.available, units(2_500));
    assert_eq!(ledger_sum(&engine, "provider-1").await, wallet.balance());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_earnings_on_one_wallet_all_land() {
    let (engine, _) = engine_with(Arc::new(LoggingGateway));
    let engine = Arc::new(engine);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .record_earning("provider-1", format!("case-{i}"), "client-1", units(100))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let wallet = engine.get_wallet("provider-1").unwrap();
    assert_eq!(wallet.pending, units(1_700));
    assert_eq!(wallet.total_earned, units(1_700));
    assert_eq!(ledger_sum(&engine, "provider-1").await, wallet.balance());
}

#[tokio::test]
async fn totals_never_decrease_for_subscribers() {
    let (engine, clock) = engine_with(Arc::new(LoggingGateway));
    let mut updates = engine.subscribe("provider-1");
    let method = cleared(&engine, &clock, "provider-1").await;

    let payout = engine
        .submit_payout("provider-1", units(2_000), method)
        .await
        .unwrap();
    engine
        .on_settlement(payout.id, SettlementOutcome::Completed)
        .await
        .unwrap();

    let last = engine.get_wallet("provider-1").unwrap();
    let mut previous = updates.next().await.unwrap();
    while previous.revision < last.revision {
        let next = updates.next().await.unwrap();
        assert!(next.revision > previous.revision);
        assert!(next.total_earned >= previous.total_earned);
        assert!(next.total_withdrawn >= previous.total_withdrawn);
        previous = next;
    }
    assert_eq!(previous, last);
}

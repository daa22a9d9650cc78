//! Background holding-period sweep.
//!
//! Clearing is never computed on read: a periodic task moves due earnings to
//! `Available` (one ledger transition per earning) and fails payouts whose
//! settlement never arrived.

use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::Engine;

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Earnings moved from pending to available.
    pub cleared: usize,
    /// Pending payouts failed for lack of a settlement callback.
    pub expired: usize,
    /// Wallets that were busy or halted.
    pub skipped: usize,
}

/// Handle to a running sweeper task.
pub struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Stop after the pass in progress, if any.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Run one full pass: clear due earnings, then expire stale payouts.
pub async fn run_once(engine: &Engine) -> SweepReport {
    let mut report = engine.sweep().await;
    report.expired = engine.expire_stale_payouts().await;
    report
}

/// Start the periodic sweep at the engine's configured `sweep_interval`.
/// The first pass runs immediately.
pub fn spawn_sweeper(engine: Arc<Engine>) -> Sweeper {
    let (tx, mut rx) = oneshot::channel();
    let every = engine.config().sweep_interval();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let report = run_once(&engine).await;
                    if report != SweepReport::default() {
                        info!(
                            cleared = report.cleared,
                            expired = report.expired,
                            skipped = report.skipped,
                            "holding sweep finished"
                        );
                    }
                }
            }
        }
    });

    Sweeper {
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LedgerConfig;
    use crate::gateway::LoggingGateway;
    use crate::{Amount, EarningStatus};
    use chrono::{Duration as Days, Utc};
    use std::time::Duration;

    #[tokio::test]
    async fn sweeper_clears_due_earnings_in_background() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = LedgerConfig {
            sweep_interval_secs: 1,
            ..LedgerConfig::default()
        };
        let engine = Arc::new(Engine::with_clock(
            config,
            Arc::new(LoggingGateway),
            clock.clone(),
        ));
        let earning = engine
            .record_earning("p1", "case-1", "c1", Amount::from_units(10_000))
            .await
            .unwrap();
        clock.advance(Days::days(7));

        let sweeper = spawn_sweeper(Arc::clone(&engine));
        let mut cleared = false;
        for _ in 0..100 {
            if engine.earning(earning.id).await.unwrap().status == EarningStatus::Available {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.shutdown().await;

        assert!(cleared);
        let wallet = engine.get_wallet("p1").unwrap();
        assert_eq!(wallet.available, Amount::from_units(8_500));
        assert_eq!(wallet.pending, Amount::ZERO);
    }

    #[tokio::test]
    async fn run_once_reports_cleared_and_expired() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Engine::with_clock(
            LedgerConfig::default(),
            Arc::new(LoggingGateway),
            clock.clone(),
        );
        engine
            .record_earning("p1", "case-1", "c1", Amount::from_units(10_000))
            .await
            .unwrap();

        clock.advance(Days::days(6));
        assert_eq!(run_once(&engine).await, SweepReport::default());

        clock.advance(Days::days(1));
        let report = run_once(&engine).await;
        assert_eq!(report.cleared, 1);
        assert_eq!(report.expired, 0);
    }
}

//! Earnings ledger engine.
//!
//! The engine owns one [`WalletBook`] per provider behind its own lock. Every
//! mutation (whether it comes from a synchronous call or from the event feed)
//! locks exactly one wallet, runs to completion without awaiting, is verified
//! against the ledger, and is then published to subscribers. Different wallets
//! never contend with each other.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::amount::FeeRate;
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::gateway::SettlementGateway;
use crate::model::{
    CaseId, ClientId, DisputeOutcome, Earning, EarningId, Event, LedgerEntry, PayoutId,
    ProviderId, WalletSnapshot,
};
use crate::payment_method::PaymentMethods;
use crate::sweep::SweepReport;
use crate::sync::{SnapshotStream, WalletFeed};

mod book;
use book::WalletBook;

mod state;
pub use state::{Balances, Wallet};

mod error;
pub use error::{EngineError, PayoutError};

mod payout;
pub use payout::SettlementDisposition;

/// A wallet's book and its snapshot feed.
struct WalletSlot {
    provider: ProviderId,
    book: Mutex<WalletBook>,
    feed: WalletFeed,
}

impl WalletSlot {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            book: Mutex::new(WalletBook::new(provider.to_string())),
            feed: WalletFeed::new(provider.to_string()),
        }
    }
}

pub struct Engine {
    config: LedgerConfig,
    fee_rate: FeeRate,
    minimum_payout: Amount,
    wallets: DashMap<ProviderId, Arc<WalletSlot>>,
    /// Routes dispute events to the owning wallet.
    earning_owner: DashMap<EarningId, ProviderId>,
    /// Routes settlement callbacks to the owning wallet.
    payout_owner: DashMap<PayoutId, ProviderId>,
    methods: PaymentMethods,
    gateway: Arc<dyn SettlementGateway>,
    clock: Arc<dyn Clock>,
}

/// Public API
impl Engine {
    pub fn new(config: LedgerConfig, gateway: Arc<dyn SettlementGateway>) -> Self {
        Self::with_clock(config, gateway, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: LedgerConfig,
        gateway: Arc<dyn SettlementGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fee_rate: config.fee_rate(),
            minimum_payout: config.minimum_payout(),
            config,
            wallets: DashMap::new(),
            earning_owner: DashMap::new(),
            payout_owner: DashMap::new(),
            methods: PaymentMethods::new(),
            gateway,
            clock,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Payment-method registry consulted for payout validation.
    pub fn methods(&self) -> &PaymentMethods {
        &self.methods
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run the engine over an inbound event feed until it ends.
    pub async fn run(&self, mut stream: impl Stream<Item = Event> + Unpin) {
        while let Some(event) = stream.next().await {
            // a rejected event must not stop the feed; `apply` already logged it
            let _ = self.apply(event).await;
        }
    }

    /// Apply a single inbound event.
    pub async fn apply(&self, event: Event) -> Result<(), EngineError> {
        let (kind, result) = match event {
            Event::EarningCreated {
                provider,
                case,
                client,
                gross,
            } => (
                "earning",
                self.record_earning(&provider, case, client, gross)
                    .await
                    .map(|_| ()),
            ),
            Event::DisputeOpened { earning } => {
                ("dispute", self.open_dispute(earning).await.map(|_| ()))
            }
            Event::DisputeResolved { earning, outcome } => (
                "dispute resolution",
                self.resolve_dispute(earning, outcome).await.map(|_| ()),
            ),
            Event::Settlement { payout, outcome } => (
                "settlement",
                self.on_settlement(payout, outcome).await.map(|_| ()),
            ),
            Event::HoldingSweep => {
                self.sweep().await;
                ("sweep", Ok(()))
            }
        };

        if let Err(e) = &result {
            warn!(reason = %e, "{kind} event skipped");
        }
        result
    }

    /// Record a completed case: computes the net amount and credits the pending bucket.
    pub async fn record_earning(
        &self,
        provider: &str,
        case: impl Into<CaseId>,
        client: impl Into<ClientId>,
        gross: Amount,
    ) -> Result<Earning, EngineError> {
        let (case, client) = (case.into(), client.into());
        let fee_rate = self.fee_rate;
        let owners = &self.earning_owner;
        let slot = self.slot_or_create(provider);

        let earning = self
            .mutate(&slot, |book, now| {
                let earning = book.record_earning(case, client, gross, fee_rate, now)?;
                owners.insert(earning.id, book.provider.clone());
                Ok(earning)
            })
            .await?;

        info!(
            provider,
            earning = %earning.id,
            gross = %earning.gross,
            net = %earning.net,
            "earning recorded"
        );
        Ok(earning)
    }

    pub async fn open_dispute(&self, earning: EarningId) -> Result<Earning, EngineError> {
        let slot = self.slot_for_earning(earning)?;
        let updated = self
            .mutate(&slot, |book, now| book.open_dispute(earning, now))
            .await?;

        info!(provider = %slot.provider, earning = %earning, amount = %updated.net, "earning put on hold");
        Ok(updated)
    }

    pub async fn resolve_dispute(
        &self,
        earning: EarningId,
        outcome: DisputeOutcome,
    ) -> Result<Earning, EngineError> {
        let slot = self.slot_for_earning(earning)?;
        let updated = self
            .mutate(&slot, |book, now| book.resolve_dispute(earning, outcome, now))
            .await?;

        info!(
            provider = %slot.provider,
            earning = %earning,
            status = %updated.status,
            "dispute resolved"
        );
        Ok(updated)
    }

    /// Clear every pending earning whose holding period has elapsed.
    ///
    /// Wallets that cannot be locked or are halted are skipped and picked up next time.
    pub async fn sweep(&self) -> SweepReport {
        let holding = self.config.holding_period();
        let mut report = SweepReport::default();

        for slot in self.slots() {
            match self
                .mutate(&slot, |book, now| book.clear_due(holding, now))
                .await
            {
                Ok(cleared) => {
                    for earning in &cleared {
                        info!(provider = %slot.provider, earning = %earning, "earning cleared");
                    }
                    report.cleared += cleared.len();
                }
                Err(e) => {
                    warn!(provider = %slot.provider, reason = %e, "sweep skipped wallet");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Latest consistent snapshot, `None` if the provider has no wallet yet.
    pub fn get_wallet(&self, provider: &str) -> Option<WalletSnapshot> {
        self.slot(provider).map(|slot| slot.feed.current())
    }

    /// Subscribe to a wallet's snapshots. Subscribing before the first earning is allowed.
    pub fn subscribe(&self, provider: &str) -> SnapshotStream {
        self.slot_or_create(provider).feed.subscribe()
    }

    /// Current snapshot of every wallet, ordered by provider.
    pub fn snapshots(&self) -> Vec<WalletSnapshot> {
        let mut snapshots: Vec<WalletSnapshot> =
            self.slots().iter().map(|slot| slot.feed.current()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    /// Ledger entries of `provider` after `cursor` (a `seq`, 0 for all), for replay.
    pub async fn stream_since(
        &self,
        provider: &str,
        cursor: u64,
    ) -> Result<impl Stream<Item = LedgerEntry> + use<>, EngineError> {
        let entries = match self.slot(provider) {
            Some(slot) => self.lock(&slot).await?.journal.since(cursor).to_vec(),
            None => Vec::new(),
        };
        Ok(tokio_stream::iter(entries))
    }

    pub async fn earning(&self, id: EarningId) -> Result<Earning, EngineError> {
        let slot = self.slot_for_earning(id)?;
        let book = self.lock(&slot).await?;
        book.earning(id).cloned().ok_or(EngineError::EarningNotFound(id))
    }

    /// All earnings of `provider` in creation order.
    pub async fn earnings(&self, provider: &str) -> Result<Vec<Earning>, EngineError> {
        match self.slot(provider) {
            Some(slot) => Ok(self.lock(&slot).await?.earnings().to_vec()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn is_halted(&self, provider: &str) -> Result<bool, EngineError> {
        match self.slot(provider) {
            Some(slot) => Ok(self.lock(&slot).await?.halted.is_some()),
            None => Ok(false),
        }
    }

    /// Rebuild the wallet aggregate from its ledger and resume a halted wallet if consistent.
    pub async fn reconcile(&self, provider: &str) -> Result<WalletSnapshot, EngineError> {
        let Some(slot) = self.slot(provider) else {
            return Ok(WalletSnapshot::empty(provider.to_string()));
        };
        let mut book = self.lock(&slot).await?;
        book.rebuild()?;

        let snapshot = book.snapshot();
        slot.feed.publish(snapshot.clone());
        info!(provider, revision = snapshot.revision, "wallet reconciled from ledger");
        Ok(snapshot)
    }
}

/// Private API
impl Engine {
    fn slot(&self, provider: &str) -> Option<Arc<WalletSlot>> {
        self.wallets.get(provider).map(|slot| Arc::clone(slot.value()))
    }

    fn slot_or_create(&self, provider: &str) -> Arc<WalletSlot> {
        if let Some(slot) = self.slot(provider) {
            return slot;
        }
        let slot = self
            .wallets
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(WalletSlot::new(provider)));
        Arc::clone(slot.value())
    }

    fn slots(&self) -> Vec<Arc<WalletSlot>> {
        self.wallets
            .iter()
            .map(|slot| Arc::clone(slot.value()))
            .collect()
    }

    fn slot_for_earning(&self, id: EarningId) -> Result<Arc<WalletSlot>, EngineError> {
        let provider = self
            .earning_owner
            .get(&id)
            .map(|owner| owner.value().clone())
            .ok_or(EngineError::EarningNotFound(id))?;
        self.slot(&provider).ok_or(EngineError::EarningNotFound(id))
    }

    fn slot_for_payout(&self, id: PayoutId) -> Result<Arc<WalletSlot>, EngineError> {
        let provider = self
            .payout_owner
            .get(&id)
            .map(|owner| owner.value().clone())
            .ok_or(EngineError::PayoutNotFound(id))?;
        self.slot(&provider).ok_or(EngineError::PayoutNotFound(id))
    }

    /// Acquire the single-writer lock of a wallet, giving up after `lock_timeout`.
    async fn lock<'a>(&self, slot: &'a WalletSlot) -> Result<MutexGuard<'a, WalletBook>, EngineError> {
        tokio::time::timeout(self.config.lock_timeout(), slot.book.lock())
            .await
            .map_err(|_| {
                warn!(provider = %slot.provider, "wallet lock not acquired in time");
                EngineError::ConcurrentModificationConflict(slot.provider.clone())
            })
    }

    /// Run one atomic unit against a wallet.
    ///
    /// `f` must validate before it mutates. If the aggregate changed, the book is
    /// verified and the resulting snapshot published before the lock is released.
    async fn mutate<T>(
        &self,
        slot: &WalletSlot,
        f: impl FnOnce(&mut WalletBook, DateTime<Utc>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut book = self.lock(slot).await?;
        if let Some(reason) = &book.halted {
            return Err(EngineError::WalletHalted {
                provider: slot.provider.clone(),
                reason: reason.clone(),
            });
        }

        let revision = book.wallet.revision();
        let result = f(&mut *book, self.clock.now());

        if book.wallet.revision() != revision {
            book.verify()?;
            slot.feed.publish(book.snapshot());
        }
        result
    }
}

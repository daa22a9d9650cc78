//! Drives the engine from a recorded command stream on a simulated clock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::clock::ManualClock;
use crate::config::LedgerConfig;
use crate::csv::Command;
use crate::gateway::SettlementGateway;
use crate::model::{CaseId, EarningId, MethodKind, PayoutId, ProviderId};
use crate::payment_method::MethodError;
use crate::sweep;
use crate::{Engine, EngineError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Method(#[from] MethodError),

    #[error("no earning recorded for case {case} of {provider}")]
    UnknownCase { provider: ProviderId, case: CaseId },

    #[error("no payout labelled {label} for {provider}")]
    UnknownPayout { provider: ProviderId, label: String },

    #[error("payout label {label} already used by {provider}")]
    DuplicateLabel { provider: ProviderId, label: String },

    #[error("{0} has no payment method")]
    NoPaymentMethod(ProviderId),
}

pub struct Replay {
    engine: Engine,
    clock: Arc<ManualClock>,
    earnings: HashMap<(ProviderId, CaseId), EarningId>,
    payouts: HashMap<(ProviderId, String), PayoutId>,
}

impl Replay {
    pub fn new(
        config: LedgerConfig,
        gateway: Arc<dyn SettlementGateway>,
        start: DateTime<Utc>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        Self {
            engine: Engine::with_clock(config, gateway, clock.clone()),
            clock,
            earnings: HashMap::new(),
            payouts: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Apply every command of the stream; failing commands are logged and skipped.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            if let Err(e) = self.apply(command).await {
                warn!(reason = %e, "command skipped");
            }
        }
    }

    pub async fn apply(&mut self, command: Command) -> Result<(), ReplayError> {
        match command {
            Command::RegisterMethod { provider, account } => {
                self.engine.methods().register(
                    &provider,
                    MethodKind::BankAccount,
                    &provider,
                    &account,
                    false,
                )?;
            }
            Command::Earning {
                provider,
                case,
                gross,
            } => {
                let earning = self
                    .engine
                    .record_earning(&provider, case.clone(), "replay", gross)
                    .await?;
                self.earnings.insert((provider, case), earning.id);
            }
            Command::Advance(by) => {
                self.clock.advance(by);
                debug!(now = %self.engine.now(), "clock advanced");
            }
            Command::Sweep => {
                sweep::run_once(&self.engine).await;
            }
            Command::OpenDispute { provider, case } => {
                let earning = self.earning(provider, case)?;
                self.engine.open_dispute(earning).await?;
            }
            Command::ResolveDispute {
                provider,
                case,
                outcome,
            } => {
                let earning = self.earning(provider, case)?;
                self.engine.resolve_dispute(earning, outcome).await?;
            }
            Command::Payout {
                provider,
                label,
                amount,
            } => {
                let key = (provider, label);
                if self.payouts.contains_key(&key) {
                    let (provider, label) = key;
                    return Err(ReplayError::DuplicateLabel { provider, label });
                }
                let method = self
                    .engine
                    .methods()
                    .default_for(&key.0)
                    .ok_or_else(|| ReplayError::NoPaymentMethod(key.0.clone()))?;

                let payout = self
                    .engine
                    .request_payout(&key.0, amount, method.id)
                    .await?;
                self.payouts.insert(key, payout.id);
                self.engine.dispatch_payout(payout.id).await?;
            }
            Command::Settle {
                provider,
                label,
                outcome,
            } => {
                let payout = self.payout(provider, label)?;
                self.engine.on_settlement(payout, outcome).await?;
            }
            Command::Cancel { provider, label } => {
                let payout = self.payout(provider, label)?;
                self.engine.cancel_payout(payout).await?;
            }
        }
        Ok(())
    }

    fn earning(&self, provider: ProviderId, case: CaseId) -> Result<EarningId, ReplayError> {
        let key = (provider, case);
        match self.earnings.get(&key) {
            Some(id) => Ok(*id),
            None => {
                let (provider, case) = key;
                Err(ReplayError::UnknownCase { provider, case })
            }
        }
    }

    fn payout(&self, provider: ProviderId, label: String) -> Result<PayoutId, ReplayError> {
        let key = (provider, label);
        match self.payouts.get(&key) {
            Some(id) => Ok(*id),
            None => {
                let (provider, label) = key;
                Err(ReplayError::UnknownPayout { provider, label })
            }
        }
    }
}

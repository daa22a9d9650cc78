//! Payout request processing.
//!
//! A payout moves through three steps, each its own atomic unit on the wallet:
//! 1. `request_payout` reserves the funds (PAYOUT entry, `Pending`).
//! 2. `dispatch_payout` hands it to the gateway outside the lock; a rejection
//!    or timeout compensates immediately.
//! 3. `on_settlement` applies the gateway's final outcome exactly once.

use tracing::{debug, error, info, warn};

use super::{Engine, EngineError, PayoutError, WalletSlot};
use crate::Amount;
use crate::model::{MethodId, PayoutId, PayoutRequest, PayoutStatus, SettlementOutcome};

/// What a settlement callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementDisposition {
    /// The outcome was applied to the ledger.
    Applied,
    /// The payout already carries this outcome; nothing changed.
    Duplicate,
    /// The outcome contradicts the payout's final state (e.g. a confirmation
    /// arriving after a timeout-driven failure). Nothing changed; alert raised.
    Conflict { recorded: PayoutStatus },
}

impl Engine {
    /// Validate and reserve a payout. No external call is made.
    pub async fn request_payout(
        &self,
        provider: &str,
        amount: Amount,
        method: MethodId,
    ) -> Result<PayoutRequest, EngineError> {
        if amount < self.minimum_payout {
            return Err(PayoutError::BelowMinimumPayout {
                minimum: self.minimum_payout,
                requested: amount,
            }
            .into());
        }

        self.methods
            .resolve(provider, method)
            .map_err(|_| PayoutError::UnknownOrUnownedPaymentMethod(method))?;

        let Some(slot) = self.slot(provider) else {
            return Err(PayoutError::InsufficientBalance {
                available: Amount::ZERO,
                requested: amount,
            }
            .into());
        };

        let owners = &self.payout_owner;
        let payout = self
            .mutate(&slot, |book, now| {
                let payout = book.reserve_payout(amount, method, now)?;
                owners.insert(payout.id, book.provider.clone());
                Ok(payout)
            })
            .await?;

        info!(provider, payout = %payout.id, amount = %amount, "payout reserved");
        Ok(payout)
    }

    /// Submit a reserved payout to the settlement gateway.
    ///
    /// Returns the acknowledged payout. A gateway rejection or timeout fails the
    /// payout, restores the funds, and returns `SettlementFailed`.
    ///
    /// The payout is claimed under the wallet lock before the gateway is
    /// called, so repeated or concurrent dispatches of the same payout submit
    /// it once. The losers get the payout's current state back.
    pub async fn dispatch_payout(&self, id: PayoutId) -> Result<PayoutRequest, EngineError> {
        let slot = self.slot_for_payout(id)?;
        let (payout, claimed) = self
            .mutate(&slot, |book, now| book.mark_dispatched(id, now))
            .await?;
        if !claimed {
            debug!(payout = %id, status = %payout.status, "payout already dispatched, skipping gateway");
            return Ok(payout);
        }

        let method = match self.methods.resolve(&payout.provider, payout.method) {
            Ok(method) => method,
            Err(_) => {
                return self
                    .fail_dispatch(&slot, id, "payment method no longer exists".to_string())
                    .await;
            }
        };

        let submission = tokio::time::timeout(
            self.config.gateway_timeout(),
            self.gateway.submit_payout(id, payout.amount, &method),
        )
        .await;

        match submission {
            Ok(Ok(ack)) => {
                let payout = self
                    .mutate(&slot, |book, now| book.acknowledge(id, &ack, now))
                    .await?;
                if payout.status == PayoutStatus::Pending {
                    info!(payout = %id, reference = %ack.reference, "payout acknowledged by gateway");
                } else {
                    warn!(payout = %id, status = %payout.status, "gateway acknowledged a payout that is already final");
                }
                Ok(payout)
            }
            Ok(Err(e)) => self.fail_dispatch(&slot, id, e.to_string()).await,
            Err(_) => {
                self.fail_dispatch(&slot, id, "gateway timed out".to_string())
                    .await
            }
        }
    }

    /// Request and dispatch in one call.
    pub async fn submit_payout(
        &self,
        provider: &str,
        amount: Amount,
        method: MethodId,
    ) -> Result<PayoutRequest, EngineError> {
        let payout = self.request_payout(provider, amount, method).await?;
        self.dispatch_payout(payout.id).await
    }

    /// Settlement webhook. Safe to call any number of times for the same payout.
    pub async fn on_settlement(
        &self,
        id: PayoutId,
        outcome: SettlementOutcome,
    ) -> Result<SettlementDisposition, EngineError> {
        let slot = self.slot_for_payout(id)?;
        let disposition = self
            .mutate(&slot, |book, now| {
                let status = book
                    .payout(id)
                    .map(|p| p.status)
                    .ok_or(EngineError::PayoutNotFound(id))?;

                match (status, &outcome) {
                    (PayoutStatus::Pending, SettlementOutcome::Completed) => {
                        book.complete_payout(id, now)?;
                        Ok(SettlementDisposition::Applied)
                    }
                    (PayoutStatus::Pending, SettlementOutcome::Failed { reason }) => {
                        book.compensate_payout(id, PayoutStatus::Failed, reason, now)?;
                        Ok(SettlementDisposition::Applied)
                    }
                    (PayoutStatus::Completed, SettlementOutcome::Completed)
                    | (
                        PayoutStatus::Failed | PayoutStatus::Cancelled,
                        SettlementOutcome::Failed { .. },
                    ) => Ok(SettlementDisposition::Duplicate),
                    (recorded, _) => Ok(SettlementDisposition::Conflict { recorded }),
                }
            })
            .await?;

        match disposition {
            SettlementDisposition::Applied => {
                info!(provider = %slot.provider, payout = %id, outcome = ?outcome, "settlement applied");
            }
            SettlementDisposition::Duplicate => {
                debug!(payout = %id, "duplicate settlement callback ignored");
            }
            SettlementDisposition::Conflict { recorded } => {
                error!(
                    provider = %slot.provider,
                    payout = %id,
                    recorded = %recorded,
                    outcome = ?outcome,
                    "settlement contradicts final payout state, manual review required"
                );
            }
        }
        Ok(disposition)
    }

    /// Cancel a payout that has not been handed to the gateway. Funds are restored.
    pub async fn cancel_payout(&self, id: PayoutId) -> Result<PayoutRequest, EngineError> {
        let slot = self.slot_for_payout(id)?;
        let payout = self
            .mutate(&slot, |book, now| {
                let payout = book.payout(id).ok_or(EngineError::PayoutNotFound(id))?;
                if payout.status != PayoutStatus::Pending {
                    return Err(PayoutError::NotCancellable {
                        payout: id,
                        reason: format!("payout is {}", payout.status),
                    }
                    .into());
                }
                if payout.acknowledged_at.is_some() {
                    return Err(PayoutError::NotCancellable {
                        payout: id,
                        reason: "gateway already acknowledged receipt".to_string(),
                    }
                    .into());
                }
                if payout.dispatched_at.is_some() {
                    return Err(PayoutError::NotCancellable {
                        payout: id,
                        reason: "payout already submitted to the gateway".to_string(),
                    }
                    .into());
                }
                book.compensate_payout(id, PayoutStatus::Cancelled, "cancelled by provider", now)
            })
            .await?;

        info!(provider = %slot.provider, payout = %id, amount = %payout.amount, "payout cancelled");
        Ok(payout)
    }

    /// Fail every pending payout older than the settlement timeout.
    pub async fn expire_stale_payouts(&self) -> usize {
        let timeout = self.config.settlement_timeout();
        let mut expired = 0;

        for slot in self.slots() {
            let result = self
                .mutate(&slot, |book, now| {
                    let stale = book.stale_payouts(now - timeout);
                    for id in &stale {
                        book.compensate_payout(*id, PayoutStatus::Failed, "settlement timed out", now)?;
                    }
                    Ok(stale)
                })
                .await;

            match result {
                Ok(stale) => {
                    for id in &stale {
                        warn!(provider = %slot.provider, payout = %id, "payout settlement timed out, funds restored");
                    }
                    expired += stale.len();
                }
                Err(e) => {
                    warn!(provider = %slot.provider, reason = %e, "payout expiry skipped wallet");
                }
            }
        }
        expired
    }

    pub async fn payout(&self, id: PayoutId) -> Result<PayoutRequest, EngineError> {
        let slot = self.slot_for_payout(id)?;
        let book = self.lock(&slot).await?;
        book.payout(id).cloned().ok_or(EngineError::PayoutNotFound(id))
    }

    /// All payouts of `provider`, oldest first.
    pub async fn payouts(&self, provider: &str) -> Result<Vec<PayoutRequest>, EngineError> {
        let Some(slot) = self.slot(provider) else {
            return Ok(Vec::new());
        };
        let book = self.lock(&slot).await?;
        let mut payouts: Vec<PayoutRequest> = book.payouts().cloned().collect();
        payouts.sort_by_key(|p| p.requested_at);
        Ok(payouts)
    }

    async fn fail_dispatch(
        &self,
        slot: &WalletSlot,
        id: PayoutId,
        reason: String,
    ) -> Result<PayoutRequest, EngineError> {
        warn!(provider = %slot.provider, payout = %id, reason = %reason, "payout dispatch failed, restoring funds");
        self.mutate(slot, |book, now| {
            // the callback or a cancellation may have finalized it in the meantime
            if book.payout(id).map(|p| p.status) == Some(PayoutStatus::Pending) {
                book.compensate_payout(id, PayoutStatus::Failed, &reason, now)?;
            }
            Ok(())
        })
        .await?;

        Err(PayoutError::SettlementFailed { payout: id, reason }.into())
    }
}

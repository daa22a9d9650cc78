//! Everything owned by one wallet, mutated as a single unit under the wallet lock.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{error, warn};
use uuid::Uuid;

use super::error::{EngineError, PayoutError};
use super::state::Wallet;
use crate::Amount;
use crate::amount::FeeRate;
use crate::gateway::GatewayAck;
use crate::journal::Journal;
use crate::lifecycle::{self, EarningEvent};
use crate::model::{
    Allocation, Bucket, CaseId, ClientId, DisputeOutcome, Earning, EarningId, EarningStatus,
    EntryId, EntryKind, EntryStatus, LedgerEntry, MethodId, PayoutId, PayoutRequest, PayoutStatus,
    ProviderId, WalletSnapshot,
};

pub(crate) struct WalletBook {
    pub(crate) provider: ProviderId,
    pub(crate) wallet: Wallet,
    pub(crate) journal: Journal,
    earnings: Vec<Earning>,
    earning_index: HashMap<EarningId, usize>,
    cases: HashMap<CaseId, EarningId>,
    payouts: HashMap<PayoutId, PayoutRequest>,
    /// Set when an integrity check failed; blocks every further mutation.
    pub(crate) halted: Option<String>,
}

/// Read access
impl WalletBook {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            wallet: Wallet::new(provider.clone()),
            provider,
            journal: Journal::new(),
            earnings: Vec::new(),
            earning_index: HashMap::new(),
            cases: HashMap::new(),
            payouts: HashMap::new(),
            halted: None,
        }
    }

    pub fn earning(&self, id: EarningId) -> Option<&Earning> {
        self.earning_index.get(&id).map(|idx| &self.earnings[*idx])
    }

    /// Earnings in creation order.
    pub fn earnings(&self) -> &[Earning] {
        &self.earnings
    }

    pub fn payout(&self, id: PayoutId) -> Option<&PayoutRequest> {
        self.payouts.get(&id)
    }

    pub fn payouts(&self) -> impl Iterator<Item = &PayoutRequest> {
        self.payouts.values()
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        self.wallet.snapshot()
    }

    /// Pending payouts requested at or before `deadline`.
    pub fn stale_payouts(&self, deadline: DateTime<Utc>) -> Vec<PayoutId> {
        let mut stale: Vec<&PayoutRequest> = self
            .payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Pending && p.requested_at <= deadline)
            .collect();
        stale.sort_by_key(|p| p.requested_at);
        stale.into_iter().map(|p| p.id).collect()
    }

    fn existing_earning(&self, id: EarningId) -> Result<&Earning, EngineError> {
        self.earning(id).ok_or(EngineError::EarningNotFound(id))
    }

    fn earning_mut(&mut self, id: EarningId) -> Result<&mut Earning, EngineError> {
        let idx = *self
            .earning_index
            .get(&id)
            .ok_or(EngineError::EarningNotFound(id))?;
        Ok(&mut self.earnings[idx])
    }

    fn existing_payout(&self, id: PayoutId) -> Result<&PayoutRequest, EngineError> {
        self.payouts.get(&id).ok_or(EngineError::PayoutNotFound(id))
    }

    fn payout_mut(&mut self, id: PayoutId) -> Result<&mut PayoutRequest, EngineError> {
        self.payouts
            .get_mut(&id)
            .ok_or(EngineError::PayoutNotFound(id))
    }
}

/// Ledger postings
impl WalletBook {
    /// Append one entry and apply it to the aggregate.
    fn post(
        &mut self,
        kind: EntryKind,
        bucket: Bucket,
        amount: Amount,
        status: EntryStatus,
        reference: Uuid,
        at: DateTime<Utc>,
    ) -> Result<EntryId, EngineError> {
        let entry = LedgerEntry::new(
            self.provider.clone(),
            kind,
            bucket,
            amount,
            status,
            reference,
            at,
        );
        let stored = self.journal.append(entry)?;
        let id = stored.id;
        if !self.wallet.apply(stored) {
            warn!(provider = %self.provider, entry = %id, "entry already applied to aggregate");
        }
        Ok(id)
    }

    /// Move `amount` between buckets as a debit/credit pair.
    fn transfer(
        &mut self,
        kind: EntryKind,
        from: Bucket,
        to: Bucket,
        amount: Amount,
        reference: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.post(kind, from, -amount, EntryStatus::Completed, reference, at)?;
        self.post(kind, to, amount, EntryStatus::Completed, reference, at)?;
        Ok(())
    }
}

/// Earning lifecycle
impl WalletBook {
    pub fn record_earning(
        &mut self,
        case: CaseId,
        client: ClientId,
        gross: Amount,
        fee_rate: FeeRate,
        at: DateTime<Utc>,
    ) -> Result<Earning, EngineError> {
        if !gross.is_positive() || gross > Amount::MAX_GROSS {
            return Err(EngineError::InvalidAmount(gross));
        }
        if let Some(existing) = self.cases.get(&case) {
            return Err(EngineError::DuplicateCase {
                case,
                earning: *existing,
            });
        }

        let earning = Earning::new(self.provider.clone(), case, client, gross, fee_rate, at);
        // every bucket is bounded by total_earned
        if self.wallet.balances().total_earned.checked_add(earning.net).is_none() {
            return Err(EngineError::InvalidAmount(gross));
        }
        self.post(
            EntryKind::Earning,
            Bucket::Pending,
            earning.net,
            EntryStatus::Completed,
            earning.id,
            at,
        )?;

        self.cases.insert(earning.case.clone(), earning.id);
        self.earning_index.insert(earning.id, self.earnings.len());
        self.earnings.push(earning.clone());
        Ok(earning)
    }

    /// Clear every pending earning whose holding period has elapsed at `now`.
    pub fn clear_due(
        &mut self,
        holding: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<EarningId>, EngineError> {
        let due: Vec<EarningId> = self
            .earnings
            .iter()
            .filter(|e| e.status == EarningStatus::Pending && e.created_at + holding <= now)
            .map(|e| e.id)
            .collect();

        for id in &due {
            let earning = self.existing_earning(*id)?;
            let next = lifecycle::transition(earning, EarningEvent::Clear)?;
            let net = earning.net;

            self.transfer(EntryKind::Earning, Bucket::Pending, Bucket::Available, net, *id, now)?;

            let earning = self.earning_mut(*id)?;
            earning.status = next;
            earning.cleared_at = Some(now);
        }
        Ok(due)
    }

    /// Freeze a pending earning into escrow.
    pub fn open_dispute(&mut self, id: EarningId, now: DateTime<Utc>) -> Result<Earning, EngineError> {
        let earning = self.existing_earning(id)?;
        let next = lifecycle::transition(earning, EarningEvent::OpenDispute)?;
        let net = earning.net;

        self.transfer(EntryKind::EscrowHold, Bucket::Pending, Bucket::Escrow, net, id, now)?;

        let earning = self.earning_mut(id)?;
        earning.status = next;
        Ok(earning.clone())
    }

    pub fn resolve_dispute(
        &mut self,
        id: EarningId,
        outcome: DisputeOutcome,
        now: DateTime<Utc>,
    ) -> Result<Earning, EngineError> {
        let earning = self.existing_earning(id)?;
        let next = lifecycle::transition(earning, EarningEvent::Resolve(outcome))?;
        let net = earning.net;

        match outcome {
            DisputeOutcome::Release => self.transfer(
                EntryKind::EscrowRelease,
                Bucket::Escrow,
                Bucket::Available,
                net,
                id,
                now,
            )?,
            DisputeOutcome::Refund => {
                self.post(
                    EntryKind::Refund,
                    Bucket::Escrow,
                    -net,
                    EntryStatus::Completed,
                    id,
                    now,
                )?;
            }
        }

        let earning = self.earning_mut(id)?;
        earning.status = next;
        if outcome == DisputeOutcome::Release {
            earning.cleared_at = Some(now);
        }
        Ok(earning.clone())
    }
}

/// Payouts
impl WalletBook {
    /// Reserve `amount` from the available balance and record a pending payout.
    ///
    /// Funds are taken from available earnings oldest first.
    pub fn reserve_payout(
        &mut self,
        amount: Amount,
        method: MethodId,
        now: DateTime<Utc>,
    ) -> Result<PayoutRequest, EngineError> {
        let available = self.wallet.available();
        if amount > available {
            return Err(PayoutError::InsufficientBalance {
                available,
                requested: amount,
            }
            .into());
        }

        let mut remaining = amount;
        let mut allocations = Vec::new();
        for earning in &self.earnings {
            if remaining.is_zero() {
                break;
            }
            if earning.status != EarningStatus::Available {
                continue;
            }
            let free = earning.outstanding();
            if !free.is_positive() {
                continue;
            }
            let take = free.min(remaining);
            allocations.push(Allocation {
                earning: earning.id,
                amount: take,
            });
            remaining -= take;
        }
        if remaining.is_positive() {
            return Err(self.halt(format!(
                "available balance {available} is not backed by cleared earnings ({remaining} short)"
            )));
        }

        let id = Uuid::new_v4();
        let entry = self.post(
            EntryKind::Payout,
            Bucket::Available,
            -amount,
            EntryStatus::Pending,
            id,
            now,
        )?;
        for allocation in &allocations {
            self.earning_mut(allocation.earning)?.reserved += allocation.amount;
        }

        let payout = PayoutRequest {
            id,
            provider: self.provider.clone(),
            amount,
            method,
            status: PayoutStatus::Pending,
            requested_at: now,
            settled_at: None,
            dispatched_at: None,
            acknowledged_at: None,
            gateway_reference: None,
            entry,
            allocations,
            failure_reason: None,
        };
        self.payouts.insert(id, payout.clone());
        Ok(payout)
    }

    /// Claim a pending payout for submission to the gateway.
    ///
    /// The flag is `false` when the payout is final or another dispatch
    /// already claimed it; the caller must not contact the gateway then.
    pub fn mark_dispatched(
        &mut self,
        id: PayoutId,
        now: DateTime<Utc>,
    ) -> Result<(PayoutRequest, bool), EngineError> {
        let payout = self.payout_mut(id)?;
        if payout.status != PayoutStatus::Pending || payout.dispatched_at.is_some() {
            return Ok((payout.clone(), false));
        }
        payout.dispatched_at = Some(now);
        Ok((payout.clone(), true))
    }

    /// Record the gateway's receipt. Only the first ack on a pending payout counts.
    pub fn acknowledge(
        &mut self,
        id: PayoutId,
        ack: &GatewayAck,
        now: DateTime<Utc>,
    ) -> Result<PayoutRequest, EngineError> {
        let payout = self.payout_mut(id)?;
        if payout.status == PayoutStatus::Pending && payout.acknowledged_at.is_none() {
            payout.acknowledged_at = Some(now);
            payout.gateway_reference = Some(ack.reference.clone());
        }
        Ok(payout.clone())
    }

    /// Finalize a pending payout: the reservation becomes a withdrawal.
    pub fn complete_payout(
        &mut self,
        id: PayoutId,
        now: DateTime<Utc>,
    ) -> Result<PayoutRequest, EngineError> {
        let payout = self.existing_payout(id)?.clone();

        // every earning that ends up fully paid must be allowed to move before anything changes
        let mut finished = Vec::new();
        for allocation in &payout.allocations {
            let earning = self.existing_earning(allocation.earning)?;
            if earning.withdrawn + allocation.amount == earning.net {
                lifecycle::transition(earning, EarningEvent::Withdraw)?;
                finished.push(earning.id);
            }
        }

        let entry = self.journal.settle(payout.entry, EntryStatus::Completed)?;
        self.wallet.settle(entry);

        for allocation in &payout.allocations {
            let earning = self.earning_mut(allocation.earning)?;
            earning.reserved -= allocation.amount;
            earning.withdrawn += allocation.amount;
            if finished.contains(&earning.id) {
                earning.status = EarningStatus::Withdrawn;
            }
        }

        let payout = self.payout_mut(id)?;
        payout.status = PayoutStatus::Completed;
        payout.settled_at = Some(now);
        Ok(payout.clone())
    }

    /// Undo a pending payout's reservation with a compensating credit.
    ///
    /// `terminal` is `Failed` for gateway failures and timeouts, `Cancelled` for cancellations.
    pub fn compensate_payout(
        &mut self,
        id: PayoutId,
        terminal: PayoutStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PayoutRequest, EngineError> {
        let payout = self.existing_payout(id)?.clone();

        self.journal.settle(payout.entry, EntryStatus::Failed)?;
        self.post(
            EntryKind::Refund,
            Bucket::Available,
            payout.amount,
            EntryStatus::Completed,
            id,
            now,
        )?;

        for allocation in &payout.allocations {
            self.earning_mut(allocation.earning)?.reserved -= allocation.amount;
        }

        let payout = self.payout_mut(id)?;
        payout.status = terminal;
        payout.settled_at = Some(now);
        payout.failure_reason = Some(reason.to_string());
        Ok(payout.clone())
    }
}

/// Integrity
impl WalletBook {
    /// Check the aggregate against the ledger and the earnings; halt the wallet on mismatch.
    pub fn verify(&mut self) -> Result<(), EngineError> {
        match self.find_violation() {
            Some(detail) => Err(self.halt(detail)),
            None => Ok(()),
        }
    }

    /// Replace the aggregate with a fresh fold of the ledger and lift the halt if it now holds.
    pub fn rebuild(&mut self) -> Result<(), EngineError> {
        self.wallet = Wallet::from_journal(self.provider.clone(), self.journal.entries());
        self.verify()?;
        self.halted = None;
        Ok(())
    }

    pub(crate) fn halt(&mut self, detail: String) -> EngineError {
        error!(
            provider = %self.provider,
            detail = %detail,
            "ledger integrity violation, wallet halted"
        );
        self.halted = Some(detail.clone());
        EngineError::IntegrityViolation {
            provider: self.provider.clone(),
            detail,
        }
    }

    fn find_violation(&self) -> Option<String> {
        let cached = self.wallet.balances();
        let rebuilt = Wallet::from_journal(self.provider.clone(), self.journal.entries()).balances();
        if rebuilt != cached {
            return Some(format!(
                "aggregate {cached:?} diverges from ledger {rebuilt:?}"
            ));
        }

        let (mut available, mut pending, mut escrow) = (Amount::ZERO, Amount::ZERO, Amount::ZERO);
        for earning in &self.earnings {
            match earning.status {
                EarningStatus::Pending => pending += earning.outstanding(),
                EarningStatus::Available => available += earning.outstanding(),
                EarningStatus::OnHold => escrow += earning.outstanding(),
                EarningStatus::Withdrawn | EarningStatus::Refunded => {}
            }
        }
        if (available, pending, escrow) != (cached.available, cached.pending, cached.escrow) {
            return Some(format!(
                "balances (available {}, pending {}, escrow {}) do not match earnings (available {available}, pending {pending}, escrow {escrow})",
                cached.available, cached.pending, cached.escrow
            ));
        }

        if cached.available.is_negative() || cached.pending.is_negative() || cached.escrow.is_negative()
        {
            return Some(format!("negative bucket in {cached:?}"));
        }
        None
    }
}

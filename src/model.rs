//! Core domain types for the earnings ledger.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::Amount;
use crate::amount::FeeRate;

/// Service provider identifier. A provider owns exactly one wallet, so this is also the wallet id.
pub type ProviderId = String;

/// Case identifier from the case-completion collaborator.
pub type CaseId = String;

/// Client identifier from the case-completion collaborator.
pub type ClientId = String;

pub type EarningId = Uuid;
pub type EntryId = Uuid;
pub type PayoutId = Uuid;
pub type MethodId = Uuid;

/// Lifecycle state of an earning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EarningStatus {
    /// Recorded, waiting for the holding period to elapse.
    Pending,
    /// Cleared and withdrawable.
    Available,
    /// Frozen by an open dispute.
    OnHold,
    /// Fully paid out. Terminal.
    Withdrawn,
    /// Returned to the client after a dispute. Terminal.
    Refunded,
}

impl EarningStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EarningStatus::Withdrawn | EarningStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EarningStatus::Pending => "PENDING",
            EarningStatus::Available => "AVAILABLE",
            EarningStatus::OnHold => "ON_HOLD",
            EarningStatus::Withdrawn => "WITHDRAWN",
            EarningStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for EarningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider's net-of-fee claim on a completed case.
#[derive(Debug, Clone, PartialEq)]
pub struct Earning {
    pub id: EarningId,
    pub provider: ProviderId,
    pub case: CaseId,
    pub client: ClientId,
    pub gross: Amount,
    pub fee_rate: FeeRate,
    pub net: Amount,
    pub status: EarningStatus,
    pub created_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    /// Part of `net` reserved by payouts still awaiting settlement.
    pub reserved: Amount,
    /// Part of `net` paid out by completed payouts.
    pub withdrawn: Amount,
}

impl Earning {
    pub fn new(
        provider: ProviderId,
        case: CaseId,
        client: ClientId,
        gross: Amount,
        fee_rate: FeeRate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            case,
            client,
            gross,
            fee_rate,
            net: fee_rate.net_of(gross),
            status: EarningStatus::Pending,
            created_at,
            cleared_at: None,
            reserved: Amount::ZERO,
            withdrawn: Amount::ZERO,
        }
    }

    /// Amount this earning still contributes to the wallet buckets.
    pub fn outstanding(&self) -> Amount {
        if self.status.is_terminal() {
            Amount::ZERO
        } else {
            self.net - self.reserved - self.withdrawn
        }
    }
}

/// Ledger entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Earning,
    EscrowHold,
    EscrowRelease,
    Payout,
    Refund,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Earning => "EARNING",
            EntryKind::EscrowHold => "ESCROW_HOLD",
            EntryKind::EscrowRelease => "ESCROW_RELEASE",
            EntryKind::Payout => "PAYOUT",
            EntryKind::Refund => "REFUND",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Completed => "COMPLETED",
            EntryStatus::Failed => "FAILED",
        })
    }
}

/// Wallet balance bucket an entry posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Pending,
    Available,
    Escrow,
}

/// One append-only ledger record. `amount` is signed: credits positive, debits negative.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet: ProviderId,
    /// Insertion sequence within the wallet, assigned on append (starts at 1).
    pub seq: u64,
    pub kind: EntryKind,
    pub bucket: Bucket,
    pub amount: Amount,
    pub status: EntryStatus,
    /// Earning or payout request this entry belongs to.
    pub reference: Uuid,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        wallet: ProviderId,
        kind: EntryKind,
        bucket: Bucket,
        amount: Amount,
        status: EntryStatus,
        reference: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet,
            seq: 0,
            kind,
            bucket,
            amount,
            status,
            reference,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    BankAccount,
    MobileWalletA,
    MobileWalletB,
}

/// A provider's payout destination. Only the masked identifier is retained.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethod {
    pub id: MethodId,
    pub provider: ProviderId,
    pub kind: MethodKind,
    pub holder: String,
    pub masked_identifier: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PayoutStatus::Pending)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Failed => "FAILED",
            PayoutStatus::Cancelled => "CANCELLED",
        })
    }
}

/// Portion of a payout funded by one earning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub earning: EarningId,
    pub amount: Amount,
}

/// A provider-initiated withdrawal.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub id: PayoutId,
    pub provider: ProviderId,
    pub amount: Amount,
    pub method: MethodId,
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Set when a dispatch claims the payout. At most one gateway submission
    /// is made per payout, and cancellation is refused from here on.
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Set once the gateway confirmed receipt; cancellation is refused afterwards.
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub gateway_reference: Option<String>,
    /// The PAYOUT ledger entry carrying the reservation.
    pub entry: EntryId,
    pub allocations: Vec<Allocation>,
    pub failure_reason: Option<String>,
}

/// Final word from the settlement gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed,
    Failed { reason: String },
}

/// Decision of the dispute collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOutcome {
    Release,
    Refund,
}

/// Point-in-time view of a wallet handed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub provider: ProviderId,
    pub available: Amount,
    pub pending: Amount,
    pub escrow: Amount,
    pub total_earned: Amount,
    pub total_withdrawn: Amount,
    /// Increases with every applied change; never goes backwards for a subscriber.
    pub revision: u64,
}

impl WalletSnapshot {
    pub fn empty(provider: ProviderId) -> Self {
        Self {
            provider,
            available: Amount::ZERO,
            pending: Amount::ZERO,
            escrow: Amount::ZERO,
            total_earned: Amount::ZERO,
            total_withdrawn: Amount::ZERO,
            revision: 0,
        }
    }

    pub fn balance(&self) -> Amount {
        self.available + self.pending + self.escrow
    }
}

/// Inbound events from the asynchronous collaborator feed.
#[derive(Debug, Clone)]
pub enum Event {
    /// A case completed; pay the provider.
    EarningCreated {
        provider: ProviderId,
        case: CaseId,
        client: ClientId,
        gross: Amount,
    },
    DisputeOpened {
        earning: EarningId,
    },
    DisputeResolved {
        earning: EarningId,
        outcome: DisputeOutcome,
    },
    /// Settlement webhook.
    Settlement {
        payout: PayoutId,
        outcome: SettlementOutcome,
    },
    /// Run the holding-period sweep now.
    HoldingSweep,
}

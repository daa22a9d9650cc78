//! Error types for ledger operations.
//!
//! Display strings double as the human-readable messages surfaced to clients.

use thiserror::Error;

use crate::Amount;
use crate::journal::JournalError;
use crate::lifecycle::TransitionError;
use crate::model::{CaseId, EarningId, MethodId, PayoutId, ProviderId};

/// Top-level error returned by [`Engine`](super::Engine) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("payout failed: {0}")]
    Payout(#[from] PayoutError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Journal(#[from] JournalError),

    #[error("wallet {0} is busy, retry the operation")]
    ConcurrentModificationConflict(ProviderId),

    #[error("integrity violation on wallet {provider}: {detail}")]
    IntegrityViolation { provider: ProviderId, detail: String },

    #[error("wallet {provider} is halted until reconciled: {reason}")]
    WalletHalted { provider: ProviderId, reason: String },

    #[error("earning {0} not found")]
    EarningNotFound(EarningId),

    #[error("payout {0} not found")]
    PayoutNotFound(PayoutId),

    #[error("case {case} already has earning {earning}")]
    DuplicateCase { case: CaseId, earning: EarningId },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Amount),
}

/// Error during payout processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayoutError {
    #[error("minimum withdrawal is {minimum}, requested {requested}")]
    BelowMinimumPayout { minimum: Amount, requested: Amount },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    #[error("payment method {0} is unknown or not owned by this provider")]
    UnknownOrUnownedPaymentMethod(MethodId),

    #[error("settlement of payout {payout} failed: {reason}")]
    SettlementFailed { payout: PayoutId, reason: String },

    #[error("payout {payout} can no longer be cancelled: {reason}")]
    NotCancellable { payout: PayoutId, reason: String },
}

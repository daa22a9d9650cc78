//! Earning lifecycle state machine.
//!
//! ```text
//! PENDING --clear--> AVAILABLE --withdraw--> WITHDRAWN
//!    |                   ^
//!  dispute            release
//!    v                   |
//! ON_HOLD ---------------+--refund--> REFUNDED
//! ```

use std::fmt;
use thiserror::Error;

use crate::model::{DisputeOutcome, Earning, EarningId, EarningStatus};

/// Something that asks an earning to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarningEvent {
    /// Holding period elapsed.
    Clear,
    OpenDispute,
    Resolve(DisputeOutcome),
    /// A completed payout consumed the remaining net amount.
    Withdraw,
}

impl fmt::Display for EarningEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EarningEvent::Clear => f.write_str("clear"),
            EarningEvent::OpenDispute => f.write_str("open dispute"),
            EarningEvent::Resolve(DisputeOutcome::Release) => f.write_str("release"),
            EarningEvent::Resolve(DisputeOutcome::Refund) => f.write_str("refund"),
            EarningEvent::Withdraw => f.write_str("withdraw"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("earning {earning}: cannot {event} from {from}")]
    InvalidStateTransition {
        earning: EarningId,
        from: EarningStatus,
        event: EarningEvent,
    },
}

/// The transition table. `None` means the move is not allowed.
pub fn next_status(from: EarningStatus, event: EarningEvent) -> Option<EarningStatus> {
    use EarningStatus::*;
    match (from, event) {
        (Pending, EarningEvent::Clear) => Some(Available),
        (Pending, EarningEvent::OpenDispute) => Some(OnHold),
        (OnHold, EarningEvent::Resolve(DisputeOutcome::Release)) => Some(Available),
        (OnHold, EarningEvent::Resolve(DisputeOutcome::Refund)) => Some(Refunded),
        (Available, EarningEvent::Withdraw) => Some(Withdrawn),
        _ => None,
    }
}

/// Check a transition for `earning` without touching it.
pub fn transition(earning: &Earning, event: EarningEvent) -> Result<EarningStatus, TransitionError> {
    next_status(earning.status, event).ok_or(TransitionError::InvalidStateTransition {
        earning: earning.id,
        from: earning.status,
        event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use EarningStatus::*;

    const ALL_STATES: [EarningStatus; 5] = [Pending, Available, OnHold, Withdrawn, Refunded];
    const ALL_EVENTS: [EarningEvent; 5] = [
        EarningEvent::Clear,
        EarningEvent::OpenDispute,
        EarningEvent::Resolve(DisputeOutcome::Release),
        EarningEvent::Resolve(DisputeOutcome::Refund),
        EarningEvent::Withdraw,
    ];

    #[test]
    fn allowed_transitions() {
        assert_eq!(next_status(Pending, EarningEvent::Clear), Some(Available));
        assert_eq!(next_status(Pending, EarningEvent::OpenDispute), Some(OnHold));
        assert_eq!(
            next_status(OnHold, EarningEvent::Resolve(DisputeOutcome::Release)),
            Some(Available)
        );
        assert_eq!(
            next_status(OnHold, EarningEvent::Resolve(DisputeOutcome::Refund)),
            Some(Refunded)
        );
        assert_eq!(next_status(Available, EarningEvent::Withdraw), Some(Withdrawn));
    }

    #[test]
    fn terminal_states_never_move() {
        for event in ALL_EVENTS {
            assert_eq!(next_status(Withdrawn, event), None);
            assert_eq!(next_status(Refunded, event), None);
        }
    }

    #[test]
    fn table_has_exactly_five_edges() {
        let edges = ALL_STATES
            .iter()
            .flat_map(|s| ALL_EVENTS.iter().map(move |e| (*s, *e)))
            .filter(|(s, e)| next_status(*s, *e).is_some())
            .count();
        assert_eq!(edges, 5);
    }

    #[test]
    fn available_cannot_be_disputed() {
        assert_eq!(next_status(Available, EarningEvent::OpenDispute), None);
    }

    #[test]
    fn pending_cannot_be_withdrawn() {
        assert_eq!(next_status(Pending, EarningEvent::Withdraw), None);
    }
}

//! Transfer lifecycle states and the transition table.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gasflow_core::DomainError;

/// Transfer lifecycle.
///
/// ```text
/// draft -> pending -> approved -> in_transit -> completed
///   \________\___________\___________\-------> cancelled
/// ```
///
/// `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Pending,
    Approved,
    InTransit,
    Completed,
    Cancelled,
}

/// Requested status change not permitted from the current status.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TransferStatus,
    pub to: TransferStatus,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 6] = [
        TransferStatus::Draft,
        TransferStatus::Pending,
        TransferStatus::Approved,
        TransferStatus::InTransit,
        TransferStatus::Completed,
        TransferStatus::Cancelled,
    ];

    /// Statuses whose lines still claim stock at the source.
    pub const OPEN: [TransferStatus; 3] = [
        TransferStatus::Pending,
        TransferStatus::Approved,
        TransferStatus::InTransit,
    ];

    pub fn allowed_targets(self) -> &'static [TransferStatus] {
        use TransferStatus::*;
        match self {
            Draft => &[Pending, Cancelled],
            Pending => &[Approved, Cancelled],
            Approved => &[InTransit, Cancelled],
            InTransit => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: TransferStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    pub fn check_transition(self, to: TransferStatus) -> Result<(), InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }

    pub fn is_open(self) -> bool {
        Self::OPEN.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Draft => "draft",
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::InTransit => "in_transit",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown transfer status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use TransferStatus::*;

    const TABLE: [(TransferStatus, TransferStatus); 8] = [
        (Draft, Pending),
        (Draft, Cancelled),
        (Pending, Approved),
        (Pending, Cancelled),
        (Approved, InTransit),
        (Approved, Cancelled),
        (InTransit, Completed),
        (InTransit, Cancelled),
    ];

    #[test]
    fn terminal_states_allow_nothing() {
        for to in TransferStatus::ALL {
            assert!(!Completed.can_transition_to(to));
            assert!(!Cancelled.can_transition_to(to));
        }
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!InTransit.is_terminal());
    }

    #[test]
    fn invalid_transition_names_both_statuses() {
        let err = Draft.check_transition(Completed).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Draft, to: Completed });
        assert_eq!(err.to_string(), "invalid transition from draft to completed");
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in TransferStatus::ALL {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("shipped".parse::<TransferStatus>().is_err());
    }

    fn status() -> impl Strategy<Value = TransferStatus> {
        prop::sample::select(TransferStatus::ALL.to_vec())
    }

    proptest! {
        /// Property: a transition is accepted iff it appears in the table.
        #[test]
        fn only_tabled_transitions_are_accepted(from in status(), to in status()) {
            let tabled = TABLE.contains(&(from, to));
            prop_assert_eq!(from.check_transition(to).is_ok(), tabled);
        }
    }
}

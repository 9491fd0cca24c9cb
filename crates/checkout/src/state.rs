//! Verification saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a payment verification in its lifecycle.
///
/// State transitions:
/// ```text
/// Received ──► SignatureChecked ──┬──► Ledgered ──► Enrolling ──┬──► Complete
///                                 │                             └──► Partial
///                                 └──► Rejected
/// ```
/// A rejected verification never writes a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VerificationState {
    /// Request accepted, inputs not yet checked.
    #[default]
    Received,

    /// The processor signature matched.
    SignatureChecked,

    /// One ledger row per course exists.
    Ledgered,

    /// Enrollment fan-out in progress.
    Enrolling,

    /// Every course enrolled (terminal state).
    Complete,

    /// Payment captured, some enrollments pending (terminal state).
    Partial,

    /// Signature or order mismatch (terminal state).
    Rejected,
}

impl VerificationState {
    /// Returns true if the saga may move from `self` to `next`.
    pub fn can_transition_to(&self, next: VerificationState) -> bool {
        use VerificationState::*;
        matches!(
            (self, next),
            (Received, SignatureChecked)
                | (Received, Rejected)
                | (SignatureChecked, Ledgered)
                | (SignatureChecked, Rejected)
                | (Ledgered, Enrolling)
                | (Enrolling, Complete)
                | (Enrolling, Partial)
        )
    }

    /// Moves to `next`, logging the transition.
    pub fn advance(self, next: VerificationState) -> VerificationState {
        debug_assert!(
            self.can_transition_to(next),
            "invalid verification transition {self} -> {next}"
        );
        tracing::debug!(from = %self, to = %next, "verification state changed");
        next
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VerificationState::Complete | VerificationState::Partial | VerificationState::Rejected
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationState::Received => "RECEIVED",
            VerificationState::SignatureChecked => "SIGNATURE_CHECKED",
            VerificationState::Ledgered => "LEDGERED",
            VerificationState::Enrolling => "ENROLLING",
            VerificationState::Complete => "COMPLETE",
            VerificationState::Partial => "PARTIAL",
            VerificationState::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_received() {
        assert_eq!(VerificationState::default(), VerificationState::Received);
    }

    #[test]
    fn test_happy_path_transitions() {
        let state = VerificationState::Received
            .advance(VerificationState::SignatureChecked)
            .advance(VerificationState::Ledgered)
            .advance(VerificationState::Enrolling)
            .advance(VerificationState::Partial);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_ledger_requires_signature() {
        assert!(!VerificationState::Received.can_transition_to(VerificationState::Ledgered));
        assert!(!VerificationState::Rejected.can_transition_to(VerificationState::Ledgered));
        assert!(!VerificationState::Ledgered.can_transition_to(VerificationState::Rejected));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!VerificationState::Received.is_terminal());
        assert!(!VerificationState::Enrolling.is_terminal());
        assert!(VerificationState::Complete.is_terminal());
        assert!(VerificationState::Partial.is_terminal());
        assert!(VerificationState::Rejected.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(VerificationState::SignatureChecked.to_string(), "SIGNATURE_CHECKED");
        assert_eq!(VerificationState::Partial.to_string(), "PARTIAL");
    }
}

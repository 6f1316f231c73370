//! Payout FSM State Definitions

use std::fmt;

/// Payout FSM States
///
/// Terminal states: CONFIRMED, FAILED, REVERTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayoutState {
    /// Initial state - inverting the fee schedule
    Resolving,

    /// Reading balance and allowance
    AuthorizationCheck,

    /// Allowance grant requested, waiting for it to settle
    AuthorizationPending,

    /// Handing the transfer to the executor
    Submitting,

    /// Accepted by the executor - IRREVOCABLE from here on
    PendingConfirmation,

    /// Terminal: transfer landed and succeeded
    Confirmed,

    /// Terminal: failed (or indeterminate on confirmation timeout)
    Failed,

    /// Terminal: executed but reverted by the contract
    Reverted,
}

impl PayoutState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PayoutState::Confirmed | PayoutState::Failed | PayoutState::Reverted
        )
    }

    /// Cancellation is only honoured before anything is submitted
    #[inline]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            PayoutState::Resolving
                | PayoutState::AuthorizationCheck
                | PayoutState::AuthorizationPending
        )
    }

    /// Legal transitions out of this state
    pub fn can_transition_to(&self, next: PayoutState) -> bool {
        use PayoutState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Resolving, AuthorizationCheck) => true,
            (AuthorizationCheck, AuthorizationPending | Submitting) => true,
            (AuthorizationPending, Submitting) => true,
            (Submitting, PendingConfirmation) => true,
            (PendingConfirmation, Confirmed | Reverted) => true,
            _ => false,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutState::Resolving => "RESOLVING",
            PayoutState::AuthorizationCheck => "AUTHORIZATION_CHECK",
            PayoutState::AuthorizationPending => "AUTHORIZATION_PENDING",
            PayoutState::Submitting => "SUBMITTING",
            PayoutState::PendingConfirmation => "PENDING_CONFIRMATION",
            PayoutState::Confirmed => "CONFIRMED",
            PayoutState::Failed => "FAILED",
            PayoutState::Reverted => "REVERTED",
        }
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

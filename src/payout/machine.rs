//! Payout State Machine
//!
//! Owns the state of one payout. Every transition is a compare-and-set from an
//! expected state, so a second delivery of the same event is a no-op.
//! Each accepted transition is published on a `watch` channel.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::PayoutError;
use super::state::PayoutState;
use super::types::{
    PayoutId, Receipt, ReceiptStatus, ResolvedAmount, SubmissionHandle, TransferOutcome,
};

/// Snapshot published to observers after every transition
#[derive(Debug, Clone)]
pub struct PayoutProgress {
    pub state: PayoutState,
    /// Latest outcome: `Submitted` while pending, then the terminal one
    pub outcome: Option<TransferOutcome>,
}

impl PayoutProgress {
    pub fn initial() -> Self {
        Self {
            state: PayoutState::Resolving,
            outcome: None,
        }
    }
}

/// Single owned state value of one payout
pub struct PayoutMachine {
    payout_id: PayoutId,
    state: PayoutState,
    history: Vec<PayoutState>,
    outcome: Option<TransferOutcome>,
    progress: watch::Sender<PayoutProgress>,
}

impl PayoutMachine {
    pub fn new(payout_id: PayoutId, progress: watch::Sender<PayoutProgress>) -> Self {
        progress.send_replace(PayoutProgress::initial());
        Self {
            payout_id,
            state: PayoutState::Resolving,
            history: vec![PayoutState::Resolving],
            outcome: None,
            progress,
        }
    }

    /// Machine without external observers
    pub fn detached(payout_id: PayoutId) -> Self {
        let (tx, _rx) = watch::channel(PayoutProgress::initial());
        Self::new(payout_id, tx)
    }

    pub fn payout_id(&self) -> PayoutId {
        self.payout_id
    }

    pub fn state(&self) -> PayoutState {
        self.state
    }

    /// Every state entered, in order
    pub fn history(&self) -> &[PayoutState] {
        &self.history
    }

    pub fn outcome(&self) -> Option<&TransferOutcome> {
        self.outcome.as_ref()
    }

    /// Move `from -> to` if the machine is in `from` and the edge is legal
    pub fn advance(&mut self, from: PayoutState, to: PayoutState) -> bool {
        self.transition(from, to, None)
    }

    /// `Submitting -> PendingConfirmation`, publishing the handle
    pub fn submitted(&mut self, handle: SubmissionHandle) -> bool {
        self.transition(
            PayoutState::Submitting,
            PayoutState::PendingConfirmation,
            Some(TransferOutcome::Submitted { handle }),
        )
    }

    /// Any non-terminal state -> `Failed`
    pub fn fail(&mut self, reason: PayoutError) -> bool {
        let from = self.state;
        let code = reason.code();
        let message = reason.to_string();
        if !self.transition(from, PayoutState::Failed, Some(TransferOutcome::Failed { reason })) {
            return false;
        }
        warn!(
            payout_id = %self.payout_id,
            state = %from,
            code,
            error = %message,
            "Payout failed"
        );
        true
    }

    /// Apply a terminal receipt
    ///
    /// Returns the terminal outcome the first time only. Receipts for another
    /// handle, or arriving after the payout already ended, are ignored.
    pub fn settle(
        &mut self,
        receipt: &Receipt,
        resolved: &ResolvedAmount,
    ) -> Option<TransferOutcome> {
        let handle = match &self.outcome {
            Some(TransferOutcome::Submitted { handle }) => handle.clone(),
            _ => {
                debug!(
                    payout_id = %self.payout_id,
                    state = %self.state,
                    handle = %receipt.handle,
                    "Duplicate or late receipt ignored"
                );
                return None;
            }
        };

        if receipt.handle != handle {
            warn!(
                payout_id = %self.payout_id,
                expected = %handle,
                got = %receipt.handle,
                "Receipt for a different transaction ignored"
            );
            return None;
        }

        let (to, outcome) = match &receipt.status {
            ReceiptStatus::Success => (
                PayoutState::Confirmed,
                TransferOutcome::Confirmed {
                    handle,
                    recipient_amount: resolved.recipient_amount,
                    fee: resolved.fee,
                },
            ),
            ReceiptStatus::Reverted(reason) => (
                PayoutState::Reverted,
                TransferOutcome::Reverted {
                    handle,
                    reason: reason.clone(),
                },
            ),
        };

        if self.transition(PayoutState::PendingConfirmation, to, Some(outcome.clone())) {
            Some(outcome)
        } else {
            None
        }
    }

    fn transition(
        &mut self,
        from: PayoutState,
        to: PayoutState,
        outcome: Option<TransferOutcome>,
    ) -> bool {
        if self.state != from || !from.can_transition_to(to) {
            debug!(
                payout_id = %self.payout_id,
                current = %self.state,
                from = %from,
                to = %to,
                "Transition rejected"
            );
            return false;
        }

        self.state = to;
        self.history.push(to);
        if outcome.is_some() {
            self.outcome = outcome;
        }
        self.progress.send_replace(PayoutProgress {
            state: to,
            outcome: self.outcome.clone(),
        });

        info!(
            payout_id = %self.payout_id,
            from = %from,
            to = %to,
            "Payout state advanced"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedAmount {
        ResolvedAmount {
            recipient_amount: 950_000,
            fee: 50_000,
            total_cost: 1_000_000,
        }
    }

    fn pending_machine(handle: &SubmissionHandle) -> PayoutMachine {
        let mut machine = PayoutMachine::detached(PayoutId::new());
        assert!(machine.advance(PayoutState::Resolving, PayoutState::AuthorizationCheck));
        assert!(machine.advance(PayoutState::AuthorizationCheck, PayoutState::Submitting));
        assert!(machine.submitted(handle.clone()));
        machine
    }

    #[test]
    fn test_advance_is_compare_and_set() {
        let mut machine = PayoutMachine::detached(PayoutId::new());
        assert!(machine.advance(PayoutState::Resolving, PayoutState::AuthorizationCheck));
        // Same edge again: machine is no longer in Resolving
        assert!(!machine.advance(PayoutState::Resolving, PayoutState::AuthorizationCheck));
        // Illegal skip
        assert!(!machine.advance(PayoutState::AuthorizationCheck, PayoutState::PendingConfirmation));
        assert_eq!(machine.state(), PayoutState::AuthorizationCheck);
    }

    #[test]
    fn test_double_confirmation_is_idempotent() {
        let handle = SubmissionHandle::new("0xfeed");
        let mut machine = pending_machine(&handle);
        let receipt = Receipt::success(handle.clone(), 7);

        let first = machine.settle(&receipt, &resolved());
        assert!(matches!(
            first,
            Some(TransferOutcome::Confirmed {
                recipient_amount: 950_000,
                fee: 50_000,
                ..
            })
        ));
        assert!(machine.settle(&receipt, &resolved()).is_none());

        let confirmations = machine
            .history()
            .iter()
            .filter(|s| **s == PayoutState::Confirmed)
            .count();
        assert_eq!(confirmations, 1);
    }

    #[test]
    fn test_revert_then_success_keeps_first() {
        let handle = SubmissionHandle::new("0xfeed");
        let mut machine = pending_machine(&handle);

        let reverted = machine.settle(&Receipt::reverted(handle.clone(), "paused"), &resolved());
        assert!(matches!(reverted, Some(TransferOutcome::Reverted { .. })));
        assert!(machine.settle(&Receipt::success(handle, 9), &resolved()).is_none());
        assert_eq!(machine.state(), PayoutState::Reverted);
    }

    #[test]
    fn test_foreign_receipt_ignored() {
        let handle = SubmissionHandle::new("0xfeed");
        let mut machine = pending_machine(&handle);

        let other = Receipt::success(SubmissionHandle::new("0xbeef"), 1);
        assert!(machine.settle(&other, &resolved()).is_none());
        assert_eq!(machine.state(), PayoutState::PendingConfirmation);
    }

    #[test]
    fn test_fail_only_once() {
        let mut machine = PayoutMachine::detached(PayoutId::new());
        assert!(machine.fail(PayoutError::Cancelled));
        assert!(!machine.fail(PayoutError::AuthorizationTimeout));
        assert!(matches!(
            machine.outcome(),
            Some(TransferOutcome::Failed {
                reason: PayoutError::Cancelled
            })
        ));
    }

    #[test]
    fn test_progress_published() {
        let (tx, rx) = watch::channel(PayoutProgress::initial());
        let mut machine = PayoutMachine::new(PayoutId::new(), tx);
        machine.advance(PayoutState::Resolving, PayoutState::AuthorizationCheck);
        machine.advance(PayoutState::AuthorizationCheck, PayoutState::Submitting);
        machine.submitted(SubmissionHandle::new("0x1"));

        let progress = rx.borrow().clone();
        assert_eq!(progress.state, PayoutState::PendingConfirmation);
        assert!(matches!(
            progress.outcome,
            Some(TransferOutcome::Submitted { .. })
        ));
    }
}

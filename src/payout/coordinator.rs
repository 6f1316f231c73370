//! Payout Coordinator
//!
//! Drives one payout through the FSM:
//! resolve amount → check balance/allowance → (grant) → submit → confirm → ledger.
//! Collaborators are injected; the coordinator holds no state across requests
//! and may serve many payouts concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::adapters::{AuthorizationService, FeeOracle, LedgerRecorder, TransferExecutor};
use super::error::{AdapterError, PayoutError};
use super::machine::{PayoutMachine, PayoutProgress};
use super::resolver::{AmountResolver, ResolverConfig};
use super::state::PayoutState;
use super::types::{
    CompletedTransfer, GrantHandle, GrantStatus, PayoutId, Receipt, ResolvedAmount,
    SubmissionHandle, TransferOutcome, TransferRequest,
};

/// Timeouts for the coordinator's bounded waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub authorization_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    /// Re-check period while waiting for a grant or a receipt
    pub poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            authorization_timeout_ms: 30_000,
            confirmation_timeout_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn authorization_timeout(&self) -> Duration {
        Duration::from_millis(self.authorization_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Resolver and coordinator settings together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    pub resolver: ResolverConfig,
    pub coordinator: CoordinatorConfig,
}

/// Non-fatal issues attached to a finished payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutWarning {
    /// Transfer confirmed but the ledger write failed
    LedgerRecordFailed(String),
    /// Cancel arrived after submission and was ignored
    CancelAfterSubmission,
}

/// Final report of one payout
#[derive(Debug, Clone)]
pub struct PayoutReport {
    pub payout_id: PayoutId,
    pub request: TransferRequest,
    pub resolved: Option<ResolvedAmount>,
    pub outcome: TransferOutcome,
    pub history: Vec<PayoutState>,
    pub warnings: Vec<PayoutWarning>,
}

impl PayoutReport {
    pub fn state(&self) -> PayoutState {
        self.history
            .last()
            .copied()
            .unwrap_or(PayoutState::Resolving)
    }

    pub fn is_confirmed(&self) -> bool {
        self.outcome.is_confirmed()
    }

    pub fn visited(&self, state: PayoutState) -> bool {
        self.history.contains(&state)
    }
}

/// Handle to a payout running on its own task
pub struct PayoutHandle {
    payout_id: PayoutId,
    cancel: watch::Sender<bool>,
    progress: watch::Receiver<PayoutProgress>,
    task: JoinHandle<PayoutReport>,
}

impl PayoutHandle {
    pub fn payout_id(&self) -> PayoutId {
        self.payout_id
    }

    pub fn progress(&self) -> PayoutProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PayoutProgress> {
        self.progress.clone()
    }

    /// Request cancellation
    ///
    /// Returns `false` if the payout is already past submission, in which case
    /// it keeps running to a terminal state. The task makes the final decision:
    /// a cancel racing with submission may still lose.
    pub fn cancel(&self) -> bool {
        self.cancel.send_replace(true);
        self.progress.borrow().state.is_cancellable()
    }

    /// Wait for the payout to finish
    pub async fn join(self) -> Result<PayoutReport, PayoutError> {
        Ok(self.task.await?)
    }
}

/// Payout Coordinator - orchestrates FSM-based processing
pub struct PayoutCoordinator {
    resolver: AmountResolver,
    config: CoordinatorConfig,
    oracle: Arc<dyn FeeOracle>,
    authorization: Arc<dyn AuthorizationService>,
    executor: Arc<dyn TransferExecutor>,
    ledger: Arc<dyn LedgerRecorder>,
}

impl PayoutCoordinator {
    pub fn new(
        config: &PayoutConfig,
        oracle: Arc<dyn FeeOracle>,
        authorization: Arc<dyn AuthorizationService>,
        executor: Arc<dyn TransferExecutor>,
        ledger: Arc<dyn LedgerRecorder>,
    ) -> Self {
        Self {
            resolver: AmountResolver::new(config.resolver.clone()),
            config: config.coordinator.clone(),
            oracle,
            authorization,
            executor,
            ledger,
        }
    }

    /// Run a payout on its own task
    pub fn spawn(self: &Arc<Self>, request: TransferRequest) -> PayoutHandle {
        let payout_id = PayoutId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(PayoutProgress::initial());

        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            coordinator
                .drive(payout_id, request, cancel_rx, progress_tx)
                .await
        });

        PayoutHandle {
            payout_id,
            cancel: cancel_tx,
            progress: progress_rx,
            task,
        }
    }

    /// Run a payout to completion on the current task (not cancellable)
    pub async fn execute(&self, request: TransferRequest) -> PayoutReport {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, _progress_rx) = watch::channel(PayoutProgress::initial());
        self.drive(PayoutId::new(), request, cancel_rx, progress_tx)
            .await
    }

    async fn drive(
        &self,
        payout_id: PayoutId,
        request: TransferRequest,
        mut cancel: watch::Receiver<bool>,
        progress: watch::Sender<PayoutProgress>,
    ) -> PayoutReport {
        let mut machine = PayoutMachine::new(payout_id, progress);
        let mut warnings = Vec::new();

        info!(
            payout_id = %payout_id,
            requester = %request.requester,
            recipient = %request.recipient,
            requested_total = request.requested_total,
            currency = %request.currency,
            "Payout started"
        );

        let resolved = match self.step_resolve(&mut machine, &request, &mut cancel).await {
            Ok(resolved) => resolved,
            Err(reason) => {
                machine.fail(reason);
                return finish(machine, request, None, warnings);
            }
        };

        if let Err(reason) = self
            .step_authorize(&mut machine, &request, &resolved, &mut cancel)
            .await
        {
            machine.fail(reason);
            return finish(machine, request, Some(resolved), warnings);
        }

        let handle = match self.step_submit(&mut machine, &request, &resolved, &cancel).await {
            Ok(handle) => handle,
            Err(reason) => {
                machine.fail(reason);
                return finish(machine, request, Some(resolved), warnings);
            }
        };

        // Irrevocable from here: observe to a terminal state whatever happens
        self.step_confirm(&mut machine, &request, &resolved, handle, &mut warnings)
            .await;

        if *cancel.borrow() {
            warn!(payout_id = %payout_id, "Cancel requested after submission (ignored)");
            warnings.push(PayoutWarning::CancelAfterSubmission);
        }

        finish(machine, request, Some(resolved), warnings)
    }

    /// Resolving: invert the fee schedule
    async fn step_resolve(
        &self,
        machine: &mut PayoutMachine,
        request: &TransferRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ResolvedAmount, PayoutError> {
        let resolved = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(PayoutError::Cancelled),
            result = self.resolver.resolve(request.requested_total, self.oracle.as_ref()) => result?,
        };

        advance(machine, PayoutState::Resolving, PayoutState::AuthorizationCheck)?;
        Ok(resolved)
    }

    /// AuthorizationCheck (+ AuthorizationPending when the allowance is short)
    ///
    /// One deadline bounds the whole phase; every collaborator call races it
    /// and the cancel signal.
    async fn step_authorize(
        &self,
        machine: &mut PayoutMachine,
        request: &TransferRequest,
        resolved: &ResolvedAmount,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), PayoutError> {
        if *cancel.borrow() {
            return Err(PayoutError::Cancelled);
        }

        let deadline = Instant::now() + self.config.authorization_timeout();
        let owner = &request.requester;
        let required = resolved.total_cost;

        let available = guarded(self.authorization.balance(owner), cancel, deadline)
            .await
            .map_err(|i| i.into_error(read_timed_out("balance")))?
            .map_err(unavailable)?;
        if available < required {
            return Err(PayoutError::InsufficientBalance {
                required,
                available,
            });
        }

        let allowance = guarded(self.authorization.allowance(owner), cancel, deadline)
            .await
            .map_err(|i| i.into_error(read_timed_out("allowance")))?
            .map_err(unavailable)?;
        if allowance >= required {
            debug!(
                payout_id = %machine.payout_id(),
                allowance,
                required,
                "Allowance sufficient, skipping grant"
            );
            return advance(machine, PayoutState::AuthorizationCheck, PayoutState::Submitting);
        }

        advance(
            machine,
            PayoutState::AuthorizationCheck,
            PayoutState::AuthorizationPending,
        )?;

        let payout_id = machine.payout_id();
        let requested = guarded(
            self.authorization.set_allowance(owner, required),
            cancel,
            deadline,
        )
        .await
        .map_err(|i| {
            if matches!(i, Interrupt::Deadline) {
                warn!(payout_id = %payout_id, "Allowance grant request timed out");
            }
            i.into_error(PayoutError::AuthorizationTimeout)
        })?;
        let grant = match requested {
            Ok(grant) => grant,
            Err(AdapterError::Rejected(reason)) => {
                return Err(PayoutError::AuthorizationRejected(reason));
            }
            Err(AdapterError::Unavailable(reason)) => {
                return Err(PayoutError::ServiceUnavailable(reason));
            }
        };
        info!(
            payout_id = %payout_id,
            grant = %grant,
            amount = required,
            "Allowance grant requested"
        );

        self.await_grant(payout_id, &grant, cancel, deadline).await?;
        advance(machine, PayoutState::AuthorizationPending, PayoutState::Submitting)
    }

    /// Wait for a grant to settle, re-checking every poll interval
    async fn await_grant(
        &self,
        payout_id: PayoutId,
        grant: &GrantHandle,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<(), PayoutError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let interrupted = |i: Interrupt| {
            if matches!(i, Interrupt::Deadline) {
                warn!(payout_id = %payout_id, grant = %grant, "Allowance grant timed out");
            }
            i.into_error(PayoutError::AuthorizationTimeout)
        };

        loop {
            guarded(ticker.tick(), cancel, deadline)
                .await
                .map_err(&interrupted)?;

            let status = guarded(self.authorization.grant_status(grant), cancel, deadline)
                .await
                .map_err(&interrupted)?;
            match status {
                Ok(GrantStatus::Settled) => {
                    info!(payout_id = %payout_id, grant = %grant, "Allowance grant settled");
                    return Ok(());
                }
                Ok(GrantStatus::Rejected(reason)) => {
                    return Err(PayoutError::AuthorizationRejected(reason));
                }
                Ok(GrantStatus::Pending) => {
                    trace!(payout_id = %payout_id, grant = %grant, "Grant pending");
                }
                Err(e) => {
                    warn!(
                        payout_id = %payout_id,
                        grant = %grant,
                        error = %e,
                        "Grant status check failed (will retry)"
                    );
                }
            }
        }
    }

    /// Submitting: last point where a cancel is honoured
    ///
    /// The submit call itself is not cancellable: once it starts the transfer
    /// may be broadcast. It is bounded by the confirmation timeout.
    async fn step_submit(
        &self,
        machine: &mut PayoutMachine,
        request: &TransferRequest,
        resolved: &ResolvedAmount,
        cancel: &watch::Receiver<bool>,
    ) -> Result<SubmissionHandle, PayoutError> {
        if *cancel.borrow() {
            return Err(PayoutError::Cancelled);
        }

        let deadline = Instant::now() + self.config.confirmation_timeout();
        let submitted = tokio::time::timeout_at(
            deadline,
            self.executor
                .submit(&request.recipient, resolved.recipient_amount, &request.memo),
        )
        .await;

        let handle = match submitted {
            Ok(Ok(handle)) => handle,
            Ok(Err(AdapterError::Rejected(reason))) => {
                return Err(PayoutError::SubmissionRejected(reason));
            }
            Ok(Err(AdapterError::Unavailable(reason))) => {
                return Err(PayoutError::ServiceUnavailable(reason));
            }
            Err(_) => {
                warn!(
                    payout_id = %machine.payout_id(),
                    "Submission not acknowledged before timeout; transfer may still land"
                );
                return Err(PayoutError::SubmissionTimeout);
            }
        };

        if !machine.submitted(handle.clone()) {
            return Err(invalid_transition(machine, PayoutState::PendingConfirmation));
        }
        info!(
            payout_id = %machine.payout_id(),
            handle = %handle,
            amount = resolved.recipient_amount,
            "Transfer submitted"
        );
        Ok(handle)
    }

    /// PendingConfirmation: terminal receipt or timeout, then ledger on success
    async fn step_confirm(
        &self,
        machine: &mut PayoutMachine,
        request: &TransferRequest,
        resolved: &ResolvedAmount,
        handle: SubmissionHandle,
        warnings: &mut Vec<PayoutWarning>,
    ) {
        let receipt = match self.await_terminal(machine, &handle, resolved).await {
            Some((receipt, TransferOutcome::Confirmed { .. })) => receipt,
            Some(_) => return,
            None => {
                warn!(
                    payout_id = %machine.payout_id(),
                    handle = %handle,
                    "No receipt before timeout; transfer may still land"
                );
                machine.fail(PayoutError::ConfirmationTimeout { handle });
                return;
            }
        };

        let record = CompletedTransfer {
            payout_id: machine.payout_id(),
            handle,
            requester: request.requester,
            recipient: request.recipient,
            currency: request.currency.clone(),
            memo: request.memo.clone(),
            recipient_amount: resolved.recipient_amount,
            fee: resolved.fee,
            total_cost: resolved.total_cost,
            block_number: receipt.block_number,
            confirmed_at: Utc::now(),
        };

        if let Err(e) = self.ledger.record(&record).await {
            error!(
                payout_id = %record.payout_id,
                handle = %record.handle,
                error = %e,
                "Ledger record failed (transfer already confirmed)"
            );
            warnings.push(PayoutWarning::LedgerRecordFailed(e.to_string()));
        }
    }

    /// Race the event path against periodic polling until a receipt settles
    /// the machine or the confirmation timeout passes
    ///
    /// At most one poll is in flight; it stays a select branch so a slow poll
    /// never holds back the event path or the deadline.
    async fn await_terminal(
        &self,
        machine: &mut PayoutMachine,
        handle: &SubmissionHandle,
        resolved: &ResolvedAmount,
    ) -> Option<(Receipt, TransferOutcome)> {
        let deadline = Instant::now() + self.config.confirmation_timeout();
        let mut events = tokio::time::timeout_at(deadline, self.executor.watch(handle))
            .await
            .unwrap_or_default();
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll: Option<BoxFuture<'_, Result<Option<Receipt>, AdapterError>>> = None;

        loop {
            let idle = poll.is_none();
            let receipt = tokio::select! {
                biased;
                Some(receipt) = next_event(&mut events) => {
                    debug!(payout_id = %machine.payout_id(), handle = %handle, "Receipt via event");
                    receipt
                }
                _ = tokio::time::sleep_until(deadline) => return None,
                result = in_flight(&mut poll) => match result {
                    Ok(Some(receipt)) => {
                        debug!(payout_id = %machine.payout_id(), handle = %handle, "Receipt via poll");
                        receipt
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(
                            payout_id = %machine.payout_id(),
                            handle = %handle,
                            error = %e,
                            "Receipt poll failed (will retry)"
                        );
                        continue;
                    }
                },
                _ = ticker.tick(), if idle => {
                    poll = Some(self.executor.poll_receipt(handle));
                    continue;
                }
            };

            if let Some(outcome) = machine.settle(&receipt, resolved) {
                return Some((receipt, outcome));
            }
        }
    }
}

fn finish(
    machine: PayoutMachine,
    request: TransferRequest,
    resolved: Option<ResolvedAmount>,
    warnings: Vec<PayoutWarning>,
) -> PayoutReport {
    let outcome = machine
        .outcome()
        .cloned()
        .unwrap_or_else(|| TransferOutcome::Failed {
            reason: PayoutError::SystemError("payout ended without an outcome".to_string()),
        });

    info!(
        payout_id = %machine.payout_id(),
        state = %machine.state(),
        "Payout finished"
    );

    PayoutReport {
        payout_id: machine.payout_id(),
        request,
        resolved,
        outcome,
        history: machine.history().to_vec(),
        warnings,
    }
}

fn advance(
    machine: &mut PayoutMachine,
    from: PayoutState,
    to: PayoutState,
) -> Result<(), PayoutError> {
    if machine.advance(from, to) {
        Ok(())
    } else {
        Err(invalid_transition(machine, to))
    }
}

fn invalid_transition(machine: &PayoutMachine, to: PayoutState) -> PayoutError {
    PayoutError::SystemError(format!(
        "invalid transition {} -> {}",
        machine.state(),
        to
    ))
}

fn unavailable(e: AdapterError) -> PayoutError {
    PayoutError::ServiceUnavailable(e.to_string())
}

fn read_timed_out(what: &str) -> PayoutError {
    PayoutError::ServiceUnavailable(format!("{what} read timed out"))
}

/// Why a guarded call was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Deadline,
}

impl Interrupt {
    fn into_error(self, on_deadline: PayoutError) -> PayoutError {
        match self {
            Interrupt::Cancelled => PayoutError::Cancelled,
            Interrupt::Deadline => on_deadline,
        }
    }
}

/// Run `call` unless cancel or the deadline comes first; the call is dropped
/// when it loses
async fn guarded<F: Future>(
    call: F,
    cancel: &mut watch::Receiver<bool>,
    deadline: Instant,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => Err(Interrupt::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupt::Deadline),
        out = call => Ok(out),
    }
}

/// Output of the in-flight call, clearing the slot; pending forever when empty
async fn in_flight<T>(pending: &mut Option<BoxFuture<'_, T>>) -> T {
    let out = match pending.as_mut() {
        Some(call) => call.await,
        None => return std::future::pending().await,
    };
    *pending = None;
    out
}

/// Resolves once cancellation is requested; never if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Next pushed receipt; pending forever once the channel is used up
async fn next_event(events: &mut Option<oneshot::Receiver<Receipt>>) -> Option<Receipt> {
    let rx = match events.as_mut() {
        Some(rx) => rx,
        None => return std::future::pending().await,
    };
    let result = rx.await;
    *events = None;
    result.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_config_default() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.authorization_timeout(), Duration::from_secs(30));
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = CoordinatorConfig {
            poll_interval_ms: 0,
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_cancelled_ignores_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_millis(10), cancelled(&mut rx)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_next_event_consumes_once() {
        let (tx, rx) = oneshot::channel();
        let receipt = Receipt::success(SubmissionHandle::new("0x1"), 1);
        tx.send(receipt.clone()).unwrap();

        let mut events = Some(rx);
        assert_eq!(next_event(&mut events).await, Some(receipt));
        assert!(events.is_none());
    }
}

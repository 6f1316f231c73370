//! In-memory collaborators
//!
//! Simulated fee oracle, token authorization, executor and ledger. Used by the
//! test suites and by the demo binary (`mock-api` feature).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{AuthorizationService, FeeOracle, LedgerRecorder, TransferExecutor};
use crate::fee::FeeSchedule;
use crate::payout::error::{AdapterError, OracleError, RecordError};
use crate::payout::types::{
    CompletedTransfer, GrantHandle, GrantStatus, Quote, Receipt, SubmissionHandle, WalletAddress,
};

fn random_tx_hash() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 32]>()))
}

// ============================================================================
// Fee oracle
// ============================================================================

type FeeFn = Box<dyn Fn(u64) -> u64 + Send + Sync>;

/// Fee oracle backed by a fee function, with injectable failures
pub struct MockFeeOracle {
    fee_fn: FeeFn,
    call_count: AtomicUsize,
    /// Fail every n-th call (0 = never)
    fail_every: AtomicUsize,
    fail_always: Mutex<bool>,
}

impl MockFeeOracle {
    pub fn new(fee_fn: impl Fn(u64) -> u64 + Send + Sync + 'static) -> Self {
        Self {
            fee_fn: Box::new(fee_fn),
            call_count: AtomicUsize::new(0),
            fail_every: AtomicUsize::new(0),
            fail_always: Mutex::new(false),
        }
    }

    pub fn from_schedule(schedule: FeeSchedule) -> Self {
        Self::new(move |amount| schedule.fee_for(amount))
    }

    pub fn set_fail_every(&self, n: usize) {
        self.fail_every.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_always(&self, fail: bool) {
        *self.fail_always.lock().unwrap() = fail;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeOracle for MockFeeOracle {
    fn name(&self) -> &'static str {
        "mock_fee_oracle"
    }

    async fn quote(&self, amount: u64) -> Result<Quote, OracleError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;

        if *self.fail_always.lock().unwrap() {
            return Err(OracleError::CallFailed("Mock oracle down".to_string()));
        }
        let every = self.fail_every.load(Ordering::SeqCst);
        if every > 0 && call % every == 0 {
            return Err(OracleError::RateLimited);
        }

        let fee = (self.fee_fn)(amount);
        let total_from_sender = amount
            .checked_add(fee)
            .ok_or_else(|| OracleError::CallFailed("total overflows u64".to_string()))?;
        Ok(Quote {
            fee,
            total_from_sender,
            amount_to_recipient: amount,
        })
    }
}

// ============================================================================
// Authorization
// ============================================================================

struct PendingGrant {
    owner: WalletAddress,
    amount: u64,
    polls_remaining: usize,
}

/// Token balances and allowances held in memory
pub struct MockAuthorization {
    balances: Mutex<HashMap<WalletAddress, u64>>,
    allowances: Mutex<HashMap<WalletAddress, u64>>,
    grants: Mutex<HashMap<GrantHandle, PendingGrant>>,
    set_allowance_count: AtomicUsize,
    grant_status_count: AtomicUsize,
    /// Polls of `grant_status` before a grant settles
    settle_after_polls: AtomicUsize,
    never_settle: Mutex<bool>,
    /// Refuse the grant request itself (user declined the approval)
    decline_grant: Mutex<Option<String>>,
    /// Grant is accepted but fails when it lands
    reject_on_settle: Mutex<Option<String>>,
    unavailable: Mutex<bool>,
    /// `balance` and `allowance` never answer
    hang_reads: Mutex<bool>,
    /// `grant_status` never answers
    hang_grant_status: Mutex<bool>,
}

impl MockAuthorization {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
            set_allowance_count: AtomicUsize::new(0),
            grant_status_count: AtomicUsize::new(0),
            settle_after_polls: AtomicUsize::new(0),
            never_settle: Mutex::new(false),
            decline_grant: Mutex::new(None),
            reject_on_settle: Mutex::new(None),
            unavailable: Mutex::new(false),
            hang_reads: Mutex::new(false),
            hang_grant_status: Mutex::new(false),
        }
    }

    pub fn fund(&self, owner: WalletAddress, amount: u64) {
        self.balances.lock().unwrap().insert(owner, amount);
    }

    pub fn set_existing_allowance(&self, owner: WalletAddress, amount: u64) {
        self.allowances.lock().unwrap().insert(owner, amount);
    }

    pub fn set_settle_after_polls(&self, polls: usize) {
        self.settle_after_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_never_settle(&self, never: bool) {
        *self.never_settle.lock().unwrap() = never;
    }

    pub fn set_decline_grant(&self, reason: Option<&str>) {
        *self.decline_grant.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_reject_on_settle(&self, reason: Option<&str>) {
        *self.reject_on_settle.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn set_hang_reads(&self, hang: bool) {
        *self.hang_reads.lock().unwrap() = hang;
    }

    pub fn set_hang_grant_status(&self, hang: bool) {
        *self.hang_grant_status.lock().unwrap() = hang;
    }

    pub fn current_allowance(&self, owner: &WalletAddress) -> u64 {
        self.allowances
            .lock()
            .unwrap()
            .get(owner)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_allowance_count(&self) -> usize {
        self.set_allowance_count.load(Ordering::SeqCst)
    }

    pub fn grant_status_count(&self) -> usize {
        self.grant_status_count.load(Ordering::SeqCst)
    }

    async fn maybe_hang(flag: &Mutex<bool>) {
        let hang = *flag.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
    }

    fn check_available(&self) -> Result<(), AdapterError> {
        if *self.unavailable.lock().unwrap() {
            Err(AdapterError::Unavailable("Mock token contract unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockAuthorization {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationService for MockAuthorization {
    async fn balance(&self, owner: &WalletAddress) -> Result<u64, AdapterError> {
        Self::maybe_hang(&self.hang_reads).await;
        self.check_available()?;
        Ok(self.balances.lock().unwrap().get(owner).copied().unwrap_or(0))
    }

    async fn allowance(&self, owner: &WalletAddress) -> Result<u64, AdapterError> {
        Self::maybe_hang(&self.hang_reads).await;
        self.check_available()?;
        Ok(self.current_allowance(owner))
    }

    async fn set_allowance(
        &self,
        owner: &WalletAddress,
        amount: u64,
    ) -> Result<GrantHandle, AdapterError> {
        self.set_allowance_count.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if let Some(reason) = self.decline_grant.lock().unwrap().clone() {
            return Err(AdapterError::Rejected(reason));
        }

        let handle = GrantHandle::new(random_tx_hash());
        self.grants.lock().unwrap().insert(
            handle.clone(),
            PendingGrant {
                owner: *owner,
                amount,
                polls_remaining: self.settle_after_polls.load(Ordering::SeqCst),
            },
        );
        Ok(handle)
    }

    async fn grant_status(&self, handle: &GrantHandle) -> Result<GrantStatus, AdapterError> {
        self.grant_status_count.fetch_add(1, Ordering::SeqCst);
        Self::maybe_hang(&self.hang_grant_status).await;
        self.check_available()?;

        let mut grants = self.grants.lock().unwrap();
        let grant = grants
            .get_mut(handle)
            .ok_or_else(|| AdapterError::Unavailable(format!("unknown grant {handle}")))?;

        if *self.never_settle.lock().unwrap() {
            return Ok(GrantStatus::Pending);
        }
        if grant.polls_remaining > 0 {
            grant.polls_remaining -= 1;
            return Ok(GrantStatus::Pending);
        }
        if let Some(reason) = self.reject_on_settle.lock().unwrap().clone() {
            return Ok(GrantStatus::Rejected(reason));
        }

        self.allowances
            .lock()
            .unwrap()
            .insert(grant.owner, grant.amount);
        Ok(GrantStatus::Settled)
    }
}

// ============================================================================
// Executor
// ============================================================================

/// A transfer accepted by the mock executor
#[derive(Debug, Clone)]
pub struct SubmittedTransfer {
    pub recipient: WalletAddress,
    pub amount: u64,
    pub memo: String,
    polls_remaining: usize,
    block_number: u64,
}

/// Executor that accepts transfers into memory
pub struct MockExecutor {
    submissions: Mutex<HashMap<SubmissionHandle, SubmittedTransfer>>,
    next_block: AtomicU64,
    submit_count: AtomicUsize,
    poll_count: AtomicUsize,
    watch_count: AtomicUsize,
    /// Polls before the receipt becomes visible to `poll_receipt`
    confirm_after_polls: AtomicUsize,
    push_events: Mutex<bool>,
    poll_delivery: Mutex<bool>,
    reject_submit: Mutex<Option<String>>,
    revert: Mutex<Option<String>>,
    /// `submit` never answers
    hang_submit: Mutex<bool>,
    /// `poll_receipt` never answers
    hang_polls: Mutex<bool>,
    /// Latency of every `poll_receipt`
    poll_delay: Mutex<Duration>,
    /// Latency of the pushed receipt after `watch`
    event_delay: Mutex<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(HashMap::new()),
            next_block: AtomicU64::new(1_000),
            submit_count: AtomicUsize::new(0),
            poll_count: AtomicUsize::new(0),
            watch_count: AtomicUsize::new(0),
            confirm_after_polls: AtomicUsize::new(0),
            push_events: Mutex::new(false),
            poll_delivery: Mutex::new(true),
            reject_submit: Mutex::new(None),
            revert: Mutex::new(None),
            hang_submit: Mutex::new(false),
            hang_polls: Mutex::new(false),
            poll_delay: Mutex::new(Duration::ZERO),
            event_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_confirm_after_polls(&self, polls: usize) {
        self.confirm_after_polls.store(polls, Ordering::SeqCst);
    }

    /// Deliver receipts through `watch` as soon as it is called
    pub fn set_push_events(&self, push: bool) {
        *self.push_events.lock().unwrap() = push;
    }

    /// Make receipts visible to `poll_receipt`
    pub fn set_poll_delivery(&self, deliver: bool) {
        *self.poll_delivery.lock().unwrap() = deliver;
    }

    pub fn set_reject_submit(&self, reason: Option<&str>) {
        *self.reject_submit.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_revert(&self, reason: Option<&str>) {
        *self.revert.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_hang_submit(&self, hang: bool) {
        *self.hang_submit.lock().unwrap() = hang;
    }

    pub fn set_hang_polls(&self, hang: bool) {
        *self.hang_polls.lock().unwrap() = hang;
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = delay;
    }

    pub fn set_event_delay(&self, delay: Duration) {
        *self.event_delay.lock().unwrap() = delay;
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watch_count.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmittedTransfer> {
        self.submissions.lock().unwrap().values().cloned().collect()
    }

    fn receipt_for(&self, handle: &SubmissionHandle, tx: &SubmittedTransfer) -> Receipt {
        match self.revert.lock().unwrap().clone() {
            Some(reason) => Receipt::reverted(handle.clone(), reason),
            None => Receipt::success(handle.clone(), tx.block_number),
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferExecutor for MockExecutor {
    async fn submit(
        &self,
        recipient: &WalletAddress,
        amount: u64,
        memo: &str,
    ) -> Result<SubmissionHandle, AdapterError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        let hang = *self.hang_submit.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }

        if let Some(reason) = self.reject_submit.lock().unwrap().clone() {
            return Err(AdapterError::Rejected(reason));
        }

        let handle = SubmissionHandle::new(random_tx_hash());
        let tx = SubmittedTransfer {
            recipient: *recipient,
            amount,
            memo: memo.to_string(),
            polls_remaining: self.confirm_after_polls.load(Ordering::SeqCst),
            block_number: self.next_block.fetch_add(1, Ordering::SeqCst),
        };
        self.submissions.lock().unwrap().insert(handle.clone(), tx);
        Ok(handle)
    }

    async fn poll_receipt(
        &self,
        handle: &SubmissionHandle,
    ) -> Result<Option<Receipt>, AdapterError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let hang = *self.hang_polls.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = *self.poll_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut submissions = self.submissions.lock().unwrap();
        let tx = submissions
            .get_mut(handle)
            .ok_or_else(|| AdapterError::Unavailable(format!("unknown transaction {handle}")))?;

        if !*self.poll_delivery.lock().unwrap() {
            return Ok(None);
        }
        if tx.polls_remaining > 0 {
            tx.polls_remaining -= 1;
            return Ok(None);
        }
        Ok(Some(self.receipt_for(handle, tx)))
    }

    async fn watch(&self, handle: &SubmissionHandle) -> Option<oneshot::Receiver<Receipt>> {
        self.watch_count.fetch_add(1, Ordering::SeqCst);

        if !*self.push_events.lock().unwrap() {
            return None;
        }
        let receipt = {
            let submissions = self.submissions.lock().unwrap();
            let tx = submissions.get(handle)?;
            self.receipt_for(handle, tx)
        };
        let (tx, rx) = oneshot::channel();
        let delay = *self.event_delay.lock().unwrap();
        if delay.is_zero() {
            // Ignore send errors if the receiver was dropped
            let _ = tx.send(receipt);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(receipt);
            });
        }
        Some(rx)
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Ledger that keeps records in memory
pub struct MemoryLedger {
    records: Mutex<Vec<CompletedTransfer>>,
    fail: Mutex<bool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn records(&self) -> Vec<CompletedTransfer> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRecorder for MemoryLedger {
    async fn record(&self, transfer: &CompletedTransfer) -> Result<(), RecordError> {
        if *self.fail.lock().unwrap() {
            return Err(RecordError::Unavailable("Mock ledger failure".to_string()));
        }
        self.records.lock().unwrap().push(transfer.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        WalletAddress::from_bytes(bytes)
    }

    #[tokio::test]
    async fn test_mock_oracle_fail_every() {
        let oracle = MockFeeOracle::new(|_| 10);
        oracle.set_fail_every(3);

        assert!(oracle.quote(100).await.is_ok());
        assert!(oracle.quote(100).await.is_ok());
        assert_eq!(oracle.quote(100).await, Err(OracleError::RateLimited));
        let quote = oracle.quote(100).await.unwrap();
        assert_eq!(quote.total_from_sender, 110);
        assert_eq!(oracle.call_count(), 4);
    }

    #[tokio::test]
    async fn test_mock_authorization_grant_settles() {
        let auth = MockAuthorization::new();
        auth.set_settle_after_polls(1);
        let owner = addr(1);

        let handle = auth.set_allowance(&owner, 500).await.unwrap();
        assert_eq!(auth.grant_status(&handle).await.unwrap(), GrantStatus::Pending);
        assert_eq!(auth.grant_status(&handle).await.unwrap(), GrantStatus::Settled);
        assert_eq!(auth.allowance(&owner).await.unwrap(), 500);

        // Setting again replaces, never adds
        let handle = auth.set_allowance(&owner, 300).await.unwrap();
        auth.grant_status(&handle).await.unwrap();
        auth.grant_status(&handle).await.unwrap();
        assert_eq!(auth.allowance(&owner).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_mock_executor_paths() {
        let executor = MockExecutor::new();
        executor.set_push_events(true);
        executor.set_confirm_after_polls(1);

        let handle = executor.submit(&addr(2), 1_000, "memo").await.unwrap();
        assert_eq!(executor.poll_receipt(&handle).await.unwrap(), None);
        let polled = executor.poll_receipt(&handle).await.unwrap().unwrap();
        assert!(polled.is_success());

        let pushed = executor.watch(&handle).await.unwrap().await.unwrap();
        assert_eq!(pushed, polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_executor_latency() {
        let executor = MockExecutor::new();
        executor.set_push_events(true);
        executor.set_event_delay(Duration::from_secs(3));
        executor.set_poll_delay(Duration::from_secs(1));

        let handle = executor.submit(&addr(2), 1_000, "").await.unwrap();
        let started = tokio::time::Instant::now();
        assert!(executor.poll_receipt(&handle).await.unwrap().is_some());
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));

        let rx = executor.watch(&handle).await.unwrap();
        rx.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_hung_calls_never_answer() {
        let executor = MockExecutor::new();
        let handle = executor.submit(&addr(2), 1_000, "").await.unwrap();
        executor.set_hang_polls(true);
        let polled =
            tokio::time::timeout(Duration::from_secs(3600), executor.poll_receipt(&handle)).await;
        assert!(polled.is_err());

        let auth = MockAuthorization::new();
        auth.set_hang_reads(true);
        let read = tokio::time::timeout(Duration::from_secs(3600), auth.balance(&addr(1))).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn test_mock_executor_reject() {
        let executor = MockExecutor::new();
        executor.set_reject_submit(Some("user declined"));

        let result = executor.submit(&addr(2), 1_000, "").await;
        assert_eq!(result, Err(AdapterError::Rejected("user declined".to_string())));
        assert!(executor.submitted().is_empty());
    }
}

//! Collaborator Adapters
//!
//! Traits for the external services the payout FSM talks to: the fee oracle,
//! the token authorization service, the transfer executor and the ledger.
//! Implementations are injected into the coordinator as `Arc<dyn ...>`.

#[cfg(any(test, feature = "mock-api"))]
pub mod mock;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::error::{AdapterError, OracleError, RecordError};
use super::types::{
    CompletedTransfer, GrantHandle, GrantStatus, Quote, Receipt, SubmissionHandle, WalletAddress,
};

/// Read-only fee quoting function
///
/// `total_from_sender` must be non-decreasing in `amount`. The resolver relies
/// on this and does not verify it.
#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// Get oracle name for logging
    fn name(&self) -> &'static str;

    /// Quote the fee for sending `amount` to a recipient
    async fn quote(&self, amount: u64) -> Result<Quote, OracleError>;
}

/// Token balance and spending authorization for the payout contract
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Token balance of `owner`
    async fn balance(&self, owner: &WalletAddress) -> Result<u64, AdapterError>;

    /// Allowance `owner` currently grants the payout contract
    async fn allowance(&self, owner: &WalletAddress) -> Result<u64, AdapterError>;

    /// Set the allowance to exactly `amount`
    ///
    /// # Idempotency
    /// Sets, never adds. Issuing the same grant twice leaves the same allowance.
    async fn set_allowance(
        &self,
        owner: &WalletAddress,
        amount: u64,
    ) -> Result<GrantHandle, AdapterError>;

    /// Current status of a previously requested grant
    async fn grant_status(&self, handle: &GrantHandle) -> Result<GrantStatus, AdapterError>;
}

/// Submits transfers and reports their on-chain outcome
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Submit a transfer of `amount` to `recipient`
    ///
    /// `Err(AdapterError::Rejected)` means nothing was sent.
    async fn submit(
        &self,
        recipient: &WalletAddress,
        amount: u64,
        memo: &str,
    ) -> Result<SubmissionHandle, AdapterError>;

    /// Polling path: the terminal receipt if it exists yet
    async fn poll_receipt(&self, handle: &SubmissionHandle)
    -> Result<Option<Receipt>, AdapterError>;

    /// Event path: a one-shot notification of the terminal receipt
    ///
    /// `None` if this executor has no push notifications.
    async fn watch(&self, handle: &SubmissionHandle) -> Option<oneshot::Receiver<Receipt>>;
}

/// Persists confirmed transfers
#[async_trait]
pub trait LedgerRecorder: Send + Sync {
    async fn record(&self, transfer: &CompletedTransfer) -> Result<(), RecordError>;
}

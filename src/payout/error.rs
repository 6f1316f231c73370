//! Payout Error Types
//!
//! Error taxonomy for amount resolution, collaborators and the payout FSM.

use thiserror::Error;

use super::types::SubmissionHandle;

/// Fee oracle call errors
///
/// Always treated as transient by the resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Fee oracle rate limited")]
    RateLimited,

    #[error("Fee oracle call failed: {0}")]
    CallFailed(String),
}

/// Amount resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Requested total must be greater than zero")]
    ZeroAmount,

    #[error("Requested total {requested_total} cannot cover the minimum fee")]
    Infeasible { requested_total: u64 },

    #[error("Fee oracle returned an inconsistent quote: {0}")]
    InconsistentQuote(String),
}

impl ResolutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionError::ZeroAmount => "ZERO_AMOUNT",
            ResolutionError::Infeasible { .. } => "INFEASIBLE",
            ResolutionError::InconsistentQuote(_) => "INCONSISTENT_QUOTE",
        }
    }
}

/// Collaborator (authorization service / executor) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Explicit refusal (user declined, pre-flight validation failed)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Service unreachable or call failed without a verdict
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Ledger recorder errors
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failure reasons of a payout
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayoutError {
    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Amount resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    // === Authorization Errors ===
    #[error("Authorization grant did not settle in time")]
    AuthorizationTimeout,

    #[error("Authorization rejected: {0}")]
    AuthorizationRejected(String),

    // === Submission Errors ===
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Executor did not acknowledge the submission in time (may still complete)")]
    SubmissionTimeout,

    #[error("Transfer {handle} not confirmed in time (may still complete)")]
    ConfirmationTimeout { handle: SubmissionHandle },

    #[error("Transfer reverted on-chain: {0}")]
    OnChainRevert(String),

    #[error("Payout cancelled before submission")]
    Cancelled,

    // === System Errors ===
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl PayoutError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PayoutError::InvalidRequest(_) => "INVALID_REQUEST",
            PayoutError::Resolution(e) => e.code(),
            PayoutError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PayoutError::AuthorizationTimeout => "AUTHORIZATION_TIMEOUT",
            PayoutError::AuthorizationRejected(_) => "AUTHORIZATION_REJECTED",
            PayoutError::SubmissionRejected(_) => "SUBMISSION_REJECTED",
            PayoutError::SubmissionTimeout => "SUBMISSION_TIMEOUT",
            PayoutError::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            PayoutError::OnChainRevert(_) => "ON_CHAIN_REVERT",
            PayoutError::Cancelled => "CANCELLED",
            PayoutError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            PayoutError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// The user can fix this by changing the request (amount, funds, approval)
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            PayoutError::InvalidRequest(_)
                | PayoutError::Resolution(ResolutionError::ZeroAmount)
                | PayoutError::Resolution(ResolutionError::Infeasible { .. })
                | PayoutError::InsufficientBalance { .. }
                | PayoutError::SubmissionRejected(_)
        )
    }

    /// Retryable by re-initiating the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PayoutError::AuthorizationTimeout
                | PayoutError::AuthorizationRejected(_)
                | PayoutError::ServiceUnavailable(_)
                | PayoutError::Cancelled
        )
    }

    /// Outcome unknown: funds may still move
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            PayoutError::SubmissionTimeout | PayoutError::ConfirmationTimeout { .. }
        )
    }
}

impl From<tokio::task::JoinError> for PayoutError {
    fn from(e: tokio::task::JoinError) -> Self {
        PayoutError::SystemError(e.to_string())
    }
}

//! Payout FSM
//!
//! Sends a stablecoin payout where the payer states the total they want to
//! spend, fee included.
//!
//! # Architecture
//!
//! - [`resolver`] inverts the fee schedule: largest recipient amount whose
//!   quoted total fits the requested total.
//! - [`coordinator`] drives one request through authorization, submission and
//!   confirmation, then hands confirmed transfers to the ledger.
//! - [`adapters`] holds the collaborator traits (fee oracle, token
//!   authorization, executor, ledger) injected into the coordinator.
//!
//! # State Machine
//!
//! ```text
//! RESOLVING → AUTHORIZATION_CHECK → AUTHORIZATION_PENDING → SUBMITTING → PENDING_CONFIRMATION
//!                     │                                          ↑               │        │
//!                     └──────────── (allowance ok) ──────────────┘           CONFIRMED  REVERTED
//!
//! any non-terminal state → FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Fee-inclusive bound**: `recipient_amount + fee == total_cost <= requested_total`
//! 2. **Exact grant**: an allowance is requested for exactly the resolved total cost
//! 3. **Irrevocable submission**: after `SUBMITTING` the payout is observed to a
//!    terminal state; cancellation is refused
//! 4. **Idempotency**: a second terminal receipt never changes the outcome and
//!    never produces a second ledger record

pub mod adapters;
pub mod coordinator;
pub mod error;
pub mod machine;
pub mod payroll;
pub mod resolver;
pub mod state;
pub mod types;


// Re-exports for convenience
pub use coordinator::{
    CoordinatorConfig, PayoutConfig, PayoutCoordinator, PayoutHandle, PayoutReport, PayoutWarning,
};
pub use error::{AdapterError, OracleError, PayoutError, RecordError, ResolutionError};
pub use machine::PayoutProgress;
pub use payroll::{PayrollEntry, PayrollLine, PayrollSummary, run_payroll};
pub use resolver::{AmountResolver, ResolverConfig};
pub use state::PayoutState;
pub use types::{
    CompletedTransfer, CurrencyCode, PayoutId, Quote, Receipt, ResolvedAmount, SubmissionHandle,
    TransferOutcome, TransferRequest, WalletAddress,
};

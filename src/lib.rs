//! GlobePay Payout - fee-inclusive stablecoin payouts
//!
//! The payer states what they want to spend, fee included; the recipient gets
//! the largest amount that fits.
//!
//! # Modules
//!
//! - [`payout`] - Amount resolver and payout FSM (coordinator, adapters, payroll)
//! - [`fee`] - Fee schedule (`max(min_fee, amount * bps / 10_000)`)
//! - [`money`] - Decimal string ↔ u64 conversion at the presentation boundary
//! - [`ledger`] - JSON-lines ledger of confirmed transfers
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod fee;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod payout;

// Convenient re-exports at crate root
pub use fee::FeeSchedule;
pub use ledger::FileLedgerRecorder;
pub use payout::{
    AmountResolver, PayoutCoordinator, PayoutError, PayoutState, ResolvedAmount, TransferOutcome,
    TransferRequest,
};

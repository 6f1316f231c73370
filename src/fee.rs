//! Fee calculation utilities
//!
//! The payout contract charges `max(min_fee, amount * fee_bps / 10_000)` on top
//! of the recipient amount. Rates use basis points: 100 = 1.00%.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::payout::adapters::FeeOracle;
use crate::payout::error::OracleError;
use crate::payout::types::Quote;

/// Basis point denominator (10_000 = 100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Default fee rate (200 = 2%)
pub const DEFAULT_FEE_BPS: u16 = 200;

/// Default minimum fee (50_000 = 0.05 USDC)
pub const DEFAULT_MIN_FEE: u64 = 50_000;

/// Calculate fee from amount, rate and floor.
///
/// Uses u128 intermediate to prevent overflow.
///
/// # Example
/// ```
/// use globepay_payout::fee::calculate_fee;
/// // 1 USDC (1_000_000 units) at 2% with a 0.05 USDC floor
/// assert_eq!(calculate_fee(1_000_000, 200, 50_000), 50_000);
/// // 10 USDC at 2% = 0.2 USDC
/// assert_eq!(calculate_fee(10_000_000, 200, 50_000), 200_000);
/// ```
#[inline]
pub fn calculate_fee(amount: u64, fee_bps: u16, min_fee: u64) -> u64 {
    let fee = (amount as u128 * fee_bps as u128) / BPS_DENOMINATOR as u128;
    u64::try_from(fee).unwrap_or(u64::MAX).max(min_fee)
}

/// The contract's fee schedule, evaluated locally
///
/// Implements [`FeeOracle`] with `quoteP2P` semantics, so the resolver can run
/// without a contract read per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub fee_bps: u16,
    pub min_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            min_fee: DEFAULT_MIN_FEE,
        }
    }
}

impl FeeSchedule {
    pub fn new(fee_bps: u16, min_fee: u64) -> Self {
        Self { fee_bps, min_fee }
    }

    #[inline]
    pub fn fee_for(&self, amount: u64) -> u64 {
        calculate_fee(amount, self.fee_bps, self.min_fee)
    }

    /// Quote sending `amount`; `None` if the total overflows u64
    pub fn quote(&self, amount: u64) -> Option<Quote> {
        let fee = self.fee_for(amount);
        Some(Quote {
            fee,
            total_from_sender: amount.checked_add(fee)?,
            amount_to_recipient: amount,
        })
    }
}

#[async_trait]
impl FeeOracle for FeeSchedule {
    fn name(&self) -> &'static str {
        "fee_schedule"
    }

    async fn quote(&self, amount: u64) -> Result<Quote, OracleError> {
        FeeSchedule::quote(self, amount)
            .ok_or_else(|| OracleError::CallFailed(format!("total overflows for {amount}")))
    }
}

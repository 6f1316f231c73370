//! Money Conversion Module
//!
//! Conversion between the internal u64 smallest-unit representation and the
//! decimal strings users type and read. Only the presentation boundary (CLI,
//! payroll files, log summaries) goes through here; the resolver and the FSM
//! never see decimals.
//!
//! ## Internal Representation
//! - All amounts are `u64` in the token's smallest unit
//! - The scale factor is `10^decimals` (USDC: 10^6)
//!
//! ## Usage
//! ```rust
//! use globepay_payout::money::{format_usdc, parse_usdc};
//!
//! // Payer types "1.5" USDC
//! let internal = parse_usdc("1.5").unwrap();
//! assert_eq!(internal, 1_500_000);
//!
//! assert_eq!(format_usdc(950_000), "0.950000");
//! ```

use rust_decimal::Decimal;
use thiserror::Error;

/// USDC token decimals
pub const USDC_DECIMALS: u32 = 6;

/// Money conversion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: User → Internal (String → u64)
// ============================================================================

/// Convert a decimal amount string to internal u64 representation
///
/// Strict: no sign, no exponent, no separators, digits on both sides of the
/// dot, and never more fractional digits than `decimals` (no silent truncation).
///
/// # Errors
/// * `PrecisionOverflow` - more fractional digits than `decimals`
/// * `InvalidAmount` - zero or signed
/// * `Overflow` - result does not fit u64
/// * `InvalidFormat` - anything else malformed
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<u64, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            if frac.contains('.') {
                return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
            }
            if decimals == 0 {
                return Err(MoneyError::InvalidFormat(
                    "decimals is 0, but dot provided".into(),
                ));
            }
            (whole, frac)
        }
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in {amount_str}"
        )));
    }

    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let whole_num: u64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = decimals as usize);
        frac_padded
            .parse()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let multiplier = 10u64
        .checked_pow(decimals)
        .ok_or(MoneyError::Overflow)?;
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }
    Ok(amount)
}

#[inline]
pub fn parse_usdc(amount_str: &str) -> Result<u64, MoneyError> {
    parse_amount(amount_str, USDC_DECIMALS)
}

// ============================================================================
// Format: Internal → User (u64 → String)
// ============================================================================

/// Convert internal u64 to a display string with `display_decimals` places
pub fn format_amount(value: u64, decimals: u32, display_decimals: u32) -> String {
    let decimal_value = Decimal::from_i128_with_scale(value as i128, decimals);
    format!("{:.prec$}", decimal_value, prec = display_decimals as usize)
}

/// Full precision string: every smallest unit shown
pub fn format_amount_full(value: u64, decimals: u32) -> String {
    format_amount(value, decimals, decimals)
}

#[inline]
pub fn format_usdc(value: u64) -> String {
    format_amount_full(value, USDC_DECIMALS)
}

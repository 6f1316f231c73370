//! Payout Core Types
//!
//! Type definitions shared by the amount resolver and the payout FSM.
//! All amounts are u64 in the smallest currency unit (USDC: 6 decimals).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use super::error::PayoutError;

/// Payout ID type - ULID-based unique identifier
///
/// One per request. Used to correlate log lines and ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayoutId(ulid::Ulid);

impl PayoutId {
    /// Generate a new unique PayoutId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for PayoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PayoutId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for PayoutId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// EVM wallet address (20 bytes)
///
/// Parsed from `0x` followed by exactly 40 hex characters. Comparison is
/// case-insensitive because the bytes are stored, not the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress([u8; 20]);

impl WalletAddress {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Shortened form for display, e.g. `0x1234...abcd`
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for WalletAddress {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("0x")
            .ok_or_else(|| PayoutError::InvalidRequest(format!("address missing 0x prefix: {s}")))?;
        if hex_part.len() != 40 {
            return Err(PayoutError::InvalidRequest(format!(
                "address must have 40 hex characters, got {}",
                hex_part.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes)
            .map_err(|e| PayoutError::InvalidRequest(format!("invalid address {s}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Currency code (e.g. "USDC")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn usdc() -> Self {
        Self("USDC".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = PayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > 10 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PayoutError::InvalidRequest(format!("invalid currency code: {s}")));
        }
        Ok(Self(code))
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a submitted transfer (transaction hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of a pending allowance grant (approval transaction hash)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrantHandle(String);

impl GrantHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GrantHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Quotes and resolved amounts
// ============================================================================

/// Fee quote for a candidate recipient amount
///
/// Mirrors the payout contract's `quoteP2P(amount)` return tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub fee: u64,
    pub total_from_sender: u64,
    pub amount_to_recipient: u64,
}

/// Output of the amount resolver
///
/// `total_cost <= requested_total`, and no larger recipient amount fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedAmount {
    pub recipient_amount: u64,
    pub fee: u64,
    pub total_cost: u64,
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// A single payout request, consumed once by the coordinator
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient: WalletAddress,
    /// Total the payer is willing to spend, fee included
    pub requested_total: u64,
    pub currency: CurrencyCode,
    pub memo: String,
    pub requester: WalletAddress,
}

impl TransferRequest {
    pub fn new(
        requester: WalletAddress,
        recipient: WalletAddress,
        requested_total: u64,
        currency: CurrencyCode,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            recipient,
            requested_total,
            currency,
            memo: memo.into(),
            requester,
        }
    }
}

/// Receipt status reported by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted(String),
}

/// Terminal on-chain receipt for a submitted transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub handle: SubmissionHandle,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
}

impl Receipt {
    pub fn success(handle: SubmissionHandle, block_number: u64) -> Self {
        Self {
            handle,
            status: ReceiptStatus::Success,
            block_number: Some(block_number),
        }
    }

    pub fn reverted(handle: SubmissionHandle, reason: impl Into<String>) -> Self {
        Self {
            handle,
            status: ReceiptStatus::Reverted(reason.into()),
            block_number: None,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Allowance grant status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantStatus {
    Pending,
    Settled,
    Rejected(String),
}

/// Observable outcome of a payout
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    /// Accepted by the executor, not yet terminal
    Submitted { handle: SubmissionHandle },
    Confirmed {
        handle: SubmissionHandle,
        recipient_amount: u64,
        fee: u64,
    },
    Reverted {
        handle: SubmissionHandle,
        reason: String,
    },
    Failed { reason: PayoutError },
}

impl TransferOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferOutcome::Submitted { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransferOutcome::Confirmed { .. })
    }

    pub fn handle(&self) -> Option<&SubmissionHandle> {
        match self {
            TransferOutcome::Submitted { handle }
            | TransferOutcome::Confirmed { handle, .. }
            | TransferOutcome::Reverted { handle, .. } => Some(handle),
            TransferOutcome::Failed { reason } => match reason {
                PayoutError::ConfirmationTimeout { handle } => Some(handle),
                _ => None,
            },
        }
    }

    /// Error view of a non-successful terminal outcome
    pub fn error(&self) -> Option<PayoutError> {
        match self {
            TransferOutcome::Reverted { reason, .. } => {
                Some(PayoutError::OnChainRevert(reason.clone()))
            }
            TransferOutcome::Failed { reason } => Some(reason.clone()),
            _ => None,
        }
    }
}

/// Record handed to the ledger after on-chain confirmation
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTransfer {
    pub payout_id: PayoutId,
    pub handle: SubmissionHandle,
    pub requester: WalletAddress,
    pub recipient: WalletAddress,
    pub currency: CurrencyCode,
    pub memo: String,
    pub recipient_amount: u64,
    pub fee: u64,
    pub total_cost: u64,
    pub block_number: Option<u64>,
    pub confirmed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x00000000000000000000000000000000000000aB";

    #[test]
    fn test_wallet_address_parse() {
        let addr: WalletAddress = ADDR.parse().unwrap();
        assert_eq!(addr.as_bytes()[19], 0xab);
        assert_eq!(addr.to_string(), ADDR.to_lowercase());
    }

    #[test]
    fn test_wallet_address_case_insensitive() {
        let upper: WalletAddress = ADDR.parse().unwrap();
        let lower: WalletAddress = ADDR.to_lowercase().parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_wallet_address_rejects_malformed() {
        assert!("00000000000000000000000000000000000000ab".parse::<WalletAddress>().is_err());
        assert!("0x1234".parse::<WalletAddress>().is_err());
        assert!("0xzz000000000000000000000000000000000000ab".parse::<WalletAddress>().is_err());
        assert!(format!("{ADDR}00").parse::<WalletAddress>().is_err());
    }

    #[test]
    fn test_wallet_address_short() {
        let addr: WalletAddress = "0x1234567890abcdef1234567890abcdef12345678".parse().unwrap();
        assert_eq!(addr.short(), "0x1234...5678");
    }

    #[test]
    fn test_currency_code() {
        let code: CurrencyCode = " usdc ".parse().unwrap();
        assert_eq!(code, CurrencyCode::usdc());
        assert!("".parse::<CurrencyCode>().is_err());
        assert!("US-DC".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_payout_id_roundtrip() {
        let id = PayoutId::new();
        let parsed: PayoutId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_outcome_handle_and_error() {
        let handle = SubmissionHandle::new("0xabc");
        let reverted = TransferOutcome::Reverted {
            handle: handle.clone(),
            reason: "paused".into(),
        };
        assert_eq!(reverted.handle(), Some(&handle));
        assert!(matches!(reverted.error(), Some(PayoutError::OnChainRevert(_))));

        let timeout = TransferOutcome::Failed {
            reason: PayoutError::ConfirmationTimeout {
                handle: handle.clone(),
            },
        };
        assert_eq!(timeout.handle(), Some(&handle));
        assert!(!TransferOutcome::Submitted { handle }.is_terminal());
    }
}

//! Amount Resolver
//!
//! Inverts the fee schedule: given the total a payer wants to spend (fee
//! included), find the largest recipient amount whose quoted total still fits.
//!
//! # Algorithm
//!
//! Binary search over `[1, requested_total]` against the fee oracle. Relies on
//! `quote(x).total_from_sender` being non-decreasing in `x`.
//!
//! The oracle is a rate-limited contract read, so a failed call is retried on
//! the same candidate with exponential backoff. Only after the per-candidate
//! retry budget is spent is the candidate treated as too expensive. Every call
//! counts toward `max_iterations`, which bounds the whole search.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::adapters::FeeOracle;
use super::error::ResolutionError;
use super::types::{Quote, ResolvedAmount};

/// Configuration for the amount resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Ceiling on oracle calls per resolution (successful or not)
    pub max_iterations: u32,
    /// Retries of one candidate before it is treated as too expensive
    pub max_retries_per_candidate: u32,
    /// First backoff after an oracle error
    pub backoff_base_ms: u64,
    /// Backoff cap
    pub backoff_max_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 48,
            max_retries_per_candidate: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
        }
    }
}

impl ResolverConfig {
    /// Backoff before the next call after `consecutive_errors` failures in a row
    pub fn backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Fee-inclusive amount resolver
#[derive(Debug, Clone, Default)]
pub struct AmountResolver {
    config: ResolverConfig,
}

impl AmountResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Find the largest recipient amount with `fee + amount <= requested_total`
    ///
    /// # Errors
    /// * `ZeroAmount` - `requested_total` is 0
    /// * `Infeasible` - not even 1 unit fits, or the oracle never answered
    /// * `InconsistentQuote` - the winning quote contradicts itself
    pub async fn resolve(
        &self,
        requested_total: u64,
        oracle: &dyn FeeOracle,
    ) -> Result<ResolvedAmount, ResolutionError> {
        if requested_total == 0 {
            return Err(ResolutionError::ZeroAmount);
        }

        let mut low: u64 = 1;
        let mut high: u64 = requested_total;
        let mut best: Option<(u64, Quote)> = None;

        let mut calls: u32 = 0;
        let mut candidate_failures: u32 = 0;
        let mut consecutive_errors: u32 = 0;

        while low <= high && calls < self.config.max_iterations {
            let mid = low + (high - low) / 2;
            if mid == 0 {
                break;
            }

            calls += 1;
            match oracle.quote(mid).await {
                Ok(quote) => {
                    candidate_failures = 0;
                    consecutive_errors = 0;
                    trace!(
                        candidate = mid,
                        total = quote.total_from_sender,
                        fee = quote.fee,
                        "Quote"
                    );

                    if quote.total_from_sender <= requested_total {
                        best = Some((mid, quote));
                        match mid.checked_add(1) {
                            Some(next) => low = next,
                            None => break,
                        }
                    } else {
                        high = mid - 1;
                    }
                }
                Err(e) => {
                    candidate_failures += 1;
                    consecutive_errors += 1;

                    if candidate_failures > self.config.max_retries_per_candidate {
                        warn!(
                            oracle = oracle.name(),
                            candidate = mid,
                            error = %e,
                            "Oracle kept failing, treating candidate as too expensive"
                        );
                        candidate_failures = 0;
                        high = mid - 1;
                    } else {
                        debug!(
                            oracle = oracle.name(),
                            candidate = mid,
                            attempt = candidate_failures,
                            error = %e,
                            "Oracle call failed, retrying"
                        );
                    }

                    if low <= high && calls < self.config.max_iterations {
                        tokio::time::sleep(self.config.backoff(consecutive_errors)).await;
                    }
                }
            }
        }

        if low <= high && calls >= self.config.max_iterations {
            warn!(
                requested_total,
                calls,
                best = best.map(|(amount, _)| amount),
                "Resolver hit iteration ceiling"
            );
        }

        let (recipient_amount, quote) =
            best.ok_or(ResolutionError::Infeasible { requested_total })?;

        let resolved = validate(recipient_amount, quote, requested_total)?;
        debug!(
            requested_total,
            recipient_amount = resolved.recipient_amount,
            fee = resolved.fee,
            total_cost = resolved.total_cost,
            calls,
            "Amount resolved"
        );
        Ok(resolved)
    }
}

fn validate(
    recipient_amount: u64,
    quote: Quote,
    requested_total: u64,
) -> Result<ResolvedAmount, ResolutionError> {
    let inconsistent = |msg: String| -> Result<ResolvedAmount, ResolutionError> {
        Err(ResolutionError::InconsistentQuote(msg))
    };

    if quote.fee == 0 {
        return inconsistent(format!("zero fee for amount {recipient_amount}"));
    }
    if quote.total_from_sender == 0 {
        return inconsistent(format!("zero total for amount {recipient_amount}"));
    }
    if quote.amount_to_recipient != recipient_amount {
        return inconsistent(format!(
            "quoted recipient amount {} differs from requested {}",
            quote.amount_to_recipient, recipient_amount
        ));
    }
    if recipient_amount.checked_add(quote.fee) != Some(quote.total_from_sender) {
        return inconsistent(format!(
            "total {} != amount {} + fee {}",
            quote.total_from_sender, recipient_amount, quote.fee
        ));
    }
    debug_assert!(quote.total_from_sender <= requested_total);

    Ok(ResolvedAmount {
        recipient_amount,
        fee: quote.fee,
        total_cost: quote.total_from_sender,
    })
}

//! Payroll runs
//!
//! A batch of payouts from one employer. Each entry is an independent payout
//! through the same coordinator; one failing entry never stops the rest.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::info;

use super::coordinator::{PayoutCoordinator, PayoutReport};
use crate::money::parse_usdc;
use super::types::{CurrencyCode, TransferOutcome, TransferRequest, WalletAddress};

/// One employee line of a payroll run
#[derive(Debug, Clone, Deserialize)]
pub struct PayrollEntry {
    pub recipient: String,
    /// Total the employer spends on this line, fee included, in USDC (e.g. "1.5")
    pub amount: String,
    #[serde(default)]
    pub memo: String,
}

/// Aggregate of a payroll run
#[derive(Debug, Default)]
pub struct PayrollSummary {
    /// One report per entry, in entry order
    pub reports: Vec<PayrollLine>,
    pub confirmed: usize,
    pub reverted: usize,
    pub failed: usize,
    /// Sum over confirmed lines
    pub total_cost: u64,
    /// Sum over confirmed lines
    pub total_fees: u64,
}

/// Result of one entry
#[derive(Debug)]
pub enum PayrollLine {
    /// Entry rejected before reaching the coordinator
    Invalid { recipient: String, reason: String },
    Executed(Box<PayoutReport>),
}

impl PayrollSummary {
    fn push(&mut self, line: PayrollLine) {
        match &line {
            PayrollLine::Invalid { .. } => self.failed += 1,
            PayrollLine::Executed(report) => match &report.outcome {
                TransferOutcome::Confirmed { .. } => {
                    self.confirmed += 1;
                    if let Some(resolved) = report.resolved {
                        self.total_cost = self.total_cost.saturating_add(resolved.total_cost);
                        self.total_fees = self.total_fees.saturating_add(resolved.fee);
                    }
                }
                TransferOutcome::Reverted { .. } => self.reverted += 1,
                _ => self.failed += 1,
            },
        }
        self.reports.push(line);
    }

    pub fn is_complete_success(&self) -> bool {
        self.reverted == 0 && self.failed == 0
    }
}

/// Execute a payroll with at most `concurrency` payouts in flight
///
/// Exact-amount grants from one requester overwrite each other, so anything
/// above 1 is only safe when the requester's allowance already covers the run.
pub async fn run_payroll(
    coordinator: &PayoutCoordinator,
    requester: WalletAddress,
    currency: CurrencyCode,
    entries: Vec<PayrollEntry>,
    concurrency: usize,
) -> PayrollSummary {
    let total = entries.len();
    info!(requester = %requester, entries = total, concurrency, "Payroll run started");

    let lines: Vec<PayrollLine> = stream::iter(entries)
        .map(|entry| {
            let currency = currency.clone();
            async move {
                let recipient: WalletAddress = match entry.recipient.parse() {
                    Ok(addr) => addr,
                    Err(e) => {
                        return PayrollLine::Invalid {
                            recipient: entry.recipient,
                            reason: format!("{e}"),
                        };
                    }
                };
                let requested_total = match parse_usdc(&entry.amount) {
                    Ok(amount) => amount,
                    Err(e) => {
                        return PayrollLine::Invalid {
                            recipient: entry.recipient,
                            reason: format!("amount {:?}: {e}", entry.amount),
                        };
                    }
                };
                let request = TransferRequest::new(
                    requester,
                    recipient,
                    requested_total,
                    currency,
                    entry.memo,
                );
                PayrollLine::Executed(Box::new(coordinator.execute(request).await))
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = PayrollSummary::default();
    for line in lines {
        summary.push(line);
    }

    info!(
        requester = %requester,
        confirmed = summary.confirmed,
        reverted = summary.reverted,
        failed = summary.failed,
        total_cost = summary.total_cost,
        total_fees = summary.total_fees,
        "Payroll run finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fee::FeeSchedule;
    use crate::payout::adapters::mock::{MemoryLedger, MockAuthorization, MockExecutor};
    use crate::payout::coordinator::PayoutConfig;

    const EMPLOYER: &str = "0x1111111111111111111111111111111111111111";

    fn entry(last: char, amount: &str) -> PayrollEntry {
        PayrollEntry {
            recipient: format!("0x{}", last.to_string().repeat(40)),
            amount: amount.to_string(),
            memo: "march payroll".to_string(),
        }
    }

    fn setup() -> (PayoutCoordinator, Arc<MockAuthorization>, Arc<MockExecutor>) {
        let employer: WalletAddress = EMPLOYER.parse().unwrap();
        let auth = Arc::new(MockAuthorization::new());
        auth.fund(employer, 100_000_000);
        let executor = Arc::new(MockExecutor::new());
        let coordinator = PayoutCoordinator::new(
            &PayoutConfig::default(),
            Arc::new(FeeSchedule::new(200, 50_000)),
            auth.clone(),
            executor.clone(),
            Arc::new(MemoryLedger::new()),
        );
        (coordinator, auth, executor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_payroll_mixed_results_keep_order() {
        let (coordinator, _auth, executor) = setup();
        let entries = vec![
            entry('2', "1"),
            PayrollEntry {
                recipient: "not-an-address".to_string(),
                amount: "1".to_string(),
                memo: String::new(),
            },
            entry('3', "0.01"),
            entry('4', "10.2"),
        ];

        let summary = run_payroll(
            &coordinator,
            EMPLOYER.parse().unwrap(),
            CurrencyCode::usdc(),
            entries,
            1,
        )
        .await;

        assert_eq!(summary.reports.len(), 4);
        assert_eq!(summary.confirmed, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.reverted, 0);
        assert_eq!(summary.total_cost, 11_200_000);
        assert_eq!(summary.total_fees, 250_000);
        assert!(!summary.is_complete_success());

        assert!(matches!(summary.reports[1], PayrollLine::Invalid { .. }));
        match &summary.reports[2] {
            PayrollLine::Executed(report) => assert!(!report.is_confirmed()),
            other => panic!("unexpected line {other:?}"),
        }
        assert_eq!(executor.submit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payroll_with_standing_allowance_runs_concurrently() {
        let (coordinator, auth, executor) = setup();
        auth.set_existing_allowance(EMPLOYER.parse().unwrap(), u64::MAX);

        let entries = (0..5).map(|_| entry('5', "2")).collect();
        let summary = run_payroll(
            &coordinator,
            EMPLOYER.parse().unwrap(),
            CurrencyCode::usdc(),
            entries,
            4,
        )
        .await;

        assert!(summary.is_complete_success());
        assert_eq!(summary.confirmed, 5);
        assert_eq!(auth.set_allowance_count(), 0);
        assert_eq!(executor.submit_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payroll_rejects_malformed_amounts() {
        let (coordinator, _auth, executor) = setup();
        let entries = vec![
            entry('6', "1.0000001"),
            entry('7', "-3"),
            entry('8', "1,5"),
            entry('9', "0"),
            entry('a', "1.5"),
        ];

        let summary = run_payroll(
            &coordinator,
            EMPLOYER.parse().unwrap(),
            CurrencyCode::usdc(),
            entries,
            1,
        )
        .await;

        assert_eq!(summary.failed, 4);
        assert_eq!(summary.confirmed, 1);
        for line in &summary.reports[..4] {
            match line {
                PayrollLine::Invalid { reason, .. } => assert!(reason.starts_with("amount")),
                other => panic!("unexpected line {other:?}"),
            }
        }
        // Only the well-formed line reached the gateway
        assert_eq!(executor.submit_count(), 1);
        match &summary.reports[4] {
            PayrollLine::Executed(report) => {
                assert_eq!(report.request.requested_total, 1_500_000)
            }
            other => panic!("unexpected line {other:?}"),
        }
    }

    #[test]
    fn test_entry_amount_is_decimal_string() {
        let entries: Vec<PayrollEntry> = serde_json::from_str(
            r#"[{"recipient": "0x2222222222222222222222222222222222222222", "amount": "12.75"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].amount, "12.75");
        assert_eq!(entries[0].memo, "");
        assert_eq!(parse_usdc(&entries[0].amount).unwrap(), 12_750_000);
    }
}

//! GlobePay Payout - demo runner
//!
//! Runs payouts against the simulated gateway:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐    ┌──────────┐
//! │ Request  │───▶│ Resolver │───▶│ Authorization│───▶│ Executor │───▶│  Ledger  │
//! │ (total)  │    │ (fee inv)│    │ (exact grant)│    │ (confirm)│    │ (jsonl)  │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage:
//! `globepay-payout --to 0x... --amount 1.0 [--memo text] [--env dev]`
//! `globepay-payout --payroll payroll.json [--env dev]`
//!
//! A payroll file is a JSON array of
//! `{"recipient": "0x...", "amount": "12.5", "memo": "..."}` entries.

use std::sync::Arc;

use anyhow::{Context, bail};

use globepay_payout::config::AppConfig;
use globepay_payout::ledger::FileLedgerRecorder;
use globepay_payout::money::{format_usdc, parse_usdc};
use globepay_payout::payout::adapters::mock::{MockAuthorization, MockExecutor};
use globepay_payout::payout::{
    CurrencyCode, PayoutCoordinator, PayrollEntry, PayrollLine, TransferOutcome, TransferRequest,
    WalletAddress, run_payroll,
};

/// Simulated employer wallet
const DEMO_REQUESTER: &str = "0x5afe000000000000000000000000000000000001";

/// Simulated starting balance (10,000 USDC)
const DEMO_BALANCE: u64 = 10_000_000_000;

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = globepay_payout::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git = env!("GIT_HASH"),
        fee_bps = app_config.fee_schedule.fee_bps,
        min_fee = app_config.fee_schedule.min_fee,
        "Starting GlobePay payout runner"
    );

    let requester: WalletAddress = DEMO_REQUESTER.parse()?;
    let authorization = Arc::new(MockAuthorization::new());
    authorization.fund(requester, DEMO_BALANCE);
    let executor = Arc::new(MockExecutor::new());
    let ledger = Arc::new(
        FileLedgerRecorder::open(&app_config.ledger.path)
            .with_context(|| format!("opening ledger {}", app_config.ledger.path))?,
    );

    let coordinator = PayoutCoordinator::new(
        &app_config.payout,
        Arc::new(app_config.fee_schedule),
        authorization,
        executor,
        ledger,
    );

    if let Some(path) = get_arg(&["--payroll"]) {
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("reading payroll {path}"))?;
        let entries: Vec<PayrollEntry> =
            serde_json::from_str(&content).with_context(|| format!("parsing payroll {path}"))?;

        let summary = run_payroll(
            &coordinator,
            requester,
            CurrencyCode::usdc(),
            entries,
            app_config.payroll_concurrency,
        )
        .await;

        for (i, line) in summary.reports.iter().enumerate() {
            match line {
                PayrollLine::Invalid { recipient, reason } => {
                    println!("#{i:<3} {recipient}: invalid ({reason})");
                }
                PayrollLine::Executed(report) => {
                    println!(
                        "#{i:<3} {}: {}",
                        report.request.recipient.short(),
                        describe(&report.outcome)
                    );
                }
            }
        }
        println!(
            "Payroll: {} confirmed, {} reverted, {} failed; spent {} USDC ({} in fees)",
            summary.confirmed,
            summary.reverted,
            summary.failed,
            format_usdc(summary.total_cost),
            format_usdc(summary.total_fees)
        );
        return Ok(());
    }

    let Some(to) = get_arg(&["--to"]) else {
        bail!("usage: globepay-payout --to <0x address> --amount <USDC> [--memo text]");
    };
    let Some(amount) = get_arg(&["--amount"]) else {
        bail!("missing --amount");
    };
    let recipient: WalletAddress = to.parse()?;
    let requested_total = parse_usdc(&amount)?;
    let memo = get_arg(&["--memo"]).unwrap_or_default();

    let report = coordinator
        .execute(TransferRequest::new(
            requester,
            recipient,
            requested_total,
            CurrencyCode::usdc(),
            memo,
        ))
        .await;

    println!("Payout {}", report.payout_id);
    if let Some(resolved) = report.resolved {
        println!(
            "  recipient gets {} USDC, fee {} USDC, total {} USDC",
            format_usdc(resolved.recipient_amount),
            format_usdc(resolved.fee),
            format_usdc(resolved.total_cost)
        );
    }
    println!("  {}", describe(&report.outcome));
    for warning in &report.warnings {
        println!("  warning: {warning:?}");
    }

    Ok(())
}

fn describe(outcome: &TransferOutcome) -> String {
    match outcome {
        TransferOutcome::Confirmed {
            handle,
            recipient_amount,
            ..
        } => format!("confirmed {} USDC ({handle})", format_usdc(*recipient_amount)),
        TransferOutcome::Reverted { handle, reason } => format!("reverted: {reason} ({handle})"),
        TransferOutcome::Failed { reason } => format!("failed [{}]: {reason}", reason.code()),
        TransferOutcome::Submitted { handle } => format!("pending ({handle})"),
    }
}

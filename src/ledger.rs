//! Ledger - Payout audit log
//!
//! Appends one JSON line per confirmed transfer.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::payout::adapters::LedgerRecorder;
use crate::payout::error::RecordError;
use crate::payout::types::CompletedTransfer;

/// Writes completed transfers to a JSON-lines file
pub struct FileLedgerRecorder {
    path: PathBuf,
    file: Mutex<File>,
    entry_count: AtomicU64,
}

impl FileLedgerRecorder {
    /// Open (or create) the ledger at `path`, appending to existing entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            entry_count: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written by this recorder (not counting earlier runs)
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LedgerRecorder for FileLedgerRecorder {
    async fn record(&self, transfer: &CompletedTransfer) -> Result<(), RecordError> {
        let mut line = serde_json::to_vec(transfer)?;
        line.push(b'\n');

        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| RecordError::Unavailable("ledger lock poisoned".to_string()))?;
            file.write_all(&line)?;
            file.flush()?;
        }

        self.entry_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            payout_id = %transfer.payout_id,
            handle = %transfer.handle,
            path = %self.path.display(),
            "Ledger entry written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::types::{CurrencyCode, PayoutId, SubmissionHandle};

    fn temp_ledger_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("payout_ledger_{}", ulid::Ulid::new()))
            .join("ledger.jsonl")
    }

    fn completed(amount: u64) -> CompletedTransfer {
        CompletedTransfer {
            payout_id: PayoutId::new(),
            handle: SubmissionHandle::new("0xabc123"),
            requester: "0x1111111111111111111111111111111111111111".parse().unwrap(),
            recipient: "0x2222222222222222222222222222222222222222".parse().unwrap(),
            currency: CurrencyCode::usdc(),
            memo: "salary".to_string(),
            recipient_amount: amount,
            fee: 50_000,
            total_cost: amount + 50_000,
            block_number: Some(1_234),
            confirmed_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_writes_json_lines() {
        let path = temp_ledger_path();
        let ledger = FileLedgerRecorder::open(&path).unwrap();

        ledger.record(&completed(950_000)).await.unwrap();
        ledger.record(&completed(1_000)).await.unwrap();
        assert_eq!(ledger.entry_count(), 2);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["recipient_amount"], 950_000);
        assert_eq!(lines[0]["handle"], "0xabc123");
        assert_eq!(
            lines[0]["recipient"],
            "0x2222222222222222222222222222222222222222"
        );
        assert_eq!(lines[0]["currency"], "USDC");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let path = temp_ledger_path();
        {
            let ledger = FileLedgerRecorder::open(&path).unwrap();
            ledger.record(&completed(1)).await.unwrap();
        }
        let ledger = FileLedgerRecorder::open(&path).unwrap();
        ledger.record(&completed(2)).await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(ledger.entry_count(), 1);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}

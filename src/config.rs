use serde::{Deserialize, Serialize};
use std::fs;

use crate::fee::FeeSchedule;
use crate::payout::PayoutConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub payout: PayoutConfig,
    /// Local copy of the contract's fee schedule
    #[serde(default)]
    pub fee_schedule: FeeSchedule,
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Payroll runs: payouts in flight at once
    #[serde(default = "default_payroll_concurrency")]
    pub payroll_concurrency: usize,
}

fn default_payroll_concurrency() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "./data/ledger/payouts.jsonl".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: payout.log
use_json: false
rotation: daily
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.payout, PayoutConfig::default());
        assert_eq!(config.fee_schedule, FeeSchedule::default());
        assert_eq!(config.payroll_concurrency, 1);
        assert!(config.ledger.path.ends_with("payouts.jsonl"));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = AppConfig::from_yaml_str(include_str!("../config/dev.yaml")).unwrap();
        assert_eq!(config.fee_schedule, FeeSchedule::default());
        assert_eq!(config.fee_schedule, FeeSchedule::new(200, 50_000));
        assert_eq!(config.payout, PayoutConfig::default());
    }

    #[test]
    fn test_partial_overrides() {
        let yaml = format!(
            "{MINIMAL}
payout:
  resolver:
    max_iterations: 64
  coordinator:
    confirmation_timeout_ms: 120000
fee_schedule:
  fee_bps: 200
  min_fee: 50000
"
        );
        let config = AppConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.payout.resolver.max_iterations, 64);
        assert_eq!(config.payout.resolver.max_retries_per_candidate, 3);
        assert_eq!(config.payout.coordinator.confirmation_timeout_ms, 120_000);
        assert_eq!(config.payout.coordinator.authorization_timeout_ms, 30_000);
        assert_eq!(config.fee_schedule, FeeSchedule::new(200, 50_000));
    }

    #[test]
    fn test_missing_required_field() {
        let result = AppConfig::from_yaml_str("log_level: info\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::load("does-not-exist");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

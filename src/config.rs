use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

use crate::chain::ChainFamily;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    pub chains: Vec<ChainEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub use_json: bool,
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file: "chainsettle.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Seconds between deposit scan passes.
    pub deposit_interval_secs: u64,
    /// Seconds between withdrawal tracking passes.
    pub withdrawal_interval_secs: u64,
    /// Concurrent items per chain family within one pass.
    pub concurrency: usize,
    /// How long an unfound withdrawal hash stays pending before it fails.
    pub unresolved_grace_secs: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            deposit_interval_secs: 60,
            withdrawal_interval_secs: 60,
            concurrency: 4,
            unresolved_grace_secs: crate::settlement::withdrawal::DEFAULT_GRACE_SECS,
        }
    }
}

/// One settleable chain asset: the family adapter that serves it, the
/// endpoints to rotate through, and optionally a confirmation-threshold
/// override and a token filter for token variants.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainEntry {
    pub symbol: String,
    pub family: ChainFamily,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub required_confirmations: Option<u32>,
    #[serde(default)]
    pub token: Option<String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_deserializes() {
        let yaml = r#"
log:
  level: "debug"
  dir: "logs"
  file: "settle.log"
  use_json: true
  rotation: "hourly"
database:
  url: "postgres://localhost/settle"
settlement:
  deposit_interval_secs: 120
  withdrawal_interval_secs: 90
  concurrency: 8
  unresolved_grace_secs: 3600
chains:
  - symbol: "BTC"
    family: utxo
    endpoints:
      - "https://blockstream.info/api"
      - "https://mempool.space/api"
  - symbol: "USDT-TRC20"
    family: tron
    endpoints:
      - "https://api.trongrid.io"
    token: "USDT"
    required_confirmations: 20
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log.level, "debug");
        assert!(config.log.use_json);
        assert_eq!(config.settlement.deposit_interval_secs, 120);
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[0].family, ChainFamily::Utxo);
        assert_eq!(config.chains[0].endpoints.len(), 2);
        assert_eq!(config.chains[0].token, None);
        assert_eq!(config.chains[1].token.as_deref(), Some("USDT"));
        assert_eq!(config.chains[1].required_confirmations, Some(20));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let yaml = r#"
database:
  url: "postgres://localhost/settle"
chains: []
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.rotation, "daily");
        assert_eq!(config.settlement.concurrency, 4);
        assert_eq!(config.settlement.unresolved_grace_secs, 3600);
        assert!(config.chains.is_empty());
    }
}

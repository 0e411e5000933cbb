//! Configuration loading
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. optional TOML file (`paper_ledger.toml`)
//! 3. environment variables prefixed `PAPER__`, e.g. `PAPER__ACCOUNT__INITIAL_CASH=50000`

use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub exits: ExitConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(path)).required(false))
            .add_source(config::Environment::with_prefix("PAPER").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.initial_cash <= Decimal::ZERO {
            return Err(EngineError::Config(config::ConfigError::Message(format!(
                "account.initial_cash must be > 0, got {}",
                self.account.initial_cash
            ))));
        }
        if self.account.snapshot_limit == 0 {
            return Err(EngineError::Config(config::ConfigError::Message(
                "account.snapshot_limit must be > 0".to_string(),
            )));
        }
        if self.storage.key.trim().is_empty() {
            return Err(EngineError::Config(config::ConfigError::Message(
                "storage.key must not be empty".to_string(),
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Starting cash and baseline for total return
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Number of portfolio snapshots retained
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

fn default_initial_cash() -> Decimal {
    dec!(25000)
}

fn default_snapshot_limit() -> usize {
    365
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One state file at `path`
    File,
    /// `path` is a directory holding one `<key>.json` per storage key
    Directory,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// State file, or directory for the directory backend (`~` is expanded)
    #[serde(default = "default_state_path")]
    pub path: String,
    /// Key the whole ledger is stored under
    #[serde(default = "default_state_key")]
    pub key: String,
    /// JSONL audit trail, disabled when unset
    #[serde(default)]
    pub audit_file: Option<String>,
}

fn default_backend() -> StorageBackend {
    StorageBackend::File
}

fn default_state_path() -> String {
    "paper_ledger_state.json".to_string()
}

fn default_state_key() -> String {
    "paper_trading_state".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_state_path(),
            key: default_state_key(),
            audit_file: None,
        }
    }
}

impl StorageConfig {
    pub fn state_path(&self) -> PathBuf {
        expand_path(&self.path)
    }

    pub fn audit_path(&self) -> Option<PathBuf> {
        self.audit_file.as_deref().map(expand_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Close positions whose stop-loss / take-profit level was crossed
    #[serde(default = "default_true")]
    pub auto_close: bool,
    /// Seconds between price refreshes in `watch`
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    60
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            auto_close: default_true(),
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

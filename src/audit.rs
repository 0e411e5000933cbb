//! JSONL audit trail of ledger mutations

use crate::error::Result;
use crate::types::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Trade,
    Close,
    Reset,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub symbol: Option<String>,
    pub side: Option<Side>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub reason: String,
    pub cash_before: Decimal,
    pub cash_after: Decimal,
}

/// Append-only JSONL file
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let line = serde_json::to_string(entry)?;
        file.write_all(format!("{}\n", line).as_bytes())?;

        tracing::debug!("Logged audit entry: {:?} {:?}", entry.action, entry.symbol);
        Ok(())
    }

    /// Append, logging instead of failing. A broken audit file never blocks a trade.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::warn!("Failed to write audit entry to {}: {}", self.path.display(), e);
        }
    }

    pub fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Ok(serde_json::from_str::<AuditEntry>(l)?))
            .collect()
    }
}

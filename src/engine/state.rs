//! Persisted ledger record and its load path

use crate::error::{EngineError, Result};
use crate::store::LedgerStore;
use crate::types::{PortfolioSnapshot, Position, Trade};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Everything the engine writes to the Ledger Store, as one blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    pub cash: Decimal,
    pub positions: Vec<Position>,
    /// Most recent first
    pub trade_history: VecDeque<Trade>,
    /// Creation order, oldest first
    pub portfolio_history: VecDeque<PortfolioSnapshot>,
}

impl LedgerState {
    /// Starting cash, nothing held, one snapshot of the starting state
    pub fn fresh(initial_cash: Decimal) -> Self {
        let mut portfolio_history = VecDeque::new();
        portfolio_history.push_back(PortfolioSnapshot {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_value: initial_cash,
            cash: initial_cash,
            positions_value: Decimal::ZERO,
        });
        Self {
            cash: initial_cash,
            positions: Vec::new(),
            trade_history: VecDeque::new(),
            portfolio_history,
        }
    }

    /// Reject records that parse but break ledger invariants
    pub fn validate(&self) -> Result<()> {
        if self.cash < Decimal::ZERO {
            return Err(EngineError::Storage(format!(
                "stored cash is negative: {}",
                self.cash
            )));
        }

        let mut seen = HashSet::new();
        for pos in &self.positions {
            if pos.symbol.trim().is_empty() {
                return Err(EngineError::Storage("stored position has empty symbol".into()));
            }
            if pos.quantity <= Decimal::ZERO || pos.average_price <= Decimal::ZERO {
                return Err(EngineError::Storage(format!(
                    "stored position {} has non-positive quantity or price",
                    pos.id
                )));
            }
            if !seen.insert((pos.symbol.clone(), pos.side)) {
                return Err(EngineError::Storage(format!(
                    "duplicate stored position for {} {}",
                    pos.symbol, pos.side
                )));
            }
        }
        Ok(())
    }

    /// Drop the oldest snapshots beyond `limit`
    pub fn trim_history(&mut self, limit: usize) {
        while self.portfolio_history.len() > limit {
            self.portfolio_history.pop_front();
        }
    }
}

/// Read and decode the ledger blob. `Ok(None)` when nothing was ever saved.
pub fn load(store: &dyn LedgerStore, key: &str) -> Result<Option<LedgerState>> {
    let Some(bytes) = store.get(key)? else {
        return Ok(None);
    };
    let state: LedgerState = serde_json::from_slice(&bytes)?;
    state.validate()?;
    Ok(Some(state))
}

//! Trading Engine
//!
//! Owns the simulated account: cash, open positions, trade history and
//! net-worth snapshots. Every mutation is applied in memory first and then
//! mirrored to the Ledger Store as one blob.
//!
//! Callers must serialize mutating calls on one engine; see [`SharedEngine`]
//! for hosts that need to share it between tasks.

mod exits;
mod shared;
mod state;
mod valuation;

#[cfg(test)]
mod tests;

pub use exits::{protective_levels, ExitReason, ExitTrigger};
pub use shared::SharedEngine;
pub use state::{load, LedgerState};
pub use valuation::{percent_of, positions_value, total_unrealized_pnl, PortfolioSummary};

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::config::{AccountConfig, Config};
use crate::error::{EngineError, Result};
use crate::store::{self, LedgerStore};
use crate::types::{
    normalize_symbol, PortfolioSnapshot, Position, PriceMap, Side, Trade, TradeRequest,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use uuid::Uuid;

/// Outcome of closing a position
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    /// The closing trade, recorded on the opposite side
    pub trade: Trade,
    pub position: Position,
    pub proceeds: Decimal,
    pub realized_pnl: Decimal,
}

pub struct TradingEngine {
    state: LedgerState,
    initial_cash: Decimal,
    snapshot_limit: usize,
    store: Box<dyn LedgerStore>,
    storage_key: String,
    audit: Option<AuditLog>,
}

impl TradingEngine {
    /// Load the saved ledger from `store`, or start fresh when there is none
    /// or it cannot be read. Never fails.
    ///
    /// Only a missing blob is written back right away. An unreadable one is
    /// left in place until the next mutation replaces it.
    pub fn open(
        store: Box<dyn LedgerStore>,
        account: &AccountConfig,
        storage_key: impl Into<String>,
    ) -> Self {
        let storage_key = storage_key.into();
        let initial_cash = account.initial_cash;
        let snapshot_limit = account.snapshot_limit.max(1);

        let (state, write_fresh) = match load(store.as_ref(), &storage_key) {
            Ok(Some(mut state)) => {
                state.trim_history(snapshot_limit);
                tracing::info!(
                    "Loaded ledger: cash {}, {} positions, {} trades, {} snapshots",
                    state.cash,
                    state.positions.len(),
                    state.trade_history.len(),
                    state.portfolio_history.len()
                );
                (state, false)
            }
            Ok(None) => {
                tracing::info!(
                    "No saved ledger under '{}', starting with {}",
                    storage_key,
                    initial_cash
                );
                (LedgerState::fresh(initial_cash), true)
            }
            Err(e) => {
                tracing::warn!(
                    "Saved ledger unreadable ({}), starting fresh with {} without overwriting it",
                    e,
                    initial_cash
                );
                (LedgerState::fresh(initial_cash), false)
            }
        };

        let mut engine = Self {
            state,
            initial_cash,
            snapshot_limit,
            store,
            storage_key,
            audit: None,
        };
        if write_fresh {
            engine.persist();
        }
        engine
    }

    /// Open with the store and audit trail named in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = store::open(&config.storage)?;
        let engine = Self::open(store, &config.account, config.storage.key.clone());
        Ok(match config.storage.audit_path() {
            Some(path) => engine.with_audit(AuditLog::new(path)),
            None => engine,
        })
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Write the whole ledger under the storage key, replacing what was there
    pub fn save(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.state)?;
        self.store.put(&self.storage_key, &bytes)
    }

    /// Best-effort save. In-memory state stays authoritative on failure.
    fn persist(&mut self) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to persist ledger under '{}': {}", self.storage_key, e);
        }
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(log) = &self.audit {
            log.record(entry);
        }
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Fill a trade immediately at `request.price`.
    ///
    /// Buys into an existing (symbol, side) position merge at the
    /// volume-weighted average price; the position keeps its id and open time.
    /// Nothing changes when the request is invalid or cash is short.
    pub fn execute_trade(&mut self, request: TradeRequest) -> Result<Trade> {
        let symbol = normalize_symbol(&request.symbol)?;
        if request.quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(request.quantity));
        }
        if request.price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(request.price));
        }
        for level in [request.stop_loss, request.take_profit].into_iter().flatten() {
            if level <= Decimal::ZERO {
                return Err(EngineError::InvalidPrice(level));
            }
        }

        // A cost too large to represent can never be covered
        let total_cost = request.total_cost().ok_or(EngineError::InsufficientFunds {
            required: Decimal::MAX,
            available: self.state.cash,
        })?;
        if total_cost > self.state.cash {
            return Err(EngineError::InsufficientFunds {
                required: total_cost,
                available: self.state.cash,
            });
        }

        let existing = self
            .state
            .positions
            .iter()
            .position(|p| p.symbol == symbol && p.side == request.side);
        let merged = match existing {
            Some(index) => Some(averaged(&self.state.positions[index], &request)?),
            None => None,
        };

        let now = Utc::now();
        let cash_before = self.state.cash;
        self.state.cash -= total_cost;

        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            executed_at: now,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            notes: request.notes,
            realized_pnl: None,
        };
        self.state.trade_history.push_front(trade.clone());

        match existing.zip(merged) {
            Some((index, (quantity, average_price))) => {
                let existing = &mut self.state.positions[index];
                existing.quantity = quantity;
                existing.average_price = average_price;
                tracing::debug!(
                    "Averaged {} {}: qty {} @ {}",
                    existing.side,
                    existing.symbol,
                    existing.quantity,
                    existing.average_price
                );
            }
            None => {
                self.state.positions.push(Position {
                    id: Uuid::new_v4(),
                    symbol: symbol.clone(),
                    quantity: request.quantity,
                    average_price: request.price,
                    side: request.side,
                    opened_at: now,
                });
            }
        }

        tracing::info!(
            "{} {} {} @ {} (cost {}, cash {})",
            trade.side,
            trade.quantity,
            trade.symbol,
            trade.price,
            total_cost,
            self.state.cash
        );

        self.persist();
        self.audit(AuditEntry {
            timestamp: now,
            action: AuditAction::Trade,
            symbol: Some(trade.symbol.clone()),
            side: Some(trade.side),
            quantity: Some(trade.quantity),
            price: Some(trade.price),
            pnl: None,
            reason: trade.notes.clone(),
            cash_before,
            cash_after: self.state.cash,
        });

        Ok(trade)
    }

    /// Close the full position at `current_price` and credit the proceeds.
    ///
    /// An id that is not currently held fails with `PositionNotFound` and
    /// changes nothing.
    pub fn close_position(
        &mut self,
        position_id: Uuid,
        current_price: Decimal,
    ) -> Result<ClosedPosition> {
        self.close_with_note(position_id, current_price, String::new())
    }

    pub(crate) fn close_with_note(
        &mut self,
        position_id: Uuid,
        current_price: Decimal,
        note: String,
    ) -> Result<ClosedPosition> {
        if current_price <= Decimal::ZERO {
            return Err(EngineError::InvalidPrice(current_price));
        }
        let index = self
            .state
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or(EngineError::PositionNotFound(position_id))?;

        let held = &self.state.positions[index];
        let overflow = || {
            EngineError::InvalidInput(format!(
                "closing {} {} at {} overflows the ledger",
                held.side, held.symbol, current_price
            ))
        };
        let proceeds = held.checked_market_value(current_price).ok_or_else(overflow)?;
        let realized_pnl = held.checked_unrealized_pnl(current_price).ok_or_else(overflow)?;
        let cash_after = self.state.cash.checked_add(proceeds).ok_or_else(overflow)?;

        let position = self.state.positions.remove(index);
        let cash_before = self.state.cash;
        self.state.cash = cash_after;

        let notes = if note.is_empty() {
            format!("Close {} {}", position.side, position.symbol)
        } else {
            note
        };

        let trade = Trade {
            id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            quantity: position.quantity,
            price: current_price,
            executed_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            notes,
            realized_pnl: Some(realized_pnl),
        };
        self.state.trade_history.push_front(trade.clone());

        tracing::info!(
            "Closed {} {} x{} @ {} (P&L {}, cash {})",
            position.side,
            position.symbol,
            position.quantity,
            current_price,
            realized_pnl,
            self.state.cash
        );

        self.persist();
        self.audit(AuditEntry {
            timestamp: trade.executed_at,
            action: AuditAction::Close,
            symbol: Some(trade.symbol.clone()),
            side: Some(trade.side),
            quantity: Some(trade.quantity),
            price: Some(trade.price),
            pnl: Some(realized_pnl),
            reason: trade.notes.clone(),
            cash_before,
            cash_after: self.state.cash,
        });

        Ok(ClosedPosition {
            trade,
            position,
            proceeds,
            realized_pnl,
        })
    }

    /// Append a valuation snapshot, dropping the oldest beyond the cap.
    /// No throttling: every call appends.
    pub fn update_portfolio_snapshot(&mut self, prices: &PriceMap) -> PortfolioSnapshot {
        let positions_value = self.positions_value(prices);
        let snapshot = PortfolioSnapshot {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_value: self.state.cash.saturating_add(positions_value),
            cash: self.state.cash,
            positions_value,
        };
        self.state.portfolio_history.push_back(snapshot.clone());
        self.state.trim_history(self.snapshot_limit);
        tracing::debug!("Snapshot: total {} (cash {})", snapshot.total_value, snapshot.cash);

        self.persist();
        snapshot
    }

    /// Back to starting cash with no positions, trades or history except one
    /// fresh snapshot. Irreversible.
    pub fn reset_portfolio(&mut self) {
        let cash_before = self.state.cash;
        self.state = LedgerState::fresh(self.initial_cash);
        tracing::warn!("Portfolio reset to {}", self.initial_cash);

        self.persist();
        self.audit(AuditEntry {
            timestamp: Utc::now(),
            action: AuditAction::Reset,
            symbol: None,
            side: None,
            quantity: None,
            price: None,
            pnl: None,
            reason: "reset".to_string(),
            cash_before,
            cash_after: self.state.cash,
        });
    }

    // ---------------------------------------------------------------------
    // Valuation
    // ---------------------------------------------------------------------

    pub fn positions_value(&self, prices: &PriceMap) -> Decimal {
        positions_value(&self.state.positions, prices)
    }

    /// Cash plus every position marked at `prices` (entry price when missing)
    pub fn total_portfolio_value(&self, prices: &PriceMap) -> Decimal {
        self.state.cash.saturating_add(self.positions_value(prices))
    }

    pub fn unrealized_pl(&self, position: &Position, current_price: Decimal) -> Decimal {
        position.unrealized_pnl(current_price)
    }

    pub fn unrealized_pl_percent(&self, position: &Position, current_price: Decimal) -> Decimal {
        position.unrealized_pnl_pct(current_price)
    }

    pub fn total_unrealized_pl(&self, prices: &PriceMap) -> Decimal {
        total_unrealized_pnl(&self.state.positions, prices)
    }

    pub fn total_return(&self, prices: &PriceMap) -> Decimal {
        self.total_portfolio_value(prices).saturating_sub(self.initial_cash)
    }

    pub fn total_return_percent(&self, prices: &PriceMap) -> Decimal {
        percent_of(self.total_return(prices), self.initial_cash)
    }

    pub fn summary(&self, prices: &PriceMap) -> PortfolioSummary {
        PortfolioSummary::compute(
            self.initial_cash,
            self.state.cash,
            &self.state.positions,
            self.state.trade_history.iter(),
            prices,
        )
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn cash(&self) -> Decimal {
        self.state.cash
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn snapshot_limit(&self) -> usize {
        self.snapshot_limit
    }

    pub fn positions(&self) -> &[Position] {
        &self.state.positions
    }

    pub fn position(&self, id: Uuid) -> Option<&Position> {
        self.state.positions.iter().find(|p| p.id == id)
    }

    pub fn find_position(&self, symbol: &str, side: Side) -> Option<&Position> {
        let symbol = normalize_symbol(symbol).ok()?;
        self.state
            .positions
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
    }

    /// Most recent first
    pub fn trade_history(&self) -> &VecDeque<Trade> {
        &self.state.trade_history
    }

    /// Oldest first
    pub fn portfolio_history(&self) -> &VecDeque<PortfolioSnapshot> {
        &self.state.portfolio_history
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }
}

/// Quantity and volume-weighted average price after adding `request` to `position`
fn averaged(position: &Position, request: &TradeRequest) -> Result<(Decimal, Decimal)> {
    let overflow = || {
        EngineError::InvalidInput(format!(
            "adding {} to {} {} overflows the position",
            request.quantity, position.side, position.symbol
        ))
    };
    let quantity = position.quantity.checked_add(request.quantity).ok_or_else(overflow)?;
    let added_cost = request.total_cost().ok_or_else(overflow)?;
    let cost = position
        .average_price
        .checked_mul(position.quantity)
        .and_then(|held| held.checked_add(added_cost))
        .ok_or_else(overflow)?;
    let average_price = cost.checked_div(quantity).ok_or_else(overflow)?;
    Ok((quantity, average_price))
}

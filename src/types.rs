//! Core ledger records: positions, trades and portfolio snapshots

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Last known price per uppercase symbol, as supplied by the caller's price feed
pub type PriceMap = HashMap<String, Decimal>;

/// Direction of exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The side a closing trade is recorded with
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Trim and uppercase a ticker symbol
pub fn normalize_symbol(symbol: &str) -> Result<String> {
    let normalized = symbol.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(EngineError::EmptySymbol);
    }
    Ok(normalized)
}

/// An open holding in one symbol and direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    /// Volume-weighted average entry price
    pub average_price: Decimal,
    pub side: Side,
    /// Time of the trade that first opened this position
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn cost_basis(&self) -> Decimal {
        self.average_price.saturating_mul(self.quantity)
    }

    /// Mark-to-market value at `price`, saturating at `Decimal::MAX`
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity.saturating_mul(price)
    }

    /// Positive means profit on either side. Saturates instead of overflowing.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        let per_unit = match self.side {
            Side::Long => price.saturating_sub(self.average_price),
            Side::Short => self.average_price.saturating_sub(price),
        };
        per_unit.saturating_mul(self.quantity)
    }

    /// Exact market value, `None` on overflow
    pub fn checked_market_value(&self, price: Decimal) -> Option<Decimal> {
        self.quantity.checked_mul(price)
    }

    /// Exact unrealized P&L, `None` on overflow
    pub fn checked_unrealized_pnl(&self, price: Decimal) -> Option<Decimal> {
        let per_unit = match self.side {
            Side::Long => price.checked_sub(self.average_price),
            Side::Short => self.average_price.checked_sub(price),
        }?;
        per_unit.checked_mul(self.quantity)
    }

    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        let basis = self.cost_basis();
        if basis.is_zero() {
            return Decimal::ZERO;
        }
        let pnl = self.unrealized_pnl(price);
        match pnl.checked_div(basis) {
            Some(ratio) => ratio.saturating_mul(Decimal::ONE_HUNDRED),
            None if pnl.is_sign_negative() => Decimal::MIN,
            None => Decimal::MAX,
        }
    }

    /// Live price from `prices`, falling back to the entry price when absent
    pub fn price_or_entry(&self, prices: &PriceMap) -> Decimal {
        prices
            .get(&self.symbol)
            .copied()
            .unwrap_or(self.average_price)
    }
}

/// Immutable record of an executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub notes: String,
    /// Only set on trades that closed a position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
}

impl Trade {
    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.price)
    }

    pub fn is_closing(&self) -> bool {
        self.realized_pnl.is_some()
    }
}

/// Point-in-time valuation of the whole account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub positions_value: Decimal,
}

/// Parameters for opening or adding to a position
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub notes: String,
}

impl TradeRequest {
    pub fn new(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            stop_loss: None,
            take_profit: None,
            notes: String::new(),
        }
    }

    pub fn with_stop_loss(mut self, level: Decimal) -> Self {
        self.stop_loss = Some(level);
        self
    }

    pub fn with_take_profit(mut self, level: Decimal) -> Self {
        self.take_profit = Some(level);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// `quantity × price`, `None` when it does not fit in a `Decimal`
    pub fn total_cost(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.price)
    }
}

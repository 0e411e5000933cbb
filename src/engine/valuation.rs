//! Mark-to-market valuation over open positions
//!
//! All functions are pure. A symbol missing from the price map is valued at
//! the position's own average price rather than treated as an error. Sums
//! saturate at the `Decimal` bounds so no price can make valuation fail.

use crate::types::{Position, PriceMap, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Σ quantity × live price (entry price when stale)
pub fn positions_value(positions: &[Position], prices: &PriceMap) -> Decimal {
    positions
        .iter()
        .map(|p| p.market_value(p.price_or_entry(prices)))
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

pub fn total_unrealized_pnl(positions: &[Position], prices: &PriceMap) -> Decimal {
    positions
        .iter()
        .map(|p| p.unrealized_pnl(p.price_or_entry(prices)))
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

/// Realized P&L summed over closing trades
pub fn realized_pnl<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Decimal {
    trades
        .into_iter()
        .filter_map(|t| t.realized_pnl)
        .fold(Decimal::ZERO, Decimal::saturating_add)
}

pub fn percent_of(value: Decimal, base: Decimal) -> Decimal {
    if base.is_zero() {
        return Decimal::ZERO;
    }
    match value.checked_div(base) {
        Some(ratio) => ratio.saturating_mul(Decimal::ONE_HUNDRED),
        None if value.is_sign_negative() != base.is_sign_negative() => Decimal::MIN,
        None => Decimal::MAX,
    }
}

/// Paper trading portfolio summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Starting balance
    pub initial_cash: Decimal,
    /// Current cash balance
    pub cash: Decimal,
    /// Total value of open positions (at current prices)
    pub positions_value: Decimal,
    /// Total portfolio value (cash + positions)
    pub total_value: Decimal,
    /// Realized P&L from closed positions
    pub realized_pnl: Decimal,
    /// Unrealized P&L of open positions
    pub unrealized_pnl: Decimal,
    /// Realized + unrealized
    pub total_pnl: Decimal,
    /// Total value against starting balance, in percent
    pub total_return_pct: Decimal,
    /// Number of trades recorded, opening and closing
    pub trade_count: usize,
    pub closed_trades: usize,
    /// Share of closing trades with positive P&L (0-1)
    pub win_rate: Decimal,
    pub open_positions: usize,
    pub updated_at: DateTime<Utc>,
}

impl PortfolioSummary {
    pub fn compute<'a>(
        initial_cash: Decimal,
        cash: Decimal,
        positions: &[Position],
        trades: impl IntoIterator<Item = &'a Trade> + Clone,
        prices: &PriceMap,
    ) -> Self {
        let positions_value = positions_value(positions, prices);
        let total_value = cash.saturating_add(positions_value);
        let unrealized_pnl = total_unrealized_pnl(positions, prices);
        let realized_pnl = realized_pnl(trades.clone());

        let mut trade_count = 0;
        let mut closed_trades = 0;
        let mut winners = 0;
        for trade in trades {
            trade_count += 1;
            if let Some(pnl) = trade.realized_pnl {
                closed_trades += 1;
                if pnl > Decimal::ZERO {
                    winners += 1;
                }
            }
        }

        let win_rate = if closed_trades > 0 {
            Decimal::from(winners) / Decimal::from(closed_trades)
        } else {
            Decimal::ZERO
        };

        Self {
            initial_cash,
            cash,
            positions_value,
            total_value,
            realized_pnl,
            unrealized_pnl,
            total_pnl: realized_pnl.saturating_add(unrealized_pnl),
            total_return_pct: percent_of(total_value.saturating_sub(initial_cash), initial_cash),
            trade_count,
            closed_trades,
            win_rate,
            open_positions: positions.len(),
            updated_at: Utc::now(),
        }
    }
}

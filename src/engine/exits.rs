//! Stop-loss / take-profit auto-closing
//!
//! Protective levels live on the trades that opened or added to a position.
//! The newest level of each kind recorded since the position opened wins.

use super::{ClosedPosition, TradingEngine};
use crate::types::{Position, PriceMap, Side, Trade};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// A position whose live price crossed one of its levels
#[derive(Debug, Clone, PartialEq)]
pub struct ExitTrigger {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub reason: ExitReason,
    pub level: Decimal,
    pub price: Decimal,
}

/// Stop-loss and take-profit in force for `position`
pub fn protective_levels<'a>(
    position: &Position,
    trades: impl IntoIterator<Item = &'a Trade>,
) -> (Option<Decimal>, Option<Decimal>) {
    let mut stop = None;
    let mut take = None;

    // Newest first, so the first level seen is the one in force
    for trade in trades {
        if trade.is_closing()
            || trade.symbol != position.symbol
            || trade.side != position.side
            || trade.executed_at < position.opened_at
        {
            continue;
        }
        if stop.is_none() {
            stop = trade.stop_loss;
        }
        if take.is_none() {
            take = trade.take_profit;
        }
        if stop.is_some() && take.is_some() {
            break;
        }
    }
    (stop, take)
}

fn check(
    position: &Position,
    price: Decimal,
    stop: Option<Decimal>,
    take: Option<Decimal>,
) -> Option<(ExitReason, Decimal)> {
    let (stop_hit, take_hit) = match position.side {
        Side::Long => (stop.filter(|s| price <= *s), take.filter(|t| price >= *t)),
        Side::Short => (stop.filter(|s| price >= *s), take.filter(|t| price <= *t)),
    };

    // A gap through both levels is reported as the stop
    if let Some(level) = stop_hit {
        return Some((ExitReason::StopLoss, level));
    }
    take_hit.map(|level| (ExitReason::TakeProfit, level))
}

impl TradingEngine {
    /// Positions to close at `prices`. Positions without a live price are skipped.
    pub fn exit_triggers(&self, prices: &PriceMap) -> Vec<ExitTrigger> {
        let mut triggers = Vec::new();
        for position in self.positions() {
            let Some(price) = prices.get(&position.symbol).copied() else {
                continue;
            };
            let (stop, take) = protective_levels(position, self.trade_history());
            if let Some((reason, level)) = check(position, price, stop, take) {
                triggers.push(ExitTrigger {
                    position_id: position.id,
                    symbol: position.symbol.clone(),
                    side: position.side,
                    reason,
                    level,
                    price,
                });
            }
        }
        triggers
    }

    /// Close every triggered position at its live price
    pub fn apply_exit_triggers(&mut self, prices: &PriceMap) -> Vec<(ExitTrigger, ClosedPosition)> {
        let mut closed = Vec::new();
        for trigger in self.exit_triggers(prices) {
            let note = format!("{} at {} (level {})", trigger.reason, trigger.price, trigger.level);
            match self.close_with_note(trigger.position_id, trigger.price, note) {
                Ok(result) => {
                    match trigger.reason {
                        ExitReason::TakeProfit => tracing::info!(
                            "🎯 Take profit on {} {}: {} >= {}",
                            trigger.side,
                            trigger.symbol,
                            trigger.price,
                            trigger.level
                        ),
                        ExitReason::StopLoss => tracing::warn!(
                            "🛑 Stop loss on {} {}: {} vs {}",
                            trigger.side,
                            trigger.symbol,
                            trigger.price,
                            trigger.level
                        ),
                    }
                    closed.push((trigger, result));
                }
                Err(e) => tracing::warn!("Auto-close of {} failed: {}", trigger.position_id, e),
            }
        }
        closed
    }
}

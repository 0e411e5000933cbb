//! Price Feed adapters
//!
//! The engine never fetches prices. Callers pull a [`PriceMap`] from a feed
//! and pass it into valuation and snapshot calls.

use crate::error::{EngineError, Result};
use crate::types::{normalize_symbol, PriceMap};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Source of last-known prices
pub trait PriceFeed: Send + Sync {
    fn prices(&self) -> Result<PriceMap>;

    /// Feed name for logging
    fn name(&self) -> &str;
}

/// Fixed prices, e.g. from command-line arguments
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: PriceMap,
}

impl StaticPrices {
    pub fn new(prices: PriceMap) -> Self {
        Self { prices }
    }
}

impl PriceFeed for StaticPrices {
    fn prices(&self) -> Result<PriceMap> {
        Ok(self.prices.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Reads a `{"AAPL": "190.5", "TSLA": 212}` JSON object on every call
#[derive(Debug, Clone)]
pub struct JsonFilePrices {
    path: PathBuf,
}

impl JsonFilePrices {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PriceFeed for JsonFilePrices {
    fn prices(&self) -> Result<PriceMap> {
        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: HashMap<String, Decimal> = serde_json::from_str(&raw)?;

        let mut prices = PriceMap::with_capacity(parsed.len());
        for (symbol, price) in parsed {
            if price <= Decimal::ZERO {
                tracing::warn!("Ignoring non-positive price {} for {}", price, symbol);
                continue;
            }
            match normalize_symbol(&symbol) {
                Ok(sym) => {
                    prices.insert(sym, price);
                }
                Err(_) => tracing::warn!("Ignoring price with empty symbol"),
            }
        }
        Ok(prices)
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

/// Parse a `SYMBOL=PRICE` pair
pub fn parse_price_arg(arg: &str) -> Result<(String, Decimal)> {
    let (symbol, price) = arg
        .split_once('=')
        .ok_or_else(|| EngineError::InvalidInput(format!("expected SYMBOL=PRICE, got '{}'", arg)))?;
    let symbol = normalize_symbol(symbol)?;
    let price = Decimal::from_str(price.trim())
        .map_err(|e| EngineError::InvalidInput(format!("bad price in '{}': {}", arg, e)))?;
    if price <= Decimal::ZERO {
        return Err(EngineError::InvalidPrice(price));
    }
    Ok((symbol, price))
}

/// Collect repeated `--price SYM=PX` arguments into a map
pub fn price_map_from_args(args: &[String]) -> Result<PriceMap> {
    args.iter().map(|a| parse_price_arg(a)).collect()
}

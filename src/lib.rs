//! Paper Ledger
//!
//! A paper-trading engine: a simulated cash account that opens long and
//! short positions at caller-supplied prices, tracks trades and net-worth
//! snapshots, and persists everything as one blob so a session survives
//! restarts.
//!
//! ## Architecture
//!
//! ```text
//! CLI / host ──► SharedEngine ──► TradingEngine ──► LedgerStore (file | memory)
//!                                   │      ▲
//!                                   │      └── PriceFeed (static | JSON file)
//!                                   └──► AuditLog (JSONL)
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod store;
pub mod types;

pub use engine::{SharedEngine, TradingEngine};
pub use error::{EngineError, Result};

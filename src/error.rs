//! Error types for the paper trading ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Invalid quantity: {0} (must be > 0)")]
    InvalidQuantity(Decimal),

    #[error("Invalid price: {0} (must be > 0)")]
    InvalidPrice(Decimal),

    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Position not found: {0}")]
    PositionNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Errors the caller can fix by changing the request
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientFunds { .. }
                | EngineError::InvalidQuantity(_)
                | EngineError::InvalidPrice(_)
                | EngineError::EmptySymbol
                | EngineError::InvalidInput(_)
                | EngineError::PositionNotFound(_)
        )
    }
}

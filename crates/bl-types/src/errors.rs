use rust_decimal::Decimal;
use thiserror::Error;

use crate::orders::OrderStatus;

/// Main error type for the barline system
#[derive(Error, Debug)]
pub enum BlError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] BacktestError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Order-related errors
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Order quantity must be positive, got {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("Order price must be positive, got {price}")]
    InvalidPrice { price: Decimal },

    #[error("Order {order_id} is terminal ({status}), operation rejected")]
    Terminal { order_id: String, status: OrderStatus },

    #[error("Fill of {requested} exceeds remaining quantity {remaining} on order {order_id}")]
    Overfill {
        order_id: String,
        requested: i64,
        remaining: i64,
    },

    #[error("Order {order_id} cannot be cancelled from status {status}")]
    NotCancellable { order_id: String, status: OrderStatus },

    #[error("Order rejected: {reason}")]
    Rejected { reason: String },
}

/// Account-related errors
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Initial capital must be positive, got {capital}")]
    InvalidCapital { capital: Decimal },

    #[error("Cannot freeze {requested}: available cash is {available}")]
    FreezeFailed {
        requested: Decimal,
        available: Decimal,
    },

    #[error("No position for symbol: {symbol}")]
    PositionNotFound { symbol: String },

    #[error("Trade already closed: {trade_id}")]
    TradeAlreadyClosed { trade_id: String },

    #[error("Fill symbol {fill_symbol} does not match trade symbol {trade_symbol}")]
    TradeSymbolMismatch {
        fill_symbol: String,
        trade_symbol: String,
    },
}

/// Data-access errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("Current time cursor is not set")]
    CursorUnset,

    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("Data source error: {message}")]
    SourceError { message: String },
}

/// Backtest-setup errors
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid date range: start {start} is not before end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("No symbols in universe")]
    NoSymbols,

    #[error("No strategies registered")]
    NoStrategies,

    #[error("Backtest already running")]
    AlreadyRunning,

    #[error("Backtest already completed; build a new engine to run again")]
    AlreadyCompleted,
}

/// Result type alias for barline operations
pub type BlResult<T> = Result<T, BlError>;

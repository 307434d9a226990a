use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{BlError, BlResult};

/// Directional intent of a trading signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalDirection {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Sell => "SELL",
            SignalDirection::Hold => "HOLD",
        };
        write!(f, "{}", s)
    }
}

/// A strategy's directional intent with strength.
///
/// The `reason` is free text kept verbose enough for manual review of a
/// backtest afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub direction: SignalDirection,
    pub strength: f64,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub reason: String,
}

impl Signal {
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        direction: SignalDirection,
        strength: f64,
        timestamp: DateTime<Utc>,
        price: Decimal,
        reason: impl Into<String>,
    ) -> BlResult<Self> {
        let signal = Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            direction,
            strength,
            timestamp,
            price,
            reason: reason.into(),
        };
        if !signal.is_valid() {
            return Err(BlError::Validation(format!(
                "invalid signal: symbol={} strength={} price={}",
                signal.symbol, signal.strength, signal.price
            )));
        }
        Ok(signal)
    }

    /// A signal is valid iff the symbol is non-empty, strength lies in
    /// `[0, 1]`, and the reference price is positive.
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && (0.0..=1.0).contains(&self.strength)
            && self.price > Decimal::ZERO
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} {} {} strength={:.2} @{})",
            self.strategy_id, self.symbol, self.direction, self.strength, self.price
        )
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{BlError, BlResult};

/// Bar periodicity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    pub fn to_seconds(&self) -> u64 {
        match self {
            Frequency::Hourly => 3600,
            Frequency::Daily => 86400,
            Frequency::Weekly => 604800,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Hourly => "1h",
            Frequency::Daily => "1d",
            Frequency::Weekly => "1w",
        };
        write!(f, "{}", s)
    }
}

/// Optional technical-indicator fields carried alongside OHLC data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarIndicators {
    pub ma5: Option<Decimal>,
    pub ma20: Option<Decimal>,
    pub ma60: Option<Decimal>,
    pub macd_dif: Option<Decimal>,
    pub macd_dea: Option<Decimal>,
    pub macd_histogram: Option<Decimal>,
    pub rsi14: Option<f64>,
    pub boll_upper: Option<Decimal>,
    pub boll_lower: Option<Decimal>,
}

impl BarIndicators {
    pub fn is_empty(&self) -> bool {
        self.ma5.is_none()
            && self.ma20.is_none()
            && self.ma60.is_none()
            && self.macd_dif.is_none()
            && self.rsi14.is_none()
            && self.boll_upper.is_none()
    }
}

/// One OHLC observation for a symbol at a given frequency.
///
/// Immutable after construction; [`Bar::new`] rejects data that violates the
/// OHLC invariants (`high >= max(open, close)`, `low <= min(open, close)`,
/// non-negative volume and amount).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub frequency: Frequency,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub amount: Decimal,
    pub turnover: f64,
    pub indicators: BarIndicators,
    pub market_cap: Option<Decimal>,
    pub circulating_market_cap: Option<Decimal>,
    pub is_st: bool,
    pub is_new: bool,
}

impl Bar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        frequency: Frequency,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
        amount: Decimal,
    ) -> BlResult<Self> {
        if high < open.max(close) {
            return Err(BlError::Validation(format!(
                "bar high {} below max(open, close) {}",
                high,
                open.max(close)
            )));
        }
        if low > open.min(close) {
            return Err(BlError::Validation(format!(
                "bar low {} above min(open, close) {}",
                low,
                open.min(close)
            )));
        }
        if volume < 0 {
            return Err(BlError::Validation(format!("negative volume {}", volume)));
        }
        if amount < Decimal::ZERO {
            return Err(BlError::Validation(format!("negative amount {}", amount)));
        }

        Ok(Self {
            symbol: symbol.into(),
            timestamp,
            frequency,
            open,
            high,
            low,
            close,
            volume,
            amount,
            turnover: 0.0,
            indicators: BarIndicators::default(),
            market_cap: None,
            circulating_market_cap: None,
            is_st: false,
            is_new: false,
        })
    }

    pub fn with_turnover(mut self, turnover: f64) -> Self {
        self.turnover = turnover;
        self
    }

    pub fn with_indicators(mut self, indicators: BarIndicators) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_flags(mut self, is_st: bool, is_new: bool) -> Self {
        self.is_st = is_st;
        self.is_new = is_new;
        self
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Absolute size of the candle body
    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn upper_shadow(&self) -> Decimal {
        self.high - self.open.max(self.close)
    }

    pub fn lower_shadow(&self) -> Decimal {
        self.open.min(self.close) - self.low
    }

    /// Close-over-open change as a fraction; zero when open is zero.
    pub fn change_pct(&self) -> Decimal {
        if self.open > Decimal::ZERO {
            (self.close - self.open) / self.open
        } else {
            Decimal::ZERO
        }
    }
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bar({} {} OHLC={}/{}/{}/{} vol={})",
            self.symbol, self.timestamp, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

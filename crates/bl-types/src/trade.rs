use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::AccountError;
use crate::orders::Fill;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

/// A matched open/close pair for one `(symbol, strategy)` holding, the basis
/// of realized pnl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub symbol: String,
    pub strategy_id: Option<String>,

    pub buy_fill: Fill,
    pub buy_time: DateTime<Utc>,
    pub buy_price: Decimal,
    pub buy_quantity: i64,

    pub sell_fill: Option<Fill>,
    pub sell_time: Option<DateTime<Utc>>,
    pub sell_price: Option<Decimal>,
    pub sell_quantity: Option<i64>,

    pub realized_pnl: Decimal,
    pub total_commission: Decimal,
    pub status: TradeStatus,
}

impl Trade {
    /// Open a trade from a buy fill.
    pub fn open(buy_fill: Fill) -> Self {
        Self {
            trade_id: Uuid::new_v4(),
            symbol: buy_fill.symbol.clone(),
            strategy_id: buy_fill.strategy_id.clone(),
            buy_time: buy_fill.timestamp,
            buy_price: buy_fill.price,
            buy_quantity: buy_fill.quantity,
            total_commission: buy_fill.commission,
            buy_fill,
            sell_fill: None,
            sell_time: None,
            sell_price: None,
            sell_quantity: None,
            realized_pnl: Decimal::ZERO,
            status: TradeStatus::Open,
        }
    }

    /// Close the trade with a sell fill, realizing
    /// `(sell - buy) * min(buy_qty, sell_qty) - total_commission`.
    pub fn close(&mut self, sell_fill: Fill) -> Result<(), AccountError> {
        if self.status == TradeStatus::Closed {
            return Err(AccountError::TradeAlreadyClosed {
                trade_id: self.trade_id.to_string(),
            });
        }
        if sell_fill.symbol != self.symbol {
            return Err(AccountError::TradeSymbolMismatch {
                fill_symbol: sell_fill.symbol.clone(),
                trade_symbol: self.symbol.clone(),
            });
        }

        self.total_commission += sell_fill.commission;
        let matched = self.buy_quantity.min(sell_fill.quantity);
        self.realized_pnl =
            (sell_fill.price - self.buy_price) * Decimal::from(matched) - self.total_commission;

        self.sell_time = Some(sell_fill.timestamp);
        self.sell_price = Some(sell_fill.price);
        self.sell_quantity = Some(sell_fill.quantity);
        self.sell_fill = Some(sell_fill);
        self.status = TradeStatus::Closed;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Holding period in fractional days, for closed trades.
    pub fn holding_days(&self) -> Option<f64> {
        let sell_time = self.sell_time?;
        Some((sell_time - self.buy_time).num_seconds() as f64 / 86_400.0)
    }

    /// Realized return over the entry cost, for closed trades.
    pub fn return_pct(&self) -> Option<Decimal> {
        if !self.is_closed() {
            return None;
        }
        let buy_cost = Decimal::from(self.buy_quantity) * self.buy_price;
        if buy_cost > Decimal::ZERO {
            Some(self.realized_pnl / buy_cost)
        } else {
            Some(Decimal::ZERO)
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade({} open {}@{}",
            self.symbol, self.buy_quantity, self.buy_price
        )?;
        if let (Some(qty), Some(price)) = (self.sell_quantity, self.sell_price) {
            write!(f, " -> close {}@{} pnl={}", qty, price, self.realized_pnl)?;
        }
        write!(f, ")")
    }
}

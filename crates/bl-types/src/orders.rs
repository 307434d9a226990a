use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{BlResult, OrderError};

/// Unique order identifier
pub type OrderId = Uuid;

/// Direction of an order (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        write!(f, "{}", s)
    }
}

/// Order types supported by the execution engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status during lifecycle.
///
/// Progresses only forward along
/// `Pending -> Submitted -> (PartiallyFilled)* -> Filled | Cancelled | Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// A decision to trade, after risk checks and sizing.
///
/// Quantities are integral shares; prices are the limit/reference price.
/// State transitions go through [`Order::submit`], [`Order::fill`],
/// [`Order::cancel`] and [`Order::reject`] which enforce the status machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i64,
    pub price: Decimal,
    pub strategy_id: Option<String>,
    pub status: OrderStatus,
    pub created_time: DateTime<Utc>,
    pub submitted_time: Option<DateTime<Utc>>,
    pub filled_time: Option<DateTime<Utc>>,
    pub filled_quantity: i64,
    /// Accumulated `quantity * price` over fills, for the average fill price.
    pub filled_amount: Decimal,
}

impl Order {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        quantity: i64,
        price: Decimal,
        strategy_id: Option<String>,
        created_time: DateTime<Utc>,
    ) -> BlResult<Self> {
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity { quantity }.into());
        }
        if price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice { price }.into());
        }
        Ok(Self {
            order_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price,
            strategy_id,
            status: OrderStatus::Pending,
            created_time,
            submitted_time: None,
            filled_time: None,
            filled_quantity: 0,
            filled_amount: Decimal::ZERO,
        })
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        price: Decimal,
        strategy_id: Option<String>,
        created_time: DateTime<Utc>,
    ) -> BlResult<Self> {
        Self::new(
            symbol,
            side,
            OrderType::Limit,
            quantity,
            price,
            strategy_id,
            created_time,
        )
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.filled_quantity
    }

    /// Average fill price; zero while nothing has filled.
    pub fn avg_filled_price(&self) -> Decimal {
        if self.filled_quantity == 0 {
            Decimal::ZERO
        } else {
            self.filled_amount / Decimal::from(self.filled_quantity)
        }
    }

    pub fn notional(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }

    /// Mark the order as submitted to an execution venue.
    pub fn submit(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::Terminal {
                order_id: self.order_id.to_string(),
                status: self.status,
            });
        }
        self.status = OrderStatus::Submitted;
        self.submitted_time = Some(at);
        Ok(())
    }

    /// Apply a (partial) fill, advancing the status machine.
    pub fn fill(
        &mut self,
        quantity: i64,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::Terminal {
                order_id: self.order_id.to_string(),
                status: self.status,
            });
        }
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        if quantity > self.remaining_quantity() {
            return Err(OrderError::Overfill {
                order_id: self.order_id.to_string(),
                requested: quantity,
                remaining: self.remaining_quantity(),
            });
        }

        self.filled_quantity += quantity;
        self.filled_amount += Decimal::from(quantity) * price;

        if self.filled_quantity == self.quantity {
            self.status = OrderStatus::Filled;
            self.filled_time = Some(at);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
        Ok(())
    }

    /// Cancel the order; only valid while submitted or partially filled.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Submitted | OrderStatus::PartiallyFilled => {
                self.status = OrderStatus::Cancelled;
                Ok(())
            }
            status => Err(OrderError::NotCancellable {
                order_id: self.order_id.to_string(),
                status,
            }),
        }
    }

    /// Reject a not-yet-terminal order (pre-submit risk gates).
    pub fn reject(&mut self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::Terminal {
                order_id: self.order_id.to_string(),
                status: self.status,
            });
        }
        self.status = OrderStatus::Rejected;
        Ok(())
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order({} {} {} {}@{} {})",
            self.order_id, self.symbol, self.side, self.quantity, self.price, self.status
        )
    }
}

/// Execution of all or part of an order. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
    pub strategy_id: Option<String>,
}

impl Fill {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        price: Decimal,
        commission: Decimal,
        timestamp: DateTime<Utc>,
        strategy_id: Option<String>,
    ) -> BlResult<Self> {
        if quantity <= 0 {
            return Err(OrderError::InvalidQuantity { quantity }.into());
        }
        if price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice { price }.into());
        }
        if commission < Decimal::ZERO {
            return Err(crate::errors::BlError::Validation(format!(
                "negative commission {}",
                commission
            )));
        }
        Ok(Self {
            fill_id: Uuid::new_v4(),
            order_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            commission,
            timestamp,
            strategy_id,
        })
    }

    pub fn gross_amount(&self) -> Decimal {
        Decimal::from(self.quantity) * self.price
    }

    /// Cash magnitude of the fill: for a BUY the commission is added on top
    /// of the traded amount (cash out), for a SELL it is deducted (cash in).
    pub fn net_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => self.gross_amount() + self.commission,
            Side::Sell => self.gross_amount() - self.commission,
        }
    }
}

impl fmt::Display for Fill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fill({} {} {}@{} commission={})",
            self.symbol, self.side, self.quantity, self.price, self.commission
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T00:00:00Z".parse().unwrap()
    }

    fn order(quantity: i64) -> Order {
        Order::limit("600000.SH", Side::Buy, quantity, dec!(10.0), None, ts()).unwrap()
    }

    #[test]
    fn invalid_construction_rejected() {
        assert!(Order::limit("X", Side::Buy, 0, dec!(10), None, ts()).is_err());
        assert!(Order::limit("X", Side::Buy, 100, dec!(0), None, ts()).is_err());
    }

    #[test]
    fn full_lifecycle() {
        let mut o = order(1000);
        assert_eq!(o.status, OrderStatus::Pending);
        o.submit(ts()).unwrap();
        assert_eq!(o.status, OrderStatus::Submitted);
        o.fill(1000, dec!(10.1), ts()).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.filled_quantity, 1000);
        assert_eq!(o.avg_filled_price(), dec!(10.1));
        assert!(o.filled_time.is_some());
    }

    #[test]
    fn partial_fill_then_complete() {
        let mut o = order(1000);
        o.submit(ts()).unwrap();
        o.fill(400, dec!(10.0), ts()).unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining_quantity(), 600);
        o.fill(600, dec!(10.2), ts()).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        // (400*10.0 + 600*10.2) / 1000
        assert_eq!(o.avg_filled_price(), dec!(10.12));
    }

    #[test]
    fn overfill_rejected() {
        let mut o = order(100);
        o.submit(ts()).unwrap();
        let err = o.fill(200, dec!(10.0), ts());
        assert!(matches!(err, Err(OrderError::Overfill { .. })));
        assert_eq!(o.filled_quantity, 0);
    }

    #[test]
    fn terminal_rejects_fill_and_cancel() {
        let mut o = order(100);
        o.submit(ts()).unwrap();
        o.fill(100, dec!(10.0), ts()).unwrap();
        assert!(o.fill(1, dec!(10.0), ts()).is_err());
        assert!(o.cancel().is_err());
    }

    #[test]
    fn cancel_only_after_submit() {
        let mut o = order(100);
        assert!(o.cancel().is_err());
        o.submit(ts()).unwrap();
        o.cancel().unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
    }

    #[test]
    fn double_submit_rejected() {
        let mut o = order(100);
        o.submit(ts()).unwrap();
        assert!(o.submit(ts()).is_err());
    }

    #[test]
    fn fill_net_amount_by_side() {
        let buy = Fill::new(
            Uuid::new_v4(),
            "600000.SH",
            Side::Buy,
            100,
            dec!(10.0),
            dec!(5.0),
            ts(),
            None,
        )
        .unwrap();
        assert_eq!(buy.net_amount(), dec!(1005.0));

        let sell = Fill::new(
            Uuid::new_v4(),
            "600000.SH",
            Side::Sell,
            100,
            dec!(10.0),
            dec!(5.0),
            ts(),
            None,
        )
        .unwrap();
        assert_eq!(sell.net_amount(), dec!(995.0));
    }

    #[test]
    fn invalid_fill_rejected() {
        assert!(Fill::new(
            Uuid::new_v4(),
            "X",
            Side::Buy,
            0,
            dec!(10),
            Decimal::ZERO,
            ts(),
            None
        )
        .is_err());
        assert!(Fill::new(
            Uuid::new_v4(),
            "X",
            Side::Buy,
            100,
            dec!(10),
            dec!(-1),
            ts(),
            None
        )
        .is_err());
    }
}

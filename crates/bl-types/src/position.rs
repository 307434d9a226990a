use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{BlError, BlResult};

/// A holding in one symbol.
///
/// Quantity is a signed share count (positive long, negative short); a
/// position with zero quantity is considered empty and is removed from the
/// account that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub strategy_id: Option<String>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        quantity: i64,
        avg_price: Decimal,
        strategy_id: Option<String>,
    ) -> BlResult<Self> {
        if avg_price < Decimal::ZERO {
            return Err(BlError::Validation(format!(
                "negative average price {}",
                avg_price
            )));
        }
        Ok(Self {
            symbol: symbol.into(),
            quantity,
            avg_price,
            strategy_id,
        })
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Position value at cost basis.
    pub fn cost_value(&self) -> Decimal {
        Decimal::from(self.quantity.abs()) * self.avg_price
    }

    /// Position value marked at the given price.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.quantity.abs()) * price
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        if self.is_empty() {
            return Decimal::ZERO;
        }
        Decimal::from(self.quantity) * (current_price - self.avg_price)
    }

    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.is_empty() || self.avg_price == Decimal::ZERO {
            return Decimal::ZERO;
        }
        (current_price - self.avg_price) / self.avg_price
    }

    /// Apply a signed quantity change at the given fill price.
    ///
    /// Same-sign additions recompute the average cost as
    /// `|old_q * avg + dq * price| / |old_q + dq|`; a sign flip resets the
    /// cost to the fill price; plain reductions leave it unchanged.
    pub fn apply(&mut self, quantity_change: i64, fill_price: Decimal) {
        if quantity_change == 0 {
            return;
        }
        let new_quantity = self.quantity + quantity_change;

        let same_sign = (self.quantity >= 0 && quantity_change > 0)
            || (self.quantity <= 0 && quantity_change < 0);
        if same_sign {
            if new_quantity != 0 {
                let total_cost = Decimal::from(self.quantity) * self.avg_price
                    + Decimal::from(quantity_change) * fill_price;
                self.avg_price = (total_cost / Decimal::from(new_quantity)).abs();
            }
        } else if new_quantity * self.quantity < 0 {
            // Sign flip: the surviving exposure was opened at the fill price.
            self.avg_price = fill_price;
        }

        self.quantity = new_quantity;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.is_long() {
            "long"
        } else if self.is_short() {
            "short"
        } else {
            "flat"
        };
        write!(
            f,
            "Position({} {} {}@{})",
            self.symbol,
            direction,
            self.quantity.abs(),
            self.avg_price
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pos(quantity: i64, avg: Decimal) -> Position {
        Position::new("600000.SH", quantity, avg, Some("s1".to_string())).unwrap()
    }

    #[test]
    fn negative_avg_price_rejected() {
        assert!(Position::new("X", 100, dec!(-1), None).is_err());
    }

    #[test]
    fn same_sign_add_averages_cost() {
        let mut p = pos(100, dec!(10.0));
        p.apply(100, dec!(12.0));
        assert_eq!(p.quantity, 200);
        assert_eq!(p.avg_price, dec!(11.0));
    }

    #[test]
    fn open_from_flat_takes_fill_price() {
        let mut p = pos(0, Decimal::ZERO);
        p.apply(300, dec!(9.5));
        assert_eq!(p.quantity, 300);
        assert_eq!(p.avg_price, dec!(9.5));
    }

    #[test]
    fn reduction_keeps_cost() {
        let mut p = pos(300, dec!(10.0));
        p.apply(-100, dec!(11.0));
        assert_eq!(p.quantity, 200);
        assert_eq!(p.avg_price, dec!(10.0));
    }

    #[test]
    fn sign_flip_resets_cost() {
        let mut p = pos(100, dec!(10.0));
        p.apply(-300, dec!(11.0));
        assert_eq!(p.quantity, -200);
        assert_eq!(p.avg_price, dec!(11.0));
    }

    #[test]
    fn close_to_flat() {
        let mut p = pos(100, dec!(10.0));
        p.apply(-100, dec!(11.0));
        assert!(p.is_empty());
        // Cost of a flat position is irrelevant but must stay non-negative.
        assert!(p.avg_price >= Decimal::ZERO);
    }

    #[test]
    fn unrealized_pnl() {
        let p = pos(1000, dec!(10.0));
        assert_eq!(p.unrealized_pnl(dec!(10.5)), dec!(500.0));
        assert_eq!(p.unrealized_pnl_pct(dec!(10.5)), dec!(0.05));
    }
}

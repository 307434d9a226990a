use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::{AccountError, BlResult};
use crate::orders::{Fill, Order, OrderId, Side};
use crate::position::Position;
use crate::trade::Trade;

/// The account book: cash, frozen cash, positions and the full order, fill
/// and trade history.
///
/// The account exclusively owns its positions, orders, fills and trades.
/// All mutation goes through [`Account::freeze_cash`],
/// [`Account::unfreeze_cash`], [`Account::apply_fill`] and
/// [`Account::add_order`]; callers hold it behind a single-writer discipline
/// (the portfolio manager's worker) and hand out clones for reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub frozen_cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub orders: HashMap<OrderId, Order>,
    pub fills: Vec<Fill>,
    pub trades: Vec<Trade>,
    pub total_commission: Decimal,
    pub total_realized_pnl: Decimal,
}

impl Account {
    pub fn new(account_id: impl Into<String>, initial_capital: Decimal) -> BlResult<Self> {
        if initial_capital <= Decimal::ZERO {
            return Err(AccountError::InvalidCapital {
                capital: initial_capital,
            }
            .into());
        }
        Ok(Self {
            account_id: account_id.into(),
            initial_capital,
            cash: initial_capital,
            frozen_cash: Decimal::ZERO,
            positions: HashMap::new(),
            orders: HashMap::new(),
            fills: Vec::new(),
            trades: Vec::new(),
            total_commission: Decimal::ZERO,
            total_realized_pnl: Decimal::ZERO,
        })
    }

    /// Cash not reserved for in-flight orders.
    pub fn available_cash(&self) -> Decimal {
        self.cash - self.frozen_cash
    }

    /// Reserve cash for an order about to be emitted.
    pub fn freeze_cash(&mut self, amount: Decimal) -> Result<(), AccountError> {
        if amount <= Decimal::ZERO || self.available_cash() < amount {
            return Err(AccountError::FreezeFailed {
                requested: amount,
                available: self.available_cash(),
            });
        }
        self.frozen_cash += amount;
        Ok(())
    }

    /// Release a reservation; clamped so frozen cash never goes negative.
    pub fn unfreeze_cash(&mut self, amount: Decimal) {
        self.frozen_cash = (self.frozen_cash - amount).max(Decimal::ZERO);
    }

    pub fn add_order(&mut self, order: Order) {
        self.orders.insert(order.order_id, order);
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions
            .get(symbol)
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }

    /// Apply a fill to the book: advances the recorded order, updates the
    /// position via the cost-basis rule (removing it when flat), moves cash
    /// by the fill's net amount, appends the fill, and opens or closes the
    /// matching trade.
    pub fn apply_fill(&mut self, fill: &Fill) -> BlResult<()> {
        if let Some(order) = self.orders.get_mut(&fill.order_id) {
            if order.status == crate::orders::OrderStatus::Pending {
                order.submit(fill.timestamp)?;
            }
            order.fill(fill.quantity, fill.price, fill.timestamp)?;
        }

        let quantity_change = fill.quantity * fill.side.sign();
        match self.positions.get_mut(&fill.symbol) {
            Some(position) => {
                position.apply(quantity_change, fill.price);
                if position.is_empty() {
                    self.positions.remove(&fill.symbol);
                }
            }
            None => {
                self.positions.insert(
                    fill.symbol.clone(),
                    Position::new(
                        fill.symbol.clone(),
                        quantity_change,
                        fill.price,
                        fill.strategy_id.clone(),
                    )?,
                );
            }
        }

        match fill.side {
            Side::Buy => self.cash -= fill.net_amount(),
            Side::Sell => self.cash += fill.net_amount(),
        }
        self.total_commission += fill.commission;
        self.fills.push(fill.clone());

        self.match_trade(fill)?;
        Ok(())
    }

    /// Trade bookkeeping: a BUY opens a trade for `(symbol, strategy)` when
    /// none is open; a SELL closes the earliest open trade for that key,
    /// falling back to the earliest open trade for the symbol so that
    /// stop-strategy sells still realize pnl against the opening trade.
    fn match_trade(&mut self, fill: &Fill) -> BlResult<()> {
        match fill.side {
            Side::Buy => {
                let open_exists = self
                    .trades
                    .iter()
                    .any(|t| t.is_open() && t.symbol == fill.symbol && t.strategy_id == fill.strategy_id);
                if !open_exists {
                    self.trades.push(Trade::open(fill.clone()));
                }
            }
            Side::Sell => {
                let idx = self
                    .trades
                    .iter()
                    .position(|t| {
                        t.is_open()
                            && t.symbol == fill.symbol
                            && t.strategy_id == fill.strategy_id
                    })
                    .or_else(|| {
                        self.trades
                            .iter()
                            .position(|t| t.is_open() && t.symbol == fill.symbol)
                    });
                if let Some(idx) = idx {
                    let trade = &mut self.trades[idx];
                    trade.close(fill.clone())?;
                    self.total_realized_pnl += trade.realized_pnl;
                }
            }
        }
        Ok(())
    }

    /// Total account value with positions marked at the given prices,
    /// falling back to average cost for symbols without a quote.
    pub fn total_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let market_value: Decimal = self
            .positions
            .iter()
            .map(|(symbol, position)| {
                let price = prices.get(symbol).copied().unwrap_or(position.avg_price);
                Decimal::from(position.quantity) * price
            })
            .sum();
        self.cash + market_value
    }

    /// Absolute value of all holdings at the given prices.
    pub fn position_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .iter()
            .map(|(symbol, position)| {
                let price = prices.get(symbol).copied().unwrap_or(position.avg_price);
                position.market_value(price)
            })
            .sum()
    }

    pub fn unrealized_pnl(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .iter()
            .map(|(symbol, position)| {
                let price = prices.get(symbol).copied().unwrap_or(position.avg_price);
                position.unrealized_pnl(price)
            })
            .sum()
    }

    pub fn total_pnl(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.total_realized_pnl + self.unrealized_pnl(prices)
    }

    /// Holdings over total value; zero for an empty account.
    pub fn leverage(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let total = self.total_value(prices);
        if total > Decimal::ZERO {
            self.position_value(prices) / total
        } else {
            Decimal::ZERO
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Account({} cash={} frozen={} positions={} realized_pnl={})",
            self.account_id,
            self.cash,
            self.frozen_cash,
            self.positions.len(),
            self.total_realized_pnl
        )
    }
}

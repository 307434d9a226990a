use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use bl_engine::{EventBus, EventHandler};
use bl_types::{
    Account, Event, EventKind, Fill, Order, OrderId, PortfolioConfig, Position,
    PositionSizeMethod, Side, Signal, SignalDirection,
};

/// A-share minimum trading lot.
const LOT_SIZE: i64 = 100;

type SignalKey = (String, String, SignalDirection);

#[derive(Debug, Default)]
struct RiskState {
    /// Last emission time per `(strategy, symbol, direction)` for the
    /// cooldown window.
    recent_signals: HashMap<SignalKey, DateTime<Utc>>,
    /// Cash reserved per emitted order, released when its fill arrives.
    reservations: HashMap<OrderId, Decimal>,
    /// Last observed price per symbol, from signals and fills.
    last_prices: HashMap<String, Decimal>,
    signals_deduped: u64,
    signals_rejected: u64,
    orders_emitted: u64,
}

/// Counter snapshot for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalCounters {
    pub signals_deduped: u64,
    pub signals_rejected: u64,
    pub orders_emitted: u64,
}

/// Portfolio snapshot for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub account_id: String,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub frozen_cash: Decimal,
    pub position_value: Decimal,
    pub position_count: usize,
    pub leverage: Decimal,
    pub total_commission: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

/// The single authority between strategies and execution: validates and
/// deduplicates signals, applies the risk gates and sizing rules, reserves
/// cash, emits orders, and applies fills back to the account book.
///
/// SIGNAL and FILL events are both routed to this handler's one queue, so
/// every account mutation happens on one worker without extra locking
/// discipline from callers.
pub struct PortfolioRiskManager {
    config: PortfolioConfig,
    bus: Arc<EventBus>,
    account: RwLock<Account>,
    state: Mutex<RiskState>,
}

impl PortfolioRiskManager {
    pub fn new(account: Account, bus: Arc<EventBus>, config: PortfolioConfig) -> Arc<Self> {
        info!(
            max_position_pct = %config.max_position_pct,
            max_total_position_pct = %config.max_total_position_pct,
            "portfolio risk manager initialized"
        );
        Arc::new(Self {
            config,
            bus,
            account: RwLock::new(account),
            state: Mutex::new(RiskState::default()),
        })
    }

    /// Subscribe to the SIGNAL and FILL streams on one shared queue.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        let handler: Arc<dyn EventHandler> = Arc::clone(self) as Arc<dyn EventHandler>;
        bus.register(EventKind::Signal, Arc::clone(&handler));
        bus.register(EventKind::Fill, handler);
    }

    // --- read surface -----------------------------------------------------

    /// Immutable copy of the current positions, for strategy watch sets.
    pub fn positions_snapshot(&self) -> HashMap<String, Position> {
        self.account.read().positions.clone()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.account.read().positions.get(symbol).cloned()
    }

    /// Full clone of the account book, for reporting.
    pub fn account_snapshot(&self) -> Account {
        self.account.read().clone()
    }

    pub fn signal_counters(&self) -> SignalCounters {
        let state = self.state.lock();
        SignalCounters {
            signals_deduped: state.signals_deduped,
            signals_rejected: state.signals_rejected,
            orders_emitted: state.orders_emitted,
        }
    }

    pub fn portfolio_stats(&self) -> PortfolioStats {
        let prices = self.state.lock().last_prices.clone();
        let account = self.account.read();
        PortfolioStats {
            account_id: account.account_id.clone(),
            total_value: account.total_value(&prices),
            cash: account.cash,
            frozen_cash: account.frozen_cash,
            position_value: account.position_value(&prices),
            position_count: account.positions.len(),
            leverage: account.leverage(&prices),
            total_commission: account.total_commission,
            realized_pnl: account.total_realized_pnl,
            unrealized_pnl: account.unrealized_pnl(&prices),
        }
    }

    /// Release the reservation of an order that will never fill
    /// (cancelled or rejected downstream).
    pub fn release_reservation(&self, order_id: OrderId) {
        let amount = self.state.lock().reservations.remove(&order_id);
        if let Some(amount) = amount {
            self.account.write().unfreeze_cash(amount);
            debug!(%order_id, %amount, "reservation released");
        }
    }

    /// Release every outstanding reservation; used at shutdown.
    pub fn release_all_reservations(&self) {
        let amounts: Vec<Decimal> = {
            let mut state = self.state.lock();
            state.reservations.drain().map(|(_, amount)| amount).collect()
        };
        if !amounts.is_empty() {
            let mut account = self.account.write();
            for amount in amounts {
                account.unfreeze_cash(amount);
            }
        }
    }

    // --- signal path ------------------------------------------------------

    fn on_signal(&self, signal: &Signal) {
        if !signal.is_valid() {
            debug!(%signal, "invalid signal dropped");
            return;
        }

        self.state
            .lock()
            .last_prices
            .insert(signal.symbol.clone(), signal.price);

        if signal.direction == SignalDirection::Hold {
            return;
        }
        debug!(%signal, reason = %signal.reason, "signal received");

        if self.is_duplicate(signal) {
            debug!(%signal, "duplicate signal within cooldown window");
            return;
        }

        let order = match signal.direction {
            SignalDirection::Buy => self.build_buy_order(signal),
            SignalDirection::Sell => self.build_sell_order(signal),
            SignalDirection::Hold => None,
        };

        if let Some(order) = order {
            info!(
                symbol = %order.symbol,
                side = %order.side,
                quantity = order.quantity,
                price = %order.price,
                "order generated"
            );
            self.account.write().add_order(order.clone());
            self.record_emission(signal);
            self.state.lock().orders_emitted += 1;
            self.bus.publish(Event::order(order));
        } else {
            self.state.lock().signals_rejected += 1;
        }
    }

    /// Time-window dedup on `(strategy, symbol, direction)`.
    fn is_duplicate(&self, signal: &Signal) -> bool {
        let cooldown = Duration::seconds(self.config.signal_cooldown_seconds as i64);
        if cooldown.is_zero() {
            return false;
        }
        let key = (
            signal.strategy_id.clone(),
            signal.symbol.clone(),
            signal.direction,
        );
        let mut state = self.state.lock();
        if let Some(last) = state.recent_signals.get(&key) {
            if signal.timestamp - *last < cooldown {
                state.signals_deduped += 1;
                return true;
            }
        }
        false
    }

    fn record_emission(&self, signal: &Signal) {
        let cooldown = Duration::seconds(self.config.signal_cooldown_seconds as i64);
        let key = (
            signal.strategy_id.clone(),
            signal.symbol.clone(),
            signal.direction,
        );
        let mut state = self.state.lock();
        state.recent_signals.insert(key, signal.timestamp);
        if state.recent_signals.len() > 1000 {
            let now = signal.timestamp;
            state
                .recent_signals
                .retain(|_, last| now - *last < cooldown);
        }
    }

    fn build_buy_order(&self, signal: &Signal) -> Option<Order> {
        let prices = {
            let state = self.state.lock();
            let mut prices = state.last_prices.clone();
            prices.insert(signal.symbol.clone(), signal.price);
            prices
        };

        let (notional, quantity, required) = {
            let account = self.account.read();

            if account.has_position(&signal.symbol) {
                debug!(symbol = %signal.symbol, "already holding, buy skipped");
                return None;
            }

            let total_value = account.total_value(&prices);
            let notional = self.position_size(signal, total_value);

            if notional < self.config.min_order_amount {
                debug!(
                    %notional,
                    min = %self.config.min_order_amount,
                    "order notional below minimum"
                );
                return None;
            }

            let expected_commission = notional * self.config.commission_slack;
            if account.available_cash() < notional + expected_commission {
                warn!(
                    available = %account.available_cash(),
                    %notional,
                    "insufficient available cash"
                );
                return None;
            }

            let max_position = total_value * self.config.max_position_pct;
            if notional > max_position {
                warn!(
                    %notional,
                    limit = %max_position,
                    "single-position cap exceeded"
                );
                return None;
            }

            let position_value = account.position_value(&prices);
            let max_total = total_value * self.config.max_total_position_pct;
            if position_value + notional > max_total {
                warn!(
                    current = %position_value,
                    %notional,
                    limit = %max_total,
                    "total-exposure cap exceeded"
                );
                return None;
            }

            let lots = (notional / signal.price / Decimal::from(LOT_SIZE)).floor();
            let quantity = lots.to_i64().unwrap_or(0) * LOT_SIZE;
            if quantity < LOT_SIZE {
                debug!(quantity, "buy quantity below one lot");
                return None;
            }

            let required =
                Decimal::from(quantity) * signal.price * (Decimal::ONE + self.config.commission_slack);
            (notional, quantity, required)
        };

        if let Err(err) = self.account.write().freeze_cash(required) {
            warn!(error = %err, %notional, "cash reservation failed");
            return None;
        }

        let order = match Order::limit(
            signal.symbol.clone(),
            Side::Buy,
            quantity,
            signal.price,
            Some(signal.strategy_id.clone()),
            signal.timestamp,
        ) {
            Ok(order) => order,
            Err(err) => {
                // Cannot happen with a validated signal, but never leak the
                // reservation if it does.
                error!(error = %err, "order construction failed");
                self.account.write().unfreeze_cash(required);
                return None;
            }
        };

        self.state
            .lock()
            .reservations
            .insert(order.order_id, required);
        Some(order)
    }

    fn build_sell_order(&self, signal: &Signal) -> Option<Order> {
        let account = self.account.read();
        let position = match account.positions.get(&signal.symbol) {
            Some(position) if !position.is_empty() => position,
            _ => {
                debug!(symbol = %signal.symbol, "no position, sell skipped");
                return None;
            }
        };

        Order::limit(
            signal.symbol.clone(),
            Side::Sell,
            position.quantity.abs(),
            signal.price,
            Some(signal.strategy_id.clone()),
            signal.timestamp,
        )
        .map_err(|err| error!(error = %err, "order construction failed"))
        .ok()
    }

    fn position_size(&self, signal: &Signal, total_value: Decimal) -> Decimal {
        match self.config.position_size_method {
            PositionSizeMethod::FixedAmount => self.config.default_position_size,
            PositionSizeMethod::PercentOfPortfolio => total_value * self.config.max_position_pct,
            PositionSizeMethod::SignalStrength => {
                let strength =
                    Decimal::from_f64_retain(signal.strength).unwrap_or(Decimal::ONE);
                self.config.default_position_size * strength
            }
        }
    }

    // --- fill path --------------------------------------------------------

    fn on_fill(&self, fill: &Fill) {
        debug!(%fill, "fill received");
        {
            let mut state = self.state.lock();
            state.last_prices.insert(fill.symbol.clone(), fill.price);
        }

        if fill.side == Side::Buy {
            let reservation = self.state.lock().reservations.remove(&fill.order_id);
            if let Some(amount) = reservation {
                self.account.write().unfreeze_cash(amount);
            }
        }

        let result = self.account.write().apply_fill(fill);
        match result {
            Ok(()) => {
                let account = self.account.read();
                debug!(
                    cash = %account.cash,
                    positions = account.positions.len(),
                    "account updated"
                );
            }
            Err(err) => {
                error!(error = %err, %fill, "fill application failed, fill dropped");
            }
        }
    }
}

impl EventHandler for PortfolioRiskManager {
    fn name(&self) -> &str {
        "portfolio-risk"
    }

    fn handle_event(&self, event: &Event) {
        match event {
            Event::Signal { signal, .. } => self.on_signal(signal),
            Event::Fill { fill, .. } => self.on_fill(fill),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_types::EventBusConfig;
    use rust_decimal_macros::dec;

    fn ts(minute: u32) -> DateTime<Utc> {
        format!("2024-03-01T10:{:02}:00Z", minute).parse().unwrap()
    }

    fn buy_signal(price: Decimal, minute: u32) -> Signal {
        Signal::new(
            "s1",
            "600000.SH",
            SignalDirection::Buy,
            0.8,
            ts(minute),
            price,
            "test buy",
        )
        .unwrap()
    }

    fn sell_signal(price: Decimal, minute: u32) -> Signal {
        Signal::new(
            "s1",
            "600000.SH",
            SignalDirection::Sell,
            1.0,
            ts(minute),
            price,
            "test sell",
        )
        .unwrap()
    }

    fn manager_with(config: PortfolioConfig, capital: Decimal) -> Arc<PortfolioRiskManager> {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let account = Account::new("test", capital).unwrap();
        PortfolioRiskManager::new(account, bus, config)
    }

    fn manager() -> Arc<PortfolioRiskManager> {
        manager_with(
            PortfolioConfig {
                default_position_size: dec!(50_000),
                ..PortfolioConfig::default()
            },
            dec!(1_000_000),
        )
    }

    fn fill_for(manager: &PortfolioRiskManager, side: Side, price: Decimal) -> Fill {
        // Match the most recently emitted order for realistic plumbing.
        let account = manager.account_snapshot();
        let order = account
            .orders
            .values()
            .find(|o| o.side == side && o.is_active())
            .expect("expected an active order");
        Fill::new(
            order.order_id,
            order.symbol.clone(),
            side,
            order.quantity,
            price,
            dec!(5),
            order.created_time,
            order.strategy_id.clone(),
        )
        .unwrap()
    }

    #[test]
    fn buy_signal_emits_lot_floored_order() {
        let m = manager();
        m.on_signal(&buy_signal(dec!(10.5), 0));

        let account = m.account_snapshot();
        assert_eq!(account.orders.len(), 1);
        let order = account.orders.values().next().unwrap();
        // floor(50_000 / 10.5 / 100) * 100
        assert_eq!(order.quantity, 4700);
        assert_eq!(order.price, dec!(10.5));
        assert_eq!(order.side, Side::Buy);
        // Reservation includes the 0.1% slack.
        assert_eq!(account.frozen_cash, dec!(4700) * dec!(10.5) * dec!(1.001));
        assert_eq!(m.signal_counters().orders_emitted, 1);
    }

    #[test]
    fn undersized_signal_produces_no_order() {
        let m = manager_with(
            PortfolioConfig {
                default_position_size: dec!(900),
                min_order_amount: dec!(1000),
                ..PortfolioConfig::default()
            },
            dec!(1_000_000),
        );
        m.on_signal(&buy_signal(dec!(10.0), 0));
        assert!(m.account_snapshot().orders.is_empty());
        assert_eq!(m.signal_counters().signals_rejected, 1);
    }

    #[test]
    fn sub_lot_quantity_rejected() {
        // 1500 / 20 / 100 < 1 lot
        let m = manager_with(
            PortfolioConfig {
                default_position_size: dec!(1500),
                min_order_amount: dec!(1000),
                ..PortfolioConfig::default()
            },
            dec!(1_000_000),
        );
        m.on_signal(&buy_signal(dec!(20.0), 0));
        assert!(m.account_snapshot().orders.is_empty());
    }

    #[test]
    fn max_position_pct_gate() {
        let m = manager_with(
            PortfolioConfig {
                default_position_size: dec!(50_000),
                max_position_pct: dec!(0.01),
                ..PortfolioConfig::default()
            },
            dec!(1_000_000),
        );
        m.on_signal(&buy_signal(dec!(10.0), 0));
        let account = m.account_snapshot();
        assert!(account.orders.is_empty());
        assert_eq!(account.cash, dec!(1_000_000));
        assert_eq!(account.frozen_cash, Decimal::ZERO);
        assert_eq!(m.signal_counters().signals_rejected, 1);
    }

    #[test]
    fn cash_exhaustion_rejects_subsequent_buys() {
        let m = manager_with(
            PortfolioConfig {
                default_position_size: dec!(50_000),
                max_position_pct: dec!(0.9),
                max_total_position_pct: dec!(0.95),
                ..PortfolioConfig::default()
            },
            dec!(60_000),
        );
        m.on_signal(&buy_signal(dec!(10.0), 0));
        assert_eq!(m.account_snapshot().orders.len(), 1);

        // Second buy for another symbol: reservation leaves too little.
        let other = Signal::new(
            "s1",
            "000001.SZ",
            SignalDirection::Buy,
            0.8,
            ts(1),
            dec!(10.0),
            "test",
        )
        .unwrap();
        m.on_signal(&other);
        assert_eq!(m.account_snapshot().orders.len(), 1);
    }

    #[test]
    fn duplicate_signals_suppressed_within_window() {
        let m = manager();
        for _ in 0..5 {
            m.on_signal(&buy_signal(dec!(10.5), 0));
        }
        assert_eq!(m.account_snapshot().orders.len(), 1);
        let counters = m.signal_counters();
        assert_eq!(counters.orders_emitted, 1);
        assert_eq!(counters.signals_deduped, 4);
    }

    #[test]
    fn cooldown_expires() {
        let mut config = PortfolioConfig {
            default_position_size: dec!(50_000),
            ..PortfolioConfig::default()
        };
        config.signal_cooldown_seconds = 60;
        let m = manager_with(config, dec!(1_000_000));

        m.on_signal(&buy_signal(dec!(10.0), 0));
        // Fill and flatten so the second buy passes the holding gate.
        let fill = fill_for(&m, Side::Buy, dec!(10.0));
        m.on_fill(&fill);
        m.on_signal(&sell_signal(dec!(11.0), 1));
        let sell_fill = fill_for(&m, Side::Sell, dec!(11.0));
        m.on_fill(&sell_fill);

        // Two minutes later the buy cooldown has passed.
        m.on_signal(&buy_signal(dec!(10.0), 2));
        let account = m.account_snapshot();
        let buys = account
            .orders
            .values()
            .filter(|o| o.side == Side::Buy)
            .count();
        assert_eq!(buys, 2);
    }

    #[test]
    fn sell_without_position_rejected() {
        let m = manager();
        m.on_signal(&sell_signal(dec!(10.0), 0));
        assert!(m.account_snapshot().orders.is_empty());
        assert_eq!(m.signal_counters().signals_rejected, 1);
    }

    #[test]
    fn hold_and_invalid_signals_ignored() {
        let m = manager();
        let hold = Signal::new(
            "s1",
            "600000.SH",
            SignalDirection::Hold,
            0.5,
            ts(0),
            dec!(10),
            "",
        )
        .unwrap();
        m.on_signal(&hold);
        assert!(m.account_snapshot().orders.is_empty());
        // Ignored signals are not counted as rejections.
        assert_eq!(m.signal_counters().signals_rejected, 0);
    }

    #[test]
    fn buy_fill_unfreezes_reservation_and_updates_book() {
        let m = manager();
        m.on_signal(&buy_signal(dec!(10.5), 0));
        let fill = fill_for(&m, Side::Buy, dec!(10.5));
        m.on_fill(&fill);

        let account = m.account_snapshot();
        assert_eq!(account.frozen_cash, Decimal::ZERO);
        assert_eq!(account.positions["600000.SH"].quantity, 4700);
        // 1_000_000 - (4700 * 10.5 + 5)
        assert_eq!(account.cash, dec!(1_000_000) - dec!(49_350) - dec!(5));
        assert_eq!(account.fills.len(), 1);
        assert_eq!(account.trades.len(), 1);
    }

    #[test]
    fn full_round_trip_closes_trade() {
        let m = manager();
        m.on_signal(&buy_signal(dec!(10.0), 0));
        m.on_fill(&fill_for(&m, Side::Buy, dec!(10.0)));
        m.on_signal(&sell_signal(dec!(11.0), 1));
        m.on_fill(&fill_for(&m, Side::Sell, dec!(11.0)));

        let account = m.account_snapshot();
        assert!(account.positions.is_empty());
        assert_eq!(account.trades.len(), 1);
        assert!(account.trades[0].is_closed());
        // (11 - 10) * 5000 - 10 commission
        assert_eq!(account.total_realized_pnl, dec!(4990));
        assert_eq!(m.portfolio_stats().position_count, 0);
    }

    #[test]
    fn release_reservation_for_dead_order() {
        let m = manager();
        m.on_signal(&buy_signal(dec!(10.5), 0));
        let account = m.account_snapshot();
        let order_id = *account.orders.keys().next().unwrap();
        assert!(account.frozen_cash > Decimal::ZERO);

        m.release_reservation(order_id);
        assert_eq!(m.account_snapshot().frozen_cash, Decimal::ZERO);
    }

    #[test]
    fn stats_use_last_known_prices() {
        let m = manager();
        m.on_signal(&buy_signal(dec!(10.0), 0));
        m.on_fill(&fill_for(&m, Side::Buy, dec!(10.0)));

        // A later signal updates the mark without trading.
        let mark = Signal::new(
            "s2",
            "600000.SH",
            SignalDirection::Hold,
            0.0,
            ts(5),
            dec!(12.0),
            "mark",
        )
        .unwrap();
        m.on_signal(&mark);

        let stats = m.portfolio_stats();
        assert_eq!(stats.position_count, 1);
        assert_eq!(stats.unrealized_pnl, dec!(2) * dec!(5000));
    }
}

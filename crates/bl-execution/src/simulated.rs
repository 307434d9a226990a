use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use bl_engine::{EventBus, EventHandler};
use bl_types::{
    BlResult, Event, EventKind, ExecutionConfig, Fill, Order, OrderError, OrderId, OrderStatus,
    Side,
};

use crate::ExecutionEngine;

/// Simulated broker used in backtests.
///
/// Every submitted order fills in one step at the reference price adjusted
/// by an adverse uniform slippage draw, with commission
/// `max(notional * rate, min_commission)`. The slippage RNG is seedable so
/// a backtest replays byte-identical fills.
pub struct SimulatedExecution {
    config: ExecutionConfig,
    bus: Arc<EventBus>,
    active_orders: Mutex<HashMap<OrderId, Order>>,
    rng: Mutex<ChaCha8Rng>,
}

impl SimulatedExecution {
    pub fn new(bus: Arc<EventBus>, config: ExecutionConfig) -> Arc<Self> {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        info!(
            slippage = %config.slippage,
            commission_rate = %config.commission_rate,
            "simulated execution initialized"
        );
        Arc::new(Self {
            config,
            bus,
            active_orders: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        })
    }

    /// Subscribe to the ORDER stream.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        bus.register(EventKind::Order, Arc::clone(self) as Arc<dyn EventHandler>);
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders.lock().len()
    }

    /// Reference price with a uniform adverse slippage draw, rounded to
    /// two decimals: buys slip up, sells slip down.
    fn fill_price(&self, order: &Order) -> Decimal {
        if self.config.slippage.is_zero() {
            return order.price;
        }
        let bound = self.config.slippage.to_f64().unwrap_or(0.0);
        let draw: f64 = self.rng.lock().gen_range(-bound..=bound);
        let adverse = match order.side {
            Side::Buy => draw.abs(),
            Side::Sell => -draw.abs(),
        };
        let factor = Decimal::ONE + Decimal::from_f64_retain(adverse).unwrap_or(Decimal::ZERO);
        (order.price * factor).round_dp(2)
    }

    fn commission(&self, quantity: i64, price: Decimal) -> Decimal {
        let commission = Decimal::from(quantity) * price * self.config.commission_rate;
        commission.max(self.config.min_commission)
    }

    fn execute(&self, mut order: Order) -> BlResult<()> {
        info!(%order, "executing order");

        // Event-time stamping keeps backtests reproducible.
        let at = order.created_time;
        order.submit(at)?;
        self.active_orders.lock().insert(order.order_id, order.clone());

        if self.config.execution_delay_seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(self.config.execution_delay_seconds));
        }

        let price = self.fill_price(&order);
        let commission = self.commission(order.quantity, price);
        let fill = Fill::new(
            order.order_id,
            order.symbol.clone(),
            order.side,
            order.quantity,
            price,
            commission,
            at,
            order.strategy_id.clone(),
        )?;

        order.fill(order.quantity, price, at)?;
        self.active_orders.lock().remove(&order.order_id);

        info!(%fill, "fill emitted");
        self.bus.publish(Event::fill(fill));
        Ok(())
    }
}

impl ExecutionEngine for SimulatedExecution {
    fn submit(&self, order: Order) -> BlResult<()> {
        self.execute(order)
    }

    fn cancel(&self, order_id: OrderId) -> BlResult<()> {
        let mut active = self.active_orders.lock();
        match active.get_mut(&order_id) {
            None => {
                warn!(%order_id, "cancel of unknown or completed order");
                Err(OrderError::NotFound {
                    order_id: order_id.to_string(),
                }
                .into())
            }
            Some(order) => {
                order.cancel()?;
                active.remove(&order_id);
                info!(%order_id, "order cancelled");
                Ok(())
            }
        }
    }

    fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.active_orders.lock().get(&order_id).map(|o| o.status)
    }
}

impl EventHandler for SimulatedExecution {
    fn name(&self) -> &str {
        "simulated-execution"
    }

    fn handle_event(&self, event: &Event) {
        if let Event::Order { order, .. } = event {
            if let Err(err) = self.execute(order.clone()) {
                error!(error = %err, order_id = %order.order_id, "order execution failed");
            }
        }
    }
}

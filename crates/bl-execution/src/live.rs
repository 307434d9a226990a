use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use bl_engine::{EventBus, EventHandler};
use bl_types::{
    BlResult, Event, EventKind, ExecutionConfig, Fill, Order, OrderError, OrderId, OrderStatus,
};

use crate::ExecutionEngine;

/// Venue adapter behind the live engine. A real implementation wraps a
/// broker API; [`PaperBroker`] fills at the limit price for sandbox runs.
pub trait Broker: Send + Sync {
    /// Hand the order to the venue. `Some(fill)` means it executed
    /// immediately; `None` leaves it resting.
    fn place_order(&self, order: &Order) -> BlResult<Option<Fill>>;

    fn cancel_order(&self, order_id: OrderId) -> BlResult<()>;
}

/// Sandbox broker: every order fills in full at its limit price.
pub struct PaperBroker {
    pub commission_rate: Decimal,
    pub min_commission: Decimal,
}

impl PaperBroker {
    pub fn new(commission_rate: Decimal, min_commission: Decimal) -> Arc<Self> {
        Arc::new(Self {
            commission_rate,
            min_commission,
        })
    }
}

impl Broker for PaperBroker {
    fn place_order(&self, order: &Order) -> BlResult<Option<Fill>> {
        let notional = order.notional();
        let commission = (notional * self.commission_rate).max(self.min_commission);
        let fill = Fill::new(
            order.order_id,
            order.symbol.clone(),
            order.side,
            order.quantity,
            order.price,
            commission,
            chrono::Utc::now(),
            order.strategy_id.clone(),
        )?;
        Ok(Some(fill))
    }

    fn cancel_order(&self, _order_id: OrderId) -> BlResult<()> {
        Ok(())
    }
}

struct DailyCounter {
    date: Option<NaiveDate>,
    count: u32,
}

/// Live execution engine: the same order lifecycle as the simulated one,
/// with pre-submit gates on order notional and daily order count (the
/// count resets on date rollover). Orders failing a gate are marked
/// REJECTED and never reach the broker.
pub struct LiveExecution {
    config: ExecutionConfig,
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    active_orders: Mutex<HashMap<OrderId, Order>>,
    daily: Mutex<DailyCounter>,
}

impl LiveExecution {
    pub fn new(bus: Arc<EventBus>, broker: Arc<dyn Broker>, config: ExecutionConfig) -> Arc<Self> {
        info!(
            max_order_value = %config.max_order_value,
            max_daily_orders = config.max_daily_orders,
            "live execution initialized"
        );
        Arc::new(Self {
            config,
            bus,
            broker,
            active_orders: Mutex::new(HashMap::new()),
            daily: Mutex::new(DailyCounter {
                date: None,
                count: 0,
            }),
        })
    }

    /// Subscribe to the ORDER stream.
    pub fn register(self: &Arc<Self>, bus: &EventBus) {
        bus.register(EventKind::Order, Arc::clone(self) as Arc<dyn EventHandler>);
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders.lock().len()
    }

    fn risk_check(&self, order: &Order) -> Result<(), String> {
        let notional = order.notional();
        if notional > self.config.max_order_value {
            return Err(format!(
                "order notional {} exceeds limit {}",
                notional, self.config.max_order_value
            ));
        }

        let mut daily = self.daily.lock();
        let today = order.created_time.date_naive();
        if daily.date != Some(today) {
            daily.date = Some(today);
            daily.count = 0;
        }
        if daily.count >= self.config.max_daily_orders {
            return Err(format!(
                "daily order count {} at limit {}",
                daily.count, self.config.max_daily_orders
            ));
        }
        daily.count += 1;
        Ok(())
    }

    fn execute(&self, mut order: Order) -> BlResult<()> {
        info!(%order, "live order received");

        if let Err(reason) = self.risk_check(&order) {
            warn!(order_id = %order.order_id, %reason, "order rejected by pre-submit gate");
            order.reject()?;
            return Err(OrderError::Rejected { reason }.into());
        }

        order.submit(chrono::Utc::now())?;
        self.active_orders.lock().insert(order.order_id, order.clone());

        match self.broker.place_order(&order)? {
            Some(fill) => {
                let mut active = self.active_orders.lock();
                if let Some(tracked) = active.get_mut(&order.order_id) {
                    tracked.fill(fill.quantity, fill.price, fill.timestamp)?;
                    if tracked.is_filled() {
                        active.remove(&order.order_id);
                    }
                }
                drop(active);
                info!(%fill, "live fill emitted");
                self.bus.publish(Event::fill(fill));
            }
            None => {
                info!(order_id = %order.order_id, "order resting at broker");
            }
        }
        Ok(())
    }
}

impl ExecutionEngine for LiveExecution {
    fn submit(&self, order: Order) -> BlResult<()> {
        self.execute(order)
    }

    fn cancel(&self, order_id: OrderId) -> BlResult<()> {
        let mut active = self.active_orders.lock();
        match active.get_mut(&order_id) {
            None => Err(OrderError::NotFound {
                order_id: order_id.to_string(),
            }
            .into()),
            Some(order) => {
                order.cancel()?;
                self.broker.cancel_order(order_id)?;
                active.remove(&order_id);
                info!(%order_id, "live order cancelled");
                Ok(())
            }
        }
    }

    fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.active_orders.lock().get(&order_id).map(|o| o.status)
    }
}

impl EventHandler for LiveExecution {
    fn name(&self) -> &str {
        "live-execution"
    }

    fn handle_event(&self, event: &Event) {
        if let Event::Order { order, .. } = event {
            if let Err(err) = self.execute(order.clone()) {
                error!(error = %err, order_id = %order.order_id, "live order failed");
            }
        }
    }
}

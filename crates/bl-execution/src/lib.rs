pub mod live;
pub mod simulated;

use bl_types::{BlResult, Order, OrderId, OrderStatus};

pub use live::{Broker, LiveExecution, PaperBroker};
pub use simulated::SimulatedExecution;

/// Execution venue seam: the two engines (simulated and live) share this
/// small surface so the rest of the pipeline does not care which is wired.
pub trait ExecutionEngine: Send + Sync {
    /// Take ownership of an order and drive it through its lifecycle.
    fn submit(&self, order: Order) -> BlResult<()>;

    /// Cancel an active order; only valid from SUBMITTED or
    /// PARTIALLY_FILLED.
    fn cancel(&self, order_id: OrderId) -> BlResult<()>;

    /// Status of an order still known to the engine.
    fn order_status(&self, order_id: OrderId) -> Option<OrderStatus>;
}

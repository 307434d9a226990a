pub mod bus;
pub mod timer;

pub use bus::{BusStats, EventBus, EventHandler};
pub use timer::{Timer, TimerManager};

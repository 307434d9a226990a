pub mod handler;
pub mod source;
pub mod store;

pub use handler::{BacktestDataHandler, DataHandler};
pub use source::{DataSource, KlineRow};
pub use store::BusinessStore;

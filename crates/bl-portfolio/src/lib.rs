pub mod manager;

pub use manager::{PortfolioRiskManager, PortfolioStats, SignalCounters};

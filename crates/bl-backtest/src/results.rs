use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use bl_portfolio::{PortfolioStats, SignalCounters};
use bl_strategy::StrategyManagerStats;

/// Aggregated outcome of a backtest run, serializable for reporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResults {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub trading_days: usize,
    pub initial_capital: Decimal,
    /// Cash plus positions marked at their last known prices.
    pub final_value: Decimal,
    pub total_return: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_commission: Decimal,
    pub realized_pnl: Decimal,
    pub portfolio: PortfolioStats,
    pub strategies: StrategyManagerStats,
    pub signals: SignalCounters,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub dispatch_errors: u64,
}

impl fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backtest {} .. {} ({} trading days)", self.start, self.end, self.trading_days)?;
        writeln!(f, "  initial capital : {}", self.initial_capital)?;
        writeln!(f, "  final value     : {}", self.final_value)?;
        writeln!(
            f,
            "  total return    : {:.2}%",
            self.total_return * Decimal::from(100)
        )?;
        writeln!(
            f,
            "  trades          : {} (won {}, lost {}, win rate {:.1}%)",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate * 100.0
        )?;
        writeln!(f, "  commission      : {}", self.total_commission)?;
        writeln!(f, "  realized pnl    : {}", self.realized_pnl)?;
        write!(
            f,
            "  events          : {} dispatched, {} dropped, {} errors",
            self.events_dispatched, self.events_dropped, self.dispatch_errors
        )
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{BlError, BlResult};

/// Runtime environment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Backtest,
    LiveTrading,
}

/// Execution-engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum adverse slippage fraction applied at simulated fills.
    pub slippage: Decimal,
    /// Commission as a fraction of traded notional.
    pub commission_rate: Decimal,
    /// Floor on the commission per fill.
    pub min_commission: Decimal,
    /// Artificial delay between submit and fill, in seconds.
    pub execution_delay_seconds: f64,
    /// Live gate: maximum notional of a single order.
    pub max_order_value: Decimal,
    /// Live gate: maximum orders per trading day.
    pub max_daily_orders: u32,
    /// Seed for the slippage RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage: Decimal::new(1, 3),         // 0.1%
            commission_rate: Decimal::new(3, 4),  // 0.03%
            min_commission: Decimal::from(5),
            execution_delay_seconds: 0.0,
            max_order_value: Decimal::from(1_000_000),
            max_daily_orders: 100,
            rng_seed: None,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> BlResult<()> {
        if self.slippage < Decimal::ZERO || self.slippage > Decimal::new(5, 2) {
            return Err(BlError::Config(format!(
                "slippage {} outside [0, 0.05]",
                self.slippage
            )));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate > Decimal::new(1, 2) {
            return Err(BlError::Config(format!(
                "commission_rate {} outside [0, 0.01]",
                self.commission_rate
            )));
        }
        if self.min_commission < Decimal::ZERO {
            return Err(BlError::Config(format!(
                "min_commission {} is negative",
                self.min_commission
            )));
        }
        if self.execution_delay_seconds < 0.0 {
            return Err(BlError::Config(format!(
                "execution_delay_seconds {} is negative",
                self.execution_delay_seconds
            )));
        }
        Ok(())
    }
}

/// How the portfolio sizes a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSizeMethod {
    FixedAmount,
    PercentOfPortfolio,
    SignalStrength,
}

/// Portfolio / risk-manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Cap on a single position as a fraction of total account value.
    pub max_position_pct: Decimal,
    /// Cap on all positions as a fraction of total account value.
    pub max_total_position_pct: Decimal,
    /// Orders below this notional are rejected.
    pub min_order_amount: Decimal,
    pub position_size_method: PositionSizeMethod,
    /// Target notional used by fixed-amount and strength sizing.
    pub default_position_size: Decimal,
    /// Window in which identical `(strategy, symbol, direction)` signals
    /// are suppressed.
    pub signal_cooldown_seconds: u64,
    /// Extra fraction reserved on top of the order notional for fees.
    pub commission_slack: Decimal,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            max_position_pct: Decimal::new(5, 2),        // 5%
            max_total_position_pct: Decimal::new(95, 2), // 95%
            min_order_amount: Decimal::from(1000),
            position_size_method: PositionSizeMethod::FixedAmount,
            default_position_size: Decimal::from(10_000),
            signal_cooldown_seconds: 300,
            commission_slack: Decimal::new(1, 3), // 0.1%
        }
    }
}

impl PortfolioConfig {
    pub fn validate(&self) -> BlResult<()> {
        if self.max_position_pct <= Decimal::ZERO || self.max_position_pct > Decimal::ONE {
            return Err(BlError::Config(format!(
                "max_position_pct {} outside (0, 1]",
                self.max_position_pct
            )));
        }
        if self.max_total_position_pct <= Decimal::ZERO
            || self.max_total_position_pct > Decimal::ONE
        {
            return Err(BlError::Config(format!(
                "max_total_position_pct {} outside (0, 1]",
                self.max_total_position_pct
            )));
        }
        if self.min_order_amount < Decimal::ZERO {
            return Err(BlError::Config(format!(
                "min_order_amount {} is negative",
                self.min_order_amount
            )));
        }
        if self.default_position_size <= Decimal::ZERO {
            return Err(BlError::Config(format!(
                "default_position_size {} is not positive",
                self.default_position_size
            )));
        }
        Ok(())
    }
}

/// Event-bus queue sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub central_queue_size: usize,
    pub subscriber_queue_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            central_queue_size: 10_000,
            subscriber_queue_size: 1_000,
        }
    }
}

impl EventBusConfig {
    pub fn validate(&self) -> BlResult<()> {
        if self.central_queue_size == 0 || self.subscriber_queue_size == 0 {
            return Err(BlError::Config("queue sizes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Top-level application configuration. Parsing a file into this struct is
/// the caller's concern; validation is ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: Environment,
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_business_db_path")]
    pub business_db_path: PathBuf,
    pub initial_capital: Decimal,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_business_db_path() -> PathBuf {
    PathBuf::from("data/business.json")
}

impl AppConfig {
    pub fn backtest(initial_capital: Decimal) -> Self {
        Self {
            env: Environment::Backtest,
            data_root: default_data_root(),
            business_db_path: default_business_db_path(),
            initial_capital,
            execution: ExecutionConfig::default(),
            portfolio: PortfolioConfig::default(),
            event_bus: EventBusConfig::default(),
        }
    }

    pub fn validate(&self) -> BlResult<()> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(BlError::Config(format!(
                "initial_capital {} is not positive",
                self.initial_capital
            )));
        }
        self.execution.validate()?;
        self.portfolio.validate()?;
        self.event_bus.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_validate() {
        AppConfig::backtest(dec!(1_000_000)).validate().unwrap();
    }

    #[test]
    fn bad_capital_rejected() {
        let config = AppConfig::backtest(Decimal::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn slippage_range_enforced() {
        let mut config = AppConfig::backtest(dec!(100_000));
        config.execution.slippage = dec!(0.06);
        assert!(config.validate().is_err());
        config.execution.slippage = dec!(0.05);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn position_pct_range_enforced() {
        let mut config = AppConfig::backtest(dec!(100_000));
        config.portfolio.max_position_pct = Decimal::ZERO;
        assert!(config.validate().is_err());
        config.portfolio.max_position_pct = dec!(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_json_round_trip() {
        let config = AppConfig::backtest(dec!(1_000_000));
        let json = serde_json::to_string(&config).unwrap();
        let restored: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{"env": "backtest", "initial_capital": "500000"}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.initial_capital, dec!(500_000));
        assert_eq!(config.event_bus.central_queue_size, 10_000);
        assert_eq!(
            config.portfolio.position_size_method,
            PositionSizeMethod::FixedAmount
        );
    }
}

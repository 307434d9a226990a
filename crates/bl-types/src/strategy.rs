use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::errors::{BlError, BlResult};

/// Kind of a strategy, deciding which symbols it watches on each bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Opens positions: watches the configured universe minus what it holds.
    Entry,
    /// Closes its own positions: watches symbols it opened.
    Exit,
    /// Forced stop: watches every symbol held in the account.
    UniversalStop,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Entry => "entry",
            StrategyKind::Exit => "exit",
            StrategyKind::UniversalStop => "universal_stop",
        };
        write!(f, "{}", s)
    }
}

/// Configuration of one strategy instance: identity, kind, enablement and a
/// free-form options map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInstance {
    pub strategy_id: String,
    pub name: String,
    pub kind: StrategyKind,
    pub enabled: bool,
    pub config: HashMap<String, Value>,
}

impl StrategyInstance {
    pub fn new(
        strategy_id: impl Into<String>,
        name: impl Into<String>,
        kind: StrategyKind,
    ) -> BlResult<Self> {
        let strategy_id = strategy_id.into();
        let name = name.into();
        if strategy_id.is_empty() {
            return Err(BlError::Validation("empty strategy id".to_string()));
        }
        if name.is_empty() {
            return Err(BlError::Validation("empty strategy name".to_string()));
        }
        Ok(Self {
            strategy_id,
            name,
            kind,
            enabled: true,
            config: HashMap::new(),
        })
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn option_f64(&self, key: &str, default: f64) -> f64 {
        self.config
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn option_usize(&self, key: &str, default: usize) -> usize {
        self.config
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn option_decimal(&self, key: &str, default: Decimal) -> Decimal {
        self.config
            .get(key)
            .and_then(Value::as_f64)
            .and_then(Decimal::from_f64)
            .unwrap_or(default)
    }

    /// String-array option, used for per-strategy symbol universes.
    pub fn option_symbols(&self, key: &str) -> Vec<String> {
        self.config
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for StrategyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Strategy({}[{}] {})",
            self.name,
            self.kind,
            if self.enabled { "enabled" } else { "disabled" }
        )
    }
}

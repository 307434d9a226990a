use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

use bl_data::DataHandler;
use bl_engine::EventBus;
use bl_portfolio::PortfolioRiskManager;
use bl_types::{BlError, BlResult, EventKind, StrategyInstance, StrategyKind};

use crate::base::{SignalGenerator, StrategyHandler};

/// Per-strategy statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub kind: StrategyKind,
    pub active: bool,
    pub signals_emitted: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Registry-wide statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyManagerStats {
    pub total_strategies: usize,
    pub active_strategies: usize,
    pub details: HashMap<String, StrategyStats>,
}

/// Registry of strategies: rejects duplicate ids, wires each strategy to
/// the bus, and holds a non-owning reference to the portfolio so handlers
/// can read positions without an ownership cycle.
pub struct StrategyManager {
    bus: Arc<EventBus>,
    portfolio: Weak<PortfolioRiskManager>,
    strategies: Mutex<HashMap<String, Arc<StrategyHandler>>>,
}

impl StrategyManager {
    pub fn new(bus: Arc<EventBus>, portfolio: &Arc<PortfolioRiskManager>) -> Self {
        Self {
            bus,
            portfolio: Arc::downgrade(portfolio),
            strategies: Mutex::new(HashMap::new()),
        }
    }

    /// Create a handler for the instance and subscribe it to MARKET events.
    pub fn register_strategy(
        &self,
        instance: StrategyInstance,
        generator: Box<dyn SignalGenerator>,
        data: Arc<dyn DataHandler>,
    ) -> BlResult<Arc<StrategyHandler>> {
        let mut strategies = self.strategies.lock();
        if strategies.contains_key(&instance.strategy_id) {
            warn!(strategy_id = %instance.strategy_id, "duplicate strategy id rejected");
            return Err(BlError::Validation(format!(
                "strategy already registered: {}",
                instance.strategy_id
            )));
        }

        let strategy_id = instance.strategy_id.clone();
        let handler = StrategyHandler::new(
            instance,
            generator,
            data,
            Weak::clone(&self.portfolio),
            Arc::clone(&self.bus),
        );
        self.bus.register(EventKind::Market, handler.clone());
        strategies.insert(strategy_id.clone(), Arc::clone(&handler));
        info!(%strategy_id, total = strategies.len(), "strategy registered");
        Ok(handler)
    }

    pub fn get(&self, strategy_id: &str) -> Option<Arc<StrategyHandler>> {
        self.strategies.lock().get(strategy_id).cloned()
    }

    pub fn activate(&self, strategy_id: &str) -> bool {
        match self.get(strategy_id) {
            Some(handler) => {
                handler.activate();
                true
            }
            None => false,
        }
    }

    pub fn deactivate(&self, strategy_id: &str) -> bool {
        match self.get(strategy_id) {
            Some(handler) => {
                handler.deactivate();
                true
            }
            None => false,
        }
    }

    pub fn activate_all(&self) {
        let strategies = self.strategies.lock();
        for handler in strategies.values() {
            handler.activate();
        }
        info!(count = strategies.len(), "all strategies activated");
    }

    pub fn deactivate_all(&self) {
        let strategies = self.strategies.lock();
        for handler in strategies.values() {
            handler.deactivate();
        }
        info!("all strategies deactivated");
    }

    pub fn len(&self) -> usize {
        self.strategies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.lock().is_empty()
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.lock().keys().cloned().collect()
    }

    pub fn statistics(&self) -> StrategyManagerStats {
        let strategies = self.strategies.lock();
        let details: HashMap<String, StrategyStats> = strategies
            .iter()
            .map(|(id, handler)| {
                (
                    id.clone(),
                    StrategyStats {
                        kind: handler.kind(),
                        active: handler.is_active(),
                        signals_emitted: handler.signals_emitted(),
                        last_update: handler.last_update(),
                    },
                )
            })
            .collect();
        StrategyManagerStats {
            total_strategies: details.len(),
            active_strategies: details.values().filter(|s| s.active).count(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::StrategyContext;
    use bl_data::BacktestDataHandler;
    use bl_types::{
        Account, Bar, Calendar, EventBusConfig, PortfolioConfig, Signal, Universe,
    };
    use rust_decimal_macros::dec;

    struct Quiet;

    impl SignalGenerator for Quiet {
        fn generate(&self, _ctx: &StrategyContext<'_>, _bar: &Bar) -> Vec<Signal> {
            Vec::new()
        }
    }

    fn setup() -> (StrategyManager, Arc<dyn DataHandler>) {
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        let account = Account::new("test", dec!(1_000_000)).unwrap();
        let portfolio =
            PortfolioRiskManager::new(account, Arc::clone(&bus), PortfolioConfig::default());
        let data: Arc<dyn DataHandler> = Arc::new(BacktestDataHandler::new(
            Calendar::default(),
            Universe::new("default", "2024-03-01T00:00:00Z".parse().unwrap()),
        ));
        (StrategyManager::new(bus, &portfolio), data)
    }

    fn instance(id: &str, kind: StrategyKind) -> StrategyInstance {
        StrategyInstance::new(id, "Test", kind).unwrap()
    }

    #[test]
    fn duplicate_ids_rejected() {
        let (manager, data) = setup();
        manager
            .register_strategy(
                instance("s1", StrategyKind::Entry),
                Box::new(Quiet),
                Arc::clone(&data),
            )
            .unwrap();
        let dup = manager.register_strategy(
            instance("s1", StrategyKind::Exit),
            Box::new(Quiet),
            data,
        );
        assert!(dup.is_err());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn activate_and_deactivate() {
        let (manager, data) = setup();
        manager
            .register_strategy(instance("s1", StrategyKind::Entry), Box::new(Quiet), data)
            .unwrap();

        assert!(manager.deactivate("s1"));
        assert!(!manager.get("s1").unwrap().is_active());
        assert!(manager.activate("s1"));
        assert!(manager.get("s1").unwrap().is_active());
        assert!(!manager.activate("missing"));
    }

    #[test]
    fn statistics_reflect_registry() {
        let (manager, data) = setup();
        manager
            .register_strategy(
                instance("entry", StrategyKind::Entry),
                Box::new(Quiet),
                Arc::clone(&data),
            )
            .unwrap();
        manager
            .register_strategy(instance("exit", StrategyKind::Exit), Box::new(Quiet), data)
            .unwrap();
        manager.deactivate("exit");

        let stats = manager.statistics();
        assert_eq!(stats.total_strategies, 2);
        assert_eq!(stats.active_strategies, 1);
        assert_eq!(stats.details["entry"].kind, StrategyKind::Entry);
        assert!(!stats.details["exit"].active);
        assert_eq!(stats.details["entry"].signals_emitted, 0);
    }

    #[test]
    fn bulk_toggle() {
        let (manager, data) = setup();
        manager
            .register_strategy(
                instance("a", StrategyKind::Entry),
                Box::new(Quiet),
                Arc::clone(&data),
            )
            .unwrap();
        manager
            .register_strategy(instance("b", StrategyKind::Exit), Box::new(Quiet), data)
            .unwrap();

        manager.deactivate_all();
        assert_eq!(manager.statistics().active_strategies, 0);
        manager.activate_all();
        assert_eq!(manager.statistics().active_strategies, 2);
    }
}

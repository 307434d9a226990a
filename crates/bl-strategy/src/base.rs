use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use bl_data::DataHandler;
use bl_engine::{EventBus, EventHandler};
use bl_portfolio::PortfolioRiskManager;
use bl_types::{Bar, Event, Signal, StrategyInstance, StrategyKind};

/// Read-only context handed to a signal generator for one bar.
pub struct StrategyContext<'a> {
    pub instance: &'a StrategyInstance,
    pub data: &'a dyn DataHandler,
    pub portfolio: &'a PortfolioRiskManager,
}

/// The algorithm body of a strategy: given a bar for a watched symbol,
/// produce zero or more signals. Implementations are stateless between
/// bars; everything they need comes from the context.
pub trait SignalGenerator: Send + Sync {
    fn generate(&self, ctx: &StrategyContext<'_>, bar: &Bar) -> Vec<Signal>;
}

/// Bus adapter around one strategy instance: filters MARKET events by the
/// kind-dependent watch set, runs the generator, and publishes every valid
/// signal. Activation toggles signal generation without unsubscribing.
pub struct StrategyHandler {
    name: String,
    instance: StrategyInstance,
    generator: Box<dyn SignalGenerator>,
    data: Arc<dyn DataHandler>,
    portfolio: Weak<PortfolioRiskManager>,
    bus: Arc<EventBus>,
    active: AtomicBool,
    signals_emitted: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl StrategyHandler {
    pub fn new(
        instance: StrategyInstance,
        generator: Box<dyn SignalGenerator>,
        data: Arc<dyn DataHandler>,
        portfolio: Weak<PortfolioRiskManager>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let active = instance.enabled;
        info!(strategy_id = %instance.strategy_id, kind = %instance.kind, "strategy initialized");
        Arc::new(Self {
            name: format!("strategy-{}", instance.strategy_id),
            instance,
            generator,
            data,
            portfolio,
            bus,
            active: AtomicBool::new(active),
            signals_emitted: AtomicU64::new(0),
            last_update: Mutex::new(None),
        })
    }

    pub fn strategy_id(&self) -> &str {
        &self.instance.strategy_id
    }

    pub fn kind(&self) -> StrategyKind {
        self.instance.kind
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
        info!(strategy_id = %self.instance.strategy_id, "strategy activated");
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        info!(strategy_id = %self.instance.strategy_id, "strategy deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn signals_emitted(&self) -> u64 {
        self.signals_emitted.load(Ordering::Relaxed)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.lock()
    }

    /// Symbols this strategy inspects on the current bar, by kind:
    /// ENTRY watches its configured universe minus what it already holds,
    /// EXIT watches what it opened, UNIVERSAL_STOP watches every holding.
    pub fn watch_symbols(&self, portfolio: &PortfolioRiskManager) -> BTreeSet<String> {
        let positions = portfolio.positions_snapshot();
        let own_positions = || {
            positions
                .iter()
                .filter(|(_, p)| p.strategy_id.as_deref() == Some(self.strategy_id()))
                .map(|(symbol, _)| symbol.clone())
                .collect::<BTreeSet<String>>()
        };

        match self.instance.kind {
            StrategyKind::Entry => {
                let held = own_positions();
                self.instance
                    .option_symbols("universe")
                    .into_iter()
                    .filter(|symbol| !held.contains(symbol))
                    .collect()
            }
            StrategyKind::Exit => own_positions(),
            StrategyKind::UniversalStop => positions.keys().cloned().collect(),
        }
    }

    fn on_market(&self, bar: &Bar) {
        let Some(portfolio) = self.portfolio.upgrade() else {
            warn!(strategy_id = %self.instance.strategy_id, "portfolio gone, market event ignored");
            return;
        };

        if !self.watch_symbols(&portfolio).contains(&bar.symbol) {
            return;
        }

        let ctx = StrategyContext {
            instance: &self.instance,
            data: self.data.as_ref(),
            portfolio: portfolio.as_ref(),
        };
        let signals = self.generator.generate(&ctx, bar);

        for signal in signals {
            if signal.is_valid() {
                debug!(%signal, "signal published");
                self.signals_emitted.fetch_add(1, Ordering::Relaxed);
                self.bus.publish(Event::signal(signal));
            } else {
                warn!(%signal, "generator produced invalid signal, dropped");
            }
        }
        *self.last_update.lock() = Some(bar.timestamp);
    }
}

impl EventHandler for StrategyHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_event(&self, event: &Event) {
        if !self.is_active() {
            return;
        }
        if let Event::Market { bar, .. } = event {
            self.on_market(bar);
        }
    }
}

use chrono::{Duration, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use bl_data::{BacktestDataHandler, DataHandler, DataSource};
use bl_engine::EventBus;
use bl_execution::SimulatedExecution;
use bl_portfolio::PortfolioRiskManager;
use bl_strategy::{SignalGenerator, StrategyHandler, StrategyManager};
use bl_types::{
    Account, AppConfig, BacktestError, Bar, BlResult, Calendar, Event, Frequency,
    StrategyInstance, Universe,
};

use crate::results::BacktestResults;

/// How long the driver waits for the pipeline to drain between days.
const QUIESCENCE_DEADLINE: StdDuration = StdDuration::from_secs(5);

/// Deterministic day-by-day replay driver.
///
/// Owns and wires all components; each trading day it advances the data
/// cursor, replays that day's bar per symbol as MARKET events, and blocks
/// until the bus is quiescent so day `d + 1` observes every effect of day
/// `d`.
pub struct BacktestEngine {
    start: NaiveDate,
    end: NaiveDate,
    universe: Vec<String>,
    initial_capital: Decimal,
    bus: Arc<EventBus>,
    data: Arc<BacktestDataHandler>,
    executor: Arc<SimulatedExecution>,
    portfolio: Arc<PortfolioRiskManager>,
    strategies: StrategyManager,
    running: AtomicBool,
    completed: AtomicBool,
    days_run: AtomicUsize,
}

impl BacktestEngine {
    /// Validate configuration and date range, then wire every component.
    pub fn new(
        config: &AppConfig,
        calendar: Calendar,
        start: NaiveDate,
        end: NaiveDate,
        universe: Vec<String>,
    ) -> BlResult<Self> {
        config.validate()?;
        if start >= end {
            return Err(BacktestError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }
        if universe.is_empty() {
            warn!("backtest universe is empty, no market events will be produced");
        }

        let bus = Arc::new(EventBus::new(config.event_bus.clone()));
        let data = Arc::new(BacktestDataHandler::new(
            calendar,
            Universe::with_symbols(
                "backtest",
                universe.iter().cloned(),
                start.and_time(NaiveTime::MIN).and_utc(),
            ),
        ));

        let account = Account::new("backtest_account", config.initial_capital)?;
        let portfolio =
            PortfolioRiskManager::new(account, Arc::clone(&bus), config.portfolio.clone());
        portfolio.register(&bus);

        let executor = SimulatedExecution::new(Arc::clone(&bus), config.execution.clone());
        executor.register(&bus);

        let strategies = StrategyManager::new(Arc::clone(&bus), &portfolio);

        info!(
            %start,
            %end,
            symbols = universe.len(),
            initial_capital = %config.initial_capital,
            "backtest engine wired"
        );
        Ok(Self {
            start,
            end,
            universe,
            initial_capital: config.initial_capital,
            bus,
            data,
            executor,
            portfolio,
            strategies,
            running: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            days_run: AtomicUsize::new(0),
        })
    }

    pub fn add_strategy(
        &self,
        instance: StrategyInstance,
        generator: Box<dyn SignalGenerator>,
    ) -> BlResult<Arc<StrategyHandler>> {
        self.strategies.register_strategy(
            instance,
            generator,
            Arc::clone(&self.data) as Arc<dyn DataHandler>,
        )
    }

    /// Advisory preload of the backtest window from a data source.
    pub fn prepare_data(&self, source: &dyn DataSource, frequency: Frequency) -> BlResult<usize> {
        self.data.load_from_source(
            source,
            &self.universe,
            frequency,
            self.start.and_time(NaiveTime::MIN).and_utc(),
            self.end.and_time(NaiveTime::MIN).and_utc(),
        )
    }

    /// Inject bars directly instead of going through a data source.
    pub fn insert_bars(&self, bars: impl IntoIterator<Item = Bar>) {
        self.data.insert_bars(bars);
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn portfolio(&self) -> &Arc<PortfolioRiskManager> {
        &self.portfolio
    }

    pub fn executor(&self) -> &Arc<SimulatedExecution> {
        &self.executor
    }

    pub fn data_handler(&self) -> &Arc<BacktestDataHandler> {
        &self.data
    }

    pub fn strategy_manager(&self) -> &StrategyManager {
        &self.strategies
    }

    /// Walk the calendar, replaying each trading day and waiting for
    /// quiescence before advancing. Components stop in reverse order.
    pub fn run(&self) -> BlResult<()> {
        if self.completed.load(Ordering::Acquire) {
            return Err(BacktestError::AlreadyCompleted.into());
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BacktestError::AlreadyRunning.into());
        }
        if self.strategies.is_empty() {
            warn!("no strategies registered, replay will produce no signals");
        }

        info!("backtest starting");
        self.bus.start();
        self.strategies.activate_all();

        let mut day = self.start;
        let mut days_run = 0usize;
        while day <= self.end {
            if !self.data.is_trading_day(day) {
                day += Duration::days(1);
                continue;
            }

            let cursor = day.and_time(NaiveTime::MIN).and_utc();
            self.data.set_current_time(cursor);

            let mut published = 0usize;
            for symbol in &self.universe {
                if let Some(bar) = self.data.get_latest_bar(symbol, Frequency::Daily) {
                    if bar.timestamp.date_naive() == day {
                        self.bus.publish(Event::market(bar));
                        published += 1;
                    }
                }
            }

            if !self.bus.wait_until_idle(QUIESCENCE_DEADLINE) {
                warn!(%day, "quiescence deadline reached before the day fully drained");
            }

            days_run += 1;
            if days_run % 10 == 0 {
                info!(
                    %day,
                    published,
                    total_value = %self.portfolio.portfolio_stats().total_value,
                    "backtest progress"
                );
            }
            day += Duration::days(1);
        }

        self.strategies.deactivate_all();
        self.bus.stop();
        self.portfolio.release_all_reservations();
        self.days_run.store(days_run, Ordering::Release);
        self.completed.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
        info!(days_run, "backtest finished");
        Ok(())
    }

    /// Aggregate the run into a serializable result snapshot.
    pub fn get_results(&self) -> BacktestResults {
        let account = self.portfolio.account_snapshot();
        let portfolio_stats = self.portfolio.portfolio_stats();

        let total_trades = account.trades.len();
        let winning_trades = account
            .trades
            .iter()
            .filter(|t| t.is_closed() && t.realized_pnl > Decimal::ZERO)
            .count();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let final_value = portfolio_stats.total_value;
        let total_return = (final_value - self.initial_capital) / self.initial_capital;
        let bus_stats = self.bus.stats();

        BacktestResults {
            start: self.start,
            end: self.end,
            trading_days: self.days_run.load(Ordering::Acquire),
            initial_capital: self.initial_capital,
            final_value,
            total_return,
            total_trades,
            winning_trades,
            losing_trades: total_trades - winning_trades,
            win_rate,
            total_commission: account.total_commission,
            realized_pnl: account.total_realized_pnl,
            portfolio: portfolio_stats,
            strategies: self.strategies.statistics(),
            signals: self.portfolio.signal_counters(),
            events_dispatched: bus_stats.events_dispatched,
            events_dropped: bus_stats.events_dropped,
            dispatch_errors: bus_stats.dispatch_errors,
        }
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use bl_types::{Bar, BlResult, Calendar, Frequency, Universe};

use crate::source::DataSource;

/// Read-only bar access honoring a movable current-time cursor.
///
/// Every read is clamped to the cursor so consumers can never observe data
/// from the future of the simulation. Implementations are shared across
/// strategy workers and must be `Send + Sync`.
pub trait DataHandler: Send + Sync {
    /// Advance the cursor. Must be monotonic non-decreasing within a run;
    /// a backwards move is ignored with a warning.
    fn set_current_time(&self, at: DateTime<Utc>);

    fn current_time(&self) -> Option<DateTime<Utc>>;

    /// Bars for the given symbols in `[start, min(end, cursor)]`,
    /// ascending by timestamp, symbols interleaved in request order.
    fn get_bars(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
    ) -> Vec<Bar>;

    /// Most recent bar at or before the cursor, if any.
    fn get_latest_bar(&self, symbol: &str, frequency: Frequency) -> Option<Bar>;

    /// Last `count` bars per symbol at or before the cursor, oldest first.
    fn get_latest_bars(
        &self,
        symbols: &[String],
        frequency: Frequency,
        count: usize,
    ) -> HashMap<String, Vec<Bar>>;

    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Named universe snapshot for the date.
    fn get_universe(&self, date: NaiveDate) -> Vec<String>;
}

type BarSeries = BTreeMap<DateTime<Utc>, Bar>;

/// In-memory data handler used for backtests.
///
/// Bars are preloaded (from a [`DataSource`] or injected directly) into
/// per-symbol time-ordered maps; all reads clamp to the cursor.
pub struct BacktestDataHandler {
    calendar: Calendar,
    cursor: RwLock<Option<DateTime<Utc>>>,
    bars: RwLock<HashMap<(String, Frequency), BarSeries>>,
    universe: RwLock<Universe>,
}

impl BacktestDataHandler {
    pub fn new(calendar: Calendar, universe: Universe) -> Self {
        Self {
            calendar,
            cursor: RwLock::new(None),
            bars: RwLock::new(HashMap::new()),
            universe: RwLock::new(universe),
        }
    }

    pub fn set_universe(&self, universe: Universe) {
        *self.universe.write() = universe;
    }

    /// Inject bars directly, keeping them ordered per `(symbol, frequency)`.
    pub fn insert_bars(&self, bars: impl IntoIterator<Item = Bar>) {
        let mut store = self.bars.write();
        let mut inserted = 0usize;
        for bar in bars {
            store
                .entry((bar.symbol.clone(), bar.frequency))
                .or_default()
                .insert(bar.timestamp, bar);
            inserted += 1;
        }
        debug!(inserted, "bars inserted into backtest store");
    }

    /// Advisory preload from a data source for the requested window.
    pub fn load_from_source(
        &self,
        source: &dyn DataSource,
        symbols: &[String],
        frequency: Frequency,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BlResult<usize> {
        let rows = source.fetch_kline(symbols, frequency, start, end)?;
        let mut loaded = 0usize;
        let mut store = self.bars.write();
        for row in rows {
            match row.into_bar(frequency) {
                Ok(bar) => {
                    store
                        .entry((bar.symbol.clone(), bar.frequency))
                        .or_default()
                        .insert(bar.timestamp, bar);
                    loaded += 1;
                }
                Err(err) => {
                    warn!(error = %err, "skipping invalid kline row");
                }
            }
        }
        info!(
            loaded,
            symbols = symbols.len(),
            %frequency,
            "preloaded bars into memory"
        );
        Ok(loaded)
    }

    fn effective_end(&self, end: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cursor.read().map(|cursor| end.min(cursor))
    }
}

impl DataHandler for BacktestDataHandler {
    fn set_current_time(&self, at: DateTime<Utc>) {
        let mut cursor = self.cursor.write();
        match *cursor {
            Some(current) if at < current => {
                warn!(
                    requested = %at,
                    current = %current,
                    "non-monotonic cursor move ignored"
                );
            }
            _ => *cursor = Some(at),
        }
    }

    fn current_time(&self) -> Option<DateTime<Utc>> {
        *self.cursor.read()
    }

    fn get_bars(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
    ) -> Vec<Bar> {
        let Some(end) = self.effective_end(end) else {
            warn!("current time cursor is unset, returning no bars");
            return Vec::new();
        };
        if start > end {
            return Vec::new();
        }

        let store = self.bars.read();
        let mut result = Vec::new();
        for symbol in symbols {
            if let Some(series) = store.get(&(symbol.clone(), frequency)) {
                result.extend(series.range(start..=end).map(|(_, bar)| bar.clone()));
            }
        }
        result
    }

    fn get_latest_bar(&self, symbol: &str, frequency: Frequency) -> Option<Bar> {
        let cursor = (*self.cursor.read())?;
        let store = self.bars.read();
        store
            .get(&(symbol.to_string(), frequency))
            .and_then(|series| series.range(..=cursor).next_back())
            .map(|(_, bar)| bar.clone())
    }

    fn get_latest_bars(
        &self,
        symbols: &[String],
        frequency: Frequency,
        count: usize,
    ) -> HashMap<String, Vec<Bar>> {
        let mut result = HashMap::new();
        let Some(cursor) = *self.cursor.read() else {
            warn!("current time cursor is unset, returning no bars");
            return result;
        };

        let store = self.bars.read();
        for symbol in symbols {
            let bars = store
                .get(&(symbol.clone(), frequency))
                .map(|series| {
                    let mut recent: Vec<Bar> = series
                        .range(..=cursor)
                        .rev()
                        .take(count)
                        .map(|(_, bar)| bar.clone())
                        .collect();
                    recent.reverse();
                    recent
                })
                .unwrap_or_default();
            result.insert(symbol.clone(), bars);
        }
        result
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.calendar.is_trading_day(date)
    }

    fn get_universe(&self, _date: NaiveDate) -> Vec<String> {
        self.universe.read().symbols()
    }
}

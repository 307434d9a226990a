//! Synthetic end-to-end demo: random-walk bars through the full pipeline.
//!
//! Run with `cargo run --bin backtest-demo`; set `RUST_LOG=debug` for the
//! event-level trace.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tracing::info;

use bl_backtest::BacktestEngine;
use bl_data::{DataSource, KlineRow};
use bl_strategy::MaCrossStrategy;
use bl_types::{AppConfig, BlResult, Calendar, Frequency, StrategyInstance, StrategyKind};

/// Bar feed backed by a seeded random walk, one independent path per symbol.
struct RandomWalkSource {
    symbols: Vec<String>,
    seed: u64,
}

impl DataSource for RandomWalkSource {
    fn list_symbols(&self) -> BlResult<Vec<String>> {
        Ok(self.symbols.clone())
    }

    fn fetch_kline(
        &self,
        symbols: &[String],
        _frequency: Frequency,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BlResult<Vec<KlineRow>> {
        let calendar = Calendar::default();
        let days = calendar.trading_days_between(start.date_naive(), end.date_naive());

        let mut rows = Vec::new();
        for (index, symbol) in symbols.iter().enumerate() {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(index as u64));
            let mut close = 10.0 + index as f64 * 5.0;
            for day in &days {
                let open = close;
                close *= 1.0 + rng.gen_range(-0.02..=0.02);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..=0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..=0.01));
                let volume: i64 = rng.gen_range(500_000..2_000_000);

                let to_price =
                    |value: f64| Decimal::from_f64_retain(value).unwrap_or_default().round_dp(2);
                let close_price = to_price(close);
                rows.push(KlineRow {
                    symbol: symbol.clone(),
                    datetime: day.and_time(NaiveTime::MIN).and_utc(),
                    open: to_price(open),
                    high: to_price(high),
                    low: to_price(low),
                    close: close_price,
                    volume,
                    amount: close_price * Decimal::from(volume),
                    turnover: None,
                });
            }
        }
        Ok(rows)
    }
}

fn ma_instance(id: &str, kind: StrategyKind, universe: &[String]) -> Result<StrategyInstance> {
    let instance = StrategyInstance::new(id, format!("MA Cross ({})", kind), kind)?
        .with_option("universe", serde_json::json!(universe))
        .with_option("short_window", serde_json::json!(5))
        .with_option("long_window", serde_json::json!(20))
        .with_option("stop_loss_pct", serde_json::json!(0.05))
        .with_option("take_profit_pct", serde_json::json!(0.10))
        .with_option("universal_stop_pct", serde_json::json!(0.08));
    Ok(instance)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let universe: Vec<String> = ["600000.SH", "000001.SZ", "300750.SZ"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let start: NaiveDate = "2024-01-01".parse()?;
    let end: NaiveDate = "2024-06-28".parse()?;

    let mut config = AppConfig::backtest(Decimal::from(1_000_000));
    config.execution.rng_seed = Some(42);
    config.portfolio.default_position_size = Decimal::from(50_000);

    let engine = BacktestEngine::new(&config, Calendar::default(), start, end, universe.clone())
        .context("engine setup failed")?;

    let source = RandomWalkSource {
        symbols: universe.clone(),
        seed: 7,
    };
    let loaded = engine.prepare_data(&source, Frequency::Daily)?;
    info!(loaded, "synthetic bars loaded");

    for (id, kind) in [
        ("ma_entry", StrategyKind::Entry),
        ("ma_exit", StrategyKind::Exit),
        ("forced_stop", StrategyKind::UniversalStop),
    ] {
        let instance = ma_instance(id, kind, &universe)?;
        let generator = Box::new(MaCrossStrategy::from_instance(&instance));
        engine.add_strategy(instance, generator)?;
    }

    engine.run().context("backtest run failed")?;

    let results = engine.get_results();
    println!("{}", results);
    println!(
        "portfolio: {}",
        serde_json::to_string_pretty(&results.portfolio)?
    );

    let account = engine.portfolio().account_snapshot();
    for trade in account.trades.iter().filter(|t| t.is_closed()) {
        println!("closed: {}", trade);
    }
    Ok(())
}

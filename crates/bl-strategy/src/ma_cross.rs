use rust_decimal::Decimal;
use tracing::debug;

use bl_types::{Bar, Position, Signal, SignalDirection, StrategyInstance, StrategyKind};

use crate::base::{SignalGenerator, StrategyContext};

/// Double moving-average crossover strategy.
///
/// As an ENTRY strategy it buys golden crosses; as an EXIT strategy it
/// sells on stop-loss, take-profit or a death cross in profit; as a
/// UNIVERSAL_STOP it force-sells past a drawdown threshold.
pub struct MaCrossStrategy {
    short_window: usize,
    long_window: usize,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    universal_stop_pct: Decimal,
}

impl MaCrossStrategy {
    pub fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short_window,
            long_window,
            stop_loss_pct: Decimal::new(5, 2),
            take_profit_pct: Decimal::new(10, 2),
            universal_stop_pct: Decimal::new(8, 2),
        }
    }

    /// Read the strategy parameters from an instance's options map.
    pub fn from_instance(instance: &StrategyInstance) -> Self {
        Self {
            short_window: instance.option_usize("short_window", 5),
            long_window: instance.option_usize("long_window", 20),
            stop_loss_pct: instance.option_decimal("stop_loss_pct", Decimal::new(5, 2)),
            take_profit_pct: instance.option_decimal("take_profit_pct", Decimal::new(10, 2)),
            universal_stop_pct: instance.option_decimal("universal_stop_pct", Decimal::new(8, 2)),
        }
    }

    /// Closes of the last `count` bars up to and including the current bar.
    fn recent_closes(&self, ctx: &StrategyContext<'_>, bar: &Bar, count: usize) -> Vec<Decimal> {
        ctx.data
            .get_latest_bars(&[bar.symbol.clone()], bar.frequency, count)
            .remove(&bar.symbol)
            .unwrap_or_default()
            .iter()
            .map(|b| b.close)
            .collect()
    }

    /// Current and previous-bar values of the short and long averages, when
    /// enough history exists for both.
    fn crossover_state(
        &self,
        ctx: &StrategyContext<'_>,
        bar: &Bar,
    ) -> Option<(Decimal, Decimal, Decimal, Decimal)> {
        let closes = self.recent_closes(ctx, bar, self.long_window + 1);
        if closes.len() < self.long_window + 1 {
            return None;
        }
        let short = sma(&closes, self.short_window)?;
        let long = sma(&closes, self.long_window)?;
        let prev = &closes[..closes.len() - 1];
        let prev_short = sma(prev, self.short_window)?;
        let prev_long = sma(prev, self.long_window)?;
        Some((short, long, prev_short, prev_long))
    }

    fn entry_signal(&self, ctx: &StrategyContext<'_>, bar: &Bar) -> Option<Signal> {
        let (short, long, prev_short, prev_long) = self.crossover_state(ctx, bar)?;

        // Golden cross with the close confirming above the short average.
        if prev_short <= prev_long && short > long && bar.close > short {
            let signal = Signal::new(
                ctx.instance.strategy_id.clone(),
                bar.symbol.clone(),
                SignalDirection::Buy,
                0.8,
                bar.timestamp,
                bar.close,
                format!(
                    "golden cross: short ma {:.2} > long ma {:.2}, close {:.2}",
                    short, long, bar.close
                ),
            )
            .ok()?;
            return Some(signal);
        }
        None
    }

    fn exit_signal(
        &self,
        ctx: &StrategyContext<'_>,
        bar: &Bar,
        position: &Position,
    ) -> Option<Signal> {
        let pnl_pct = position.unrealized_pnl_pct(bar.close);
        let sell = |strength: f64, reason: String| {
            Signal::new(
                ctx.instance.strategy_id.clone(),
                bar.symbol.clone(),
                SignalDirection::Sell,
                strength,
                bar.timestamp,
                bar.close,
                reason,
            )
            .ok()
        };

        if pnl_pct <= -self.stop_loss_pct {
            return sell(
                1.0,
                format!(
                    "stop loss: pnl {:.2}%, cost {:.2}, close {:.2}",
                    pnl_pct * Decimal::from(100),
                    position.avg_price,
                    bar.close
                ),
            );
        }

        if pnl_pct >= self.take_profit_pct {
            return sell(
                0.9,
                format!(
                    "take profit: pnl {:.2}%, cost {:.2}, close {:.2}",
                    pnl_pct * Decimal::from(100),
                    position.avg_price,
                    bar.close
                ),
            );
        }

        if pnl_pct > Decimal::ZERO {
            if let Some((short, long, prev_short, prev_long)) = self.crossover_state(ctx, bar) {
                if prev_short >= prev_long && short < long {
                    return sell(
                        0.7,
                        format!(
                            "death cross in profit: pnl {:.2}%, short ma {:.2} < long ma {:.2}",
                            pnl_pct * Decimal::from(100),
                            short,
                            long
                        ),
                    );
                }
            }
        }
        None
    }

    fn universal_stop_signal(
        &self,
        ctx: &StrategyContext<'_>,
        bar: &Bar,
        position: &Position,
    ) -> Option<Signal> {
        let pnl_pct = position.unrealized_pnl_pct(bar.close);
        if pnl_pct <= -self.universal_stop_pct {
            return Signal::new(
                ctx.instance.strategy_id.clone(),
                bar.symbol.clone(),
                SignalDirection::Sell,
                1.0,
                bar.timestamp,
                bar.close,
                format!(
                    "forced stop: pnl {:.2}% beyond threshold {:.2}%",
                    pnl_pct * Decimal::from(100),
                    self.universal_stop_pct * Decimal::from(100)
                ),
            )
            .ok();
        }
        None
    }
}

impl SignalGenerator for MaCrossStrategy {
    fn generate(&self, ctx: &StrategyContext<'_>, bar: &Bar) -> Vec<Signal> {
        let signal = match ctx.instance.kind {
            StrategyKind::Entry => self.entry_signal(ctx, bar),
            StrategyKind::Exit => match ctx.portfolio.position(&bar.symbol) {
                Some(position) if !position.is_empty() => self.exit_signal(ctx, bar, &position),
                _ => None,
            },
            StrategyKind::UniversalStop => match ctx.portfolio.position(&bar.symbol) {
                Some(position) if !position.is_empty() => {
                    self.universal_stop_signal(ctx, bar, &position)
                }
                _ => None,
            },
        };

        if signal.is_none() {
            debug!(symbol = %bar.symbol, kind = %ctx.instance.kind, "no signal");
        }
        signal.into_iter().collect()
    }
}

/// Simple moving average over the trailing `window` values.
fn sma(values: &[Decimal], window: usize) -> Option<Decimal> {
    if window == 0 || values.len() < window {
        return None;
    }
    let sum: Decimal = values[values.len() - window..].iter().copied().sum();
    Some(sum / Decimal::from(window as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_data::{BacktestDataHandler, DataHandler};
    use bl_engine::EventBus;
    use bl_portfolio::PortfolioRiskManager;
    use bl_types::{
        Account, Calendar, EventBusConfig, Fill, Frequency, PortfolioConfig, Side, Universe,
    };
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    const SYMBOL: &str = "600000.SH";

    fn ts(day: i64) -> DateTime<Utc> {
        let base: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        base + Duration::days(day - 1)
    }

    fn bar_at(day: i64, close: Decimal) -> Bar {
        Bar::new(
            SYMBOL,
            ts(day),
            Frequency::Daily,
            close,
            close,
            close,
            close,
            1_000,
            close * Decimal::from(1000),
        )
        .unwrap()
    }

    struct Fixture {
        data: Arc<BacktestDataHandler>,
        portfolio: Arc<PortfolioRiskManager>,
        instance: StrategyInstance,
    }

    impl Fixture {
        fn new(kind: StrategyKind, closes: &[Decimal], cost: Option<Decimal>) -> Self {
            let data = Arc::new(BacktestDataHandler::new(
                Calendar::default(),
                Universe::with_symbols("default", [SYMBOL], ts(1)),
            ));
            data.insert_bars(
                closes
                    .iter()
                    .enumerate()
                    .map(|(i, close)| bar_at(i as i64 + 1, *close)),
            );
            data.set_current_time(ts(closes.len() as i64));

            let mut account = Account::new("test", dec!(1_000_000)).unwrap();
            if let Some(cost) = cost {
                let fill = Fill::new(
                    Uuid::new_v4(),
                    SYMBOL,
                    Side::Buy,
                    1000,
                    cost,
                    Decimal::ZERO,
                    ts(1),
                    Some("s1".to_string()),
                )
                .unwrap();
                account.apply_fill(&fill).unwrap();
            }
            let bus = Arc::new(EventBus::new(EventBusConfig::default()));
            let portfolio = PortfolioRiskManager::new(account, bus, PortfolioConfig::default());

            let instance = StrategyInstance::new("s1", "MA Cross", kind)
                .unwrap()
                .with_option("universe", serde_json::json!([SYMBOL]));
            Self {
                data,
                portfolio,
                instance,
            }
        }

        fn generate(&self, bar: &Bar) -> Vec<Signal> {
            let strategy = MaCrossStrategy::from_instance(&self.instance);
            let ctx = StrategyContext {
                instance: &self.instance,
                data: self.data.as_ref(),
                portfolio: self.portfolio.as_ref(),
            };
            strategy.generate(&ctx, bar)
        }
    }

    fn flat_then_rise() -> Vec<Decimal> {
        let mut closes = vec![dec!(10.0); 20];
        closes.push(dec!(10.1));
        closes
    }

    #[test]
    fn golden_cross_produces_buy() {
        let closes = flat_then_rise();
        let fixture = Fixture::new(StrategyKind::Entry, &closes, None);
        let signals = fixture.generate(&bar_at(21, dec!(10.1)));

        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, SignalDirection::Buy);
        assert_eq!(signal.strength, 0.8);
        assert_eq!(signal.price, dec!(10.1));
        assert!(signal.reason.contains("golden cross"));
    }

    #[test]
    fn no_cross_after_the_crossing_bar() {
        let mut closes = flat_then_rise();
        closes.push(dec!(10.2));
        let fixture = Fixture::new(StrategyKind::Entry, &closes, None);
        // The previous short average is already above the long one.
        let signals = fixture.generate(&bar_at(22, dec!(10.2)));
        assert!(signals.is_empty());
    }

    #[test]
    fn insufficient_history_produces_nothing() {
        let closes = vec![dec!(10.0); 10];
        let fixture = Fixture::new(StrategyKind::Entry, &closes, None);
        assert!(fixture.generate(&bar_at(10, dec!(10.0))).is_empty());
    }

    #[test]
    fn flat_series_produces_nothing() {
        let closes = vec![dec!(10.0); 30];
        let fixture = Fixture::new(StrategyKind::Entry, &closes, None);
        assert!(fixture.generate(&bar_at(30, dec!(10.0))).is_empty());
    }

    #[test]
    fn stop_loss_fires_at_threshold() {
        let closes = vec![dec!(10.0), dec!(9.49)];
        let fixture = Fixture::new(StrategyKind::Exit, &closes, Some(dec!(10.0)));
        let signals = fixture.generate(&bar_at(2, dec!(9.49)));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, SignalDirection::Sell);
        assert_eq!(signals[0].strength, 1.0);
        assert!(signals[0].reason.contains("stop loss"));
    }

    #[test]
    fn take_profit_fires_at_threshold() {
        let closes = vec![dec!(10.0), dec!(11.01)];
        let fixture = Fixture::new(StrategyKind::Exit, &closes, Some(dec!(10.0)));
        let signals = fixture.generate(&bar_at(2, dec!(11.01)));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strength, 0.9);
        assert!(signals[0].reason.contains("take profit"));
    }

    #[test]
    fn small_move_produces_no_exit() {
        let closes = vec![dec!(10.0), dec!(10.2)];
        let fixture = Fixture::new(StrategyKind::Exit, &closes, Some(dec!(10.0)));
        assert!(fixture.generate(&bar_at(2, dec!(10.2))).is_empty());
    }

    #[test]
    fn death_cross_in_profit_fires() {
        // Flat, a spike, then a slide: the short average crosses below the
        // long one on the final bar while the position is still in profit.
        let mut closes = vec![dec!(10.0); 20];
        closes.push(dec!(12.0));
        closes.push(dec!(9.0));
        closes.push(dec!(9.0));
        closes.push(dec!(9.0));
        let fixture = Fixture::new(StrategyKind::Exit, &closes, Some(dec!(8.5)));
        let signals = fixture.generate(&bar_at(24, dec!(9.0)));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strength, 0.7);
        assert!(signals[0].reason.contains("death cross"));
    }

    #[test]
    fn universal_stop_fires_past_threshold() {
        let closes = vec![dec!(10.0), dec!(9.19)];
        let fixture = Fixture::new(StrategyKind::UniversalStop, &closes, Some(dec!(10.0)));
        let signals = fixture.generate(&bar_at(2, dec!(9.19)));

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].strength, 1.0);
        assert!(signals[0].reason.contains("forced stop"));

        // A softer drawdown is left to the ordinary exit strategy.
        let closes = vec![dec!(10.0), dec!(9.4)];
        let fixture = Fixture::new(StrategyKind::UniversalStop, &closes, Some(dec!(10.0)));
        assert!(fixture.generate(&bar_at(2, dec!(9.4))).is_empty());
    }

    #[test]
    fn exit_without_position_is_silent() {
        let closes = vec![dec!(10.0), dec!(9.0)];
        let fixture = Fixture::new(StrategyKind::Exit, &closes, None);
        assert!(fixture.generate(&bar_at(2, dec!(9.0))).is_empty());
    }
}

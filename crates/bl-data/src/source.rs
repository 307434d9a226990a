use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bl_types::{Bar, BlResult, Frequency};

/// One raw kline row as delivered by an upstream vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineRow {
    pub symbol: String,
    pub datetime: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub amount: Decimal,
    pub turnover: Option<f64>,
}

impl KlineRow {
    /// Validate and convert into a [`Bar`] at the given frequency.
    pub fn into_bar(self, frequency: Frequency) -> BlResult<Bar> {
        let bar = Bar::new(
            self.symbol,
            self.datetime,
            frequency,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.amount,
        )?;
        Ok(match self.turnover {
            Some(turnover) => bar.with_turnover(turnover),
            None => bar,
        })
    }
}

/// Upstream bar provider. Implementations wrap vendor APIs or local files;
/// the core only consumes this read surface when preloading.
pub trait DataSource: Send + Sync {
    fn list_symbols(&self) -> BlResult<Vec<String>>;

    fn fetch_kline(
        &self,
        symbols: &[String],
        frequency: Frequency,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BlResult<Vec<KlineRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn row_converts_to_bar() {
        let row = KlineRow {
            symbol: "600000.SH".to_string(),
            datetime: "2024-03-01T00:00:00Z".parse().unwrap(),
            open: dec!(10.0),
            high: dec!(10.4),
            low: dec!(9.9),
            close: dec!(10.2),
            volume: 12_000,
            amount: dec!(122_400),
            turnover: Some(0.013),
        };
        let bar = row.into_bar(Frequency::Daily).unwrap();
        assert_eq!(bar.close, dec!(10.2));
        assert_eq!(bar.turnover, 0.013);
    }

    #[test]
    fn invalid_row_rejected() {
        let row = KlineRow {
            symbol: "600000.SH".to_string(),
            datetime: "2024-03-01T00:00:00Z".parse().unwrap(),
            open: dec!(10.0),
            high: dec!(9.0),
            low: dec!(9.9),
            close: dec!(10.2),
            volume: 12_000,
            amount: dec!(122_400),
            turnover: None,
        };
        assert!(row.into_bar(Frequency::Daily).is_err());
    }
}

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Trading calendar: weekday rule plus an explicit holiday set, with the
/// A-share intraday sessions 09:30-11:30 and 13:00-15:00.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub market: String,
    pub morning_start: NaiveTime,
    pub morning_end: NaiveTime,
    pub afternoon_start: NaiveTime,
    pub afternoon_end: NaiveTime,
    pub holidays: HashSet<NaiveDate>,
}

impl Default for Calendar {
    fn default() -> Self {
        Self {
            market: "A_SHARE".to_string(),
            morning_start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            morning_end: NaiveTime::from_hms_opt(11, 30, 0).unwrap(),
            afternoon_start: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            afternoon_end: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            holidays: HashSet::new(),
        }
    }
}

impl Calendar {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            ..Self::default()
        }
    }

    pub fn add_holiday(&mut self, date: NaiveDate) {
        self.holidays.insert(date);
    }

    pub fn remove_holiday(&mut self, date: NaiveDate) {
        self.holidays.remove(&date);
    }

    /// Monday through Friday, excluding holidays.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        !self.holidays.contains(&date)
    }

    /// Whether the instant falls inside a trading session on a trading day.
    pub fn is_trading_time(&self, at: DateTime<Utc>) -> bool {
        if !self.is_trading_day(at.date_naive()) {
            return false;
        }
        let t = at.time();
        (self.morning_start <= t && t <= self.morning_end)
            || (self.afternoon_start <= t && t <= self.afternoon_end)
    }

    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut next = date + Duration::days(1);
        while !self.is_trading_day(next) {
            next += Duration::days(1);
        }
        next
    }

    pub fn prev_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut prev = date - Duration::days(1);
        while !self.is_trading_day(prev) {
            prev -= Duration::days(1);
        }
        prev
    }

    /// All trading days in `[start, end]`, ascending.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = start;
        while current <= end {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Calendar({}, {} holidays)",
            self.market,
            self.holidays.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn weekends_are_not_trading_days() {
        let cal = Calendar::default();
        assert!(cal.is_trading_day(date("2024-03-01"))); // Friday
        assert!(!cal.is_trading_day(date("2024-03-02"))); // Saturday
        assert!(!cal.is_trading_day(date("2024-03-03"))); // Sunday
        assert!(cal.is_trading_day(date("2024-03-04"))); // Monday
    }

    #[test]
    fn holidays_are_skipped() {
        let mut cal = Calendar::default();
        cal.add_holiday(date("2024-03-04"));
        assert!(!cal.is_trading_day(date("2024-03-04")));
        assert_eq!(cal.next_trading_day(date("2024-03-01")), date("2024-03-05"));
        cal.remove_holiday(date("2024-03-04"));
        assert!(cal.is_trading_day(date("2024-03-04")));
    }

    #[test]
    fn prev_trading_day_skips_weekend() {
        let cal = Calendar::default();
        assert_eq!(cal.prev_trading_day(date("2024-03-04")), date("2024-03-01"));
    }

    #[test]
    fn trading_days_between_counts_weekdays() {
        let cal = Calendar::default();
        let days = cal.trading_days_between(date("2024-03-01"), date("2024-03-08"));
        assert_eq!(days.len(), 6); // Fri + Mon..Fri
        assert_eq!(days[0], date("2024-03-01"));
        assert_eq!(days[5], date("2024-03-08"));
    }

    #[test]
    fn trading_time_sessions() {
        let cal = Calendar::default();
        let morning: DateTime<Utc> = "2024-03-01T10:00:00Z".parse().unwrap();
        let lunch: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        let afternoon: DateTime<Utc> = "2024-03-01T14:30:00Z".parse().unwrap();
        let evening: DateTime<Utc> = "2024-03-01T16:00:00Z".parse().unwrap();
        assert!(cal.is_trading_time(morning));
        assert!(!cal.is_trading_time(lunch));
        assert!(cal.is_trading_time(afternoon));
        assert!(!cal.is_trading_time(evening));
    }
}

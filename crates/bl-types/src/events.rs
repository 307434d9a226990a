use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::market::Bar;
use crate::orders::{Fill, Order};
use crate::signal::Signal;

/// Event type tag, used by subscribers to register for a subset of traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Market,
    Signal,
    Order,
    Fill,
    Timer,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Market,
        EventKind::Signal,
        EventKind::Order,
        EventKind::Fill,
        EventKind::Timer,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Market => "market",
            EventKind::Signal => "signal",
            EventKind::Order => "order",
            EventKind::Fill => "fill",
            EventKind::Timer => "timer",
        };
        write!(f, "{}", s)
    }
}

/// Value-typed event flowing through the bus: produced, dispatched and
/// consumed without shared mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Market {
        timestamp: DateTime<Utc>,
        symbol: String,
        bar: Bar,
    },
    Signal {
        timestamp: DateTime<Utc>,
        signal: Signal,
    },
    Order {
        timestamp: DateTime<Utc>,
        order: Order,
    },
    Fill {
        timestamp: DateTime<Utc>,
        fill: Fill,
    },
    Timer {
        timestamp: DateTime<Utc>,
        timer_id: String,
        interval: Duration,
    },
}

impl Event {
    pub fn market(bar: Bar) -> Self {
        Event::Market {
            timestamp: bar.timestamp,
            symbol: bar.symbol.clone(),
            bar,
        }
    }

    pub fn signal(signal: Signal) -> Self {
        Event::Signal {
            timestamp: signal.timestamp,
            signal,
        }
    }

    pub fn order(order: Order) -> Self {
        Event::Order {
            timestamp: order.created_time,
            order,
        }
    }

    pub fn fill(fill: Fill) -> Self {
        Event::Fill {
            timestamp: fill.timestamp,
            fill,
        }
    }

    pub fn timer(timer_id: impl Into<String>, interval: Duration, at: DateTime<Utc>) -> Self {
        Event::Timer {
            timestamp: at,
            timer_id: timer_id.into(),
            interval,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Market { .. } => EventKind::Market,
            Event::Signal { .. } => EventKind::Signal,
            Event::Order { .. } => EventKind::Order,
            Event::Fill { .. } => EventKind::Fill,
            Event::Timer { .. } => EventKind::Timer,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Market { timestamp, .. }
            | Event::Signal { timestamp, .. }
            | Event::Order { timestamp, .. }
            | Event::Fill { timestamp, .. }
            | Event::Timer { timestamp, .. } => *timestamp,
        }
    }
}

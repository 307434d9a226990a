use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Named set of tradable symbols with a last-updated timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub name: String,
    pub symbols: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Universe {
    pub fn new(name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            symbols: BTreeSet::new(),
            updated_at,
        }
    }

    pub fn with_symbols<I, S>(name: impl Into<String>, symbols: I, updated_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            symbols: symbols.into_iter().map(Into::into).collect(),
            updated_at,
        }
    }

    pub fn add(&mut self, symbol: impl Into<String>, at: DateTime<Utc>) {
        let symbol = symbol.into();
        if !symbol.is_empty() {
            self.symbols.insert(symbol);
            self.updated_at = at;
        }
    }

    pub fn remove(&mut self, symbol: &str, at: DateTime<Utc>) {
        if self.symbols.remove(symbol) {
            self.updated_at = at;
        }
    }

    /// Replace the whole set in one step.
    pub fn replace<I, S>(&mut self, symbols: I, at: DateTime<Utc>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self.updated_at = at;
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}

impl fmt::Display for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Universe({}: {} symbols)", self.name, self.symbols.len())
    }
}

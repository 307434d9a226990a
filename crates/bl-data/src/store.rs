use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use bl_types::{BlResult, Calendar, StrategyInstance, Universe};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    universes: HashMap<String, Universe>,
    calendars: HashMap<String, Calendar>,
    strategies: HashMap<String, StrategyInstance>,
}

/// JSON-file persistence of named universes, calendars and strategy
/// configurations. Entirely optional for backtests; the schema is this
/// crate's own.
pub struct BusinessStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl BusinessStore {
    /// Open a store at the given path, loading existing content if present.
    pub fn open(path: impl AsRef<Path>) -> BlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreData::default()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &StoreData) -> BlResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn save_universe(&self, universe: Universe) -> BlResult<()> {
        let mut data = self.data.lock();
        info!(name = %universe.name, symbols = universe.len(), "saving universe");
        data.universes.insert(universe.name.clone(), universe);
        self.persist(&data)
    }

    pub fn load_universe(&self, name: &str) -> Option<Universe> {
        self.data.lock().universes.get(name).cloned()
    }

    pub fn save_calendar(&self, name: impl Into<String>, calendar: Calendar) -> BlResult<()> {
        let mut data = self.data.lock();
        data.calendars.insert(name.into(), calendar);
        self.persist(&data)
    }

    pub fn load_calendar(&self, name: &str) -> Option<Calendar> {
        self.data.lock().calendars.get(name).cloned()
    }

    pub fn save_strategy(&self, instance: StrategyInstance) -> BlResult<()> {
        let mut data = self.data.lock();
        data.strategies
            .insert(instance.strategy_id.clone(), instance);
        self.persist(&data)
    }

    pub fn load_strategy(&self, strategy_id: &str) -> Option<StrategyInstance> {
        self.data.lock().strategies.get(strategy_id).cloned()
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.data.lock().strategies.keys().cloned().collect()
    }
}

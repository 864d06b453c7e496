use super::{supersedes, ConfigStore, RunRecord, StoreError};
use chrono::{DateTime, Utc};
use common::model::configuration::Configuration;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Configuration store kept entirely in memory.
///
/// Clones share the same map, so a test can keep a handle and inspect what
/// the orchestrator wrote back.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    configs: Arc<RwLock<BTreeMap<i64, Configuration>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = Configuration>) -> Result<Self, StoreError> {
        let store = Self::new();
        for config in configs {
            store.upsert(&config)?;
        }
        Ok(store)
    }

    /// Simulates an administrative deletion.
    pub fn remove(&self, id: i64) -> Option<Configuration> {
        self.configs.write().ok()?.remove(&id)
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn list_active(&self) -> Result<Vec<Configuration>, StoreError> {
        let configs = self.configs.read().map_err(Self::poisoned)?;
        Ok(configs.values().filter(|c| c.is_active).cloned().collect())
    }

    fn list_all(&self) -> Result<Vec<Configuration>, StoreError> {
        let configs = self.configs.read().map_err(Self::poisoned)?;
        Ok(configs.values().cloned().collect())
    }

    fn get(&self, id: i64) -> Result<Configuration, StoreError> {
        let configs = self.configs.read().map_err(Self::poisoned)?;
        configs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Configuration>, StoreError> {
        let configs = self.configs.read().map_err(Self::poisoned)?;
        Ok(configs.values().find(|c| c.name == name).cloned())
    }

    fn upsert(&self, config: &Configuration) -> Result<(), StoreError> {
        config.validate()?;
        let mut configs = self.configs.write().map_err(Self::poisoned)?;
        configs.insert(config.id, config.clone());
        Ok(())
    }

    fn mark_run(&self, id: i64, at: DateTime<Utc>, record: &RunRecord) -> Result<(), StoreError> {
        let mut configs = self.configs.write().map_err(Self::poisoned)?;
        let config = configs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if supersedes(config.last_run, at) {
            config.last_run = Some(at);
            config.status = Some(record.status);
            config.last_error = record.error.clone();
        }
        Ok(())
    }
}

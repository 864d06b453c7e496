#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::model::configuration::{Configuration, SourceReference, TargetReference};
use orchestrator::executor::{TransferError, TransferExecutor};
use orchestrator::notifier::{Notifier, NotifyError};
use orchestrator::store::{ConfigStore, MemoryConfigStore, RunRecord, StoreError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn config(id: i64, name: &str, frequency: u32, last_run: Option<DateTime<Utc>>) -> Configuration {
    let mut config = Configuration::new(
        id,
        name,
        SourceReference {
            sheet_url: format!("https://docs.google.com/spreadsheets/d/{name}/edit"),
            tab_name: None,
        },
        TargetReference {
            project_id: "reporting".to_string(),
            dataset_id: "sheets".to_string(),
            table_id: name.to_string(),
        },
        frequency,
        Utc::now() - Duration::days(60),
    );
    config.last_run = last_run;
    config
}

/// Wraps a `MemoryConfigStore` and counts what the orchestrator asks of it.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryConfigStore,
    pub mark_runs: Arc<AtomicUsize>,
    pub fail_listing: Arc<AtomicBool>,
    pub fail_writes: Arc<AtomicBool>,
    /// Rows returned verbatim by `list_active`, bypassing validation.
    pub extra_active: Arc<Mutex<Vec<Configuration>>>,
}

impl CountingStore {
    pub fn with_configs(configs: impl IntoIterator<Item = Configuration>) -> Self {
        Self {
            inner: MemoryConfigStore::with_configs(configs).expect("valid configs"),
            ..Self::default()
        }
    }

    pub fn mark_run_count(&self) -> usize {
        self.mark_runs.load(Ordering::SeqCst)
    }
}

impl ConfigStore for CountingStore {
    fn list_active(&self) -> Result<Vec<Configuration>, StoreError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        let mut configs = self.inner.list_active()?;
        configs.extend(self.extra_active.lock().unwrap().iter().cloned());
        configs.sort_by_key(|c| c.id);
        Ok(configs)
    }

    fn list_all(&self) -> Result<Vec<Configuration>, StoreError> {
        self.inner.list_all()
    }

    fn get(&self, id: i64) -> Result<Configuration, StoreError> {
        let extra = self.extra_active.lock().unwrap().iter().find(|c| c.id == id).cloned();
        match extra {
            Some(config) => Ok(config),
            None => self.inner.get(id),
        }
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Configuration>, StoreError> {
        self.inner.find_by_name(name)
    }

    fn upsert(&self, config: &Configuration) -> Result<(), StoreError> {
        self.inner.upsert(config)
    }

    fn mark_run(&self, id: i64, at: DateTime<Utc>, record: &RunRecord) -> Result<(), StoreError> {
        self.mark_runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.mark_run(id, at, record)
    }
}

/// Executor whose behaviour per configuration is scripted by the test.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    pub failing: Arc<Mutex<HashSet<i64>>>,
    pub panicking: Arc<Mutex<HashSet<i64>>>,
    pub delay: std::time::Duration,
    pub calls: Arc<Mutex<Vec<i64>>>,
    pub running: Arc<AtomicUsize>,
    pub max_running: Arc<AtomicUsize>,
    /// Cancelled by the first execution, to simulate an operator interrupt mid-tick.
    pub cancel_on_first_call: Option<CancellationToken>,
    /// Removed from this store during execution, to simulate a deletion mid-tick.
    pub delete_from: Option<MemoryConfigStore>,
}

impl ScriptedExecutor {
    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, id: i64) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn panic_on(&self, id: i64) {
        self.panicking.lock().unwrap().insert(id);
    }

    pub fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferExecutor for ScriptedExecutor {
    async fn execute(&self, config: &Configuration) -> Result<(), TransferError> {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(config.id);
            calls.len() == 1
        };
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if first {
            if let Some(token) = &self.cancel_on_first_call {
                token.cancel();
            }
        }
        if let Some(store) = &self.delete_from {
            store.remove(config.id);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.lock().unwrap().contains(&config.id) {
            panic!("transfer for {} blew up", config.name);
        }
        if self.failing.lock().unwrap().contains(&config.id) {
            return Err(TransferError::Failed(format!("sheet {} not shared", config.name)));
        }
        Ok(())
    }
}

/// Notifier that keeps every message, optionally refusing to deliver them.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub broken: bool,
    /// Never answers, like a chat endpoint that accepts the connection and stalls.
    pub hanging: bool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_failure(&self, config_name: &str, reason: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((config_name.to_string(), reason.to_string()));
        if self.hanging {
            std::future::pending::<()>().await;
        }
        if self.broken {
            return Err(NotifyError::Transport("webhook unreachable".to_string()));
        }
        Ok(())
    }
}

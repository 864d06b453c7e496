//! # Configuration Store
//!
//! Access layer over the table of transfer configurations. The orchestrator
//! only reads active rows and writes back run outcomes through `mark_run`;
//! `upsert` exists for seeding and for the administration side.
//!
//! Two implementations are provided:
//! - `SqliteConfigStore`: the persistent `transfer_configs` table.
//! - `MemoryConfigStore`: an in-process map used by tests and local demos.

mod memory;
mod sqlite;

pub use memory::MemoryConfigStore;
pub use sqlite::SqliteConfigStore;

use chrono::{DateTime, Utc};
use common::model::configuration::{Configuration, RunStatus, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration {0} not found")]
    NotFound(i64),
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("corrupt configuration row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// What `mark_run` writes back for one finished dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub status: RunStatus,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn succeeded() -> Self {
        Self {
            status: RunStatus::Succeeded,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(reason.into()),
        }
    }
}

pub trait ConfigStore: Send + Sync {
    /// Every configuration with `is_active = true`, ordered by id.
    fn list_active(&self) -> Result<Vec<Configuration>, StoreError>;

    /// Every configuration, ordered by id.
    fn list_all(&self) -> Result<Vec<Configuration>, StoreError>;

    fn get(&self, id: i64) -> Result<Configuration, StoreError>;

    /// First configuration (lowest id) carrying `name`.
    fn find_by_name(&self, name: &str) -> Result<Option<Configuration>, StoreError>;

    /// Validates and inserts or replaces a configuration.
    fn upsert(&self, config: &Configuration) -> Result<(), StoreError>;

    /// Records the outcome of a finished dispatch.
    ///
    /// All-or-nothing, and the latest completion wins: when `at` is older than
    /// the stored `last_run` the row is left untouched, so `last_run`, `status`
    /// and `last_error` always describe the same run.
    fn mark_run(&self, id: i64, at: DateTime<Utc>, record: &RunRecord) -> Result<(), StoreError>;
}

/// Whether a completion at `at` is at least as recent as the stored one.
pub(crate) fn supersedes(current: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    match current {
        Some(current) => at >= current,
        None => true,
    }
}

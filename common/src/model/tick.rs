use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to one configuration during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Selected by a dry run; nothing was executed.
    Planned,
    /// Due, but never dispatched: cancelled tick, already running elsewhere,
    /// inactive, or no longer due once its slot came up.
    Skipped { reason: String },
    Succeeded,
    Failed { reason: String },
}

impl JobOutcome {
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            JobOutcome::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// One line of a tick report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEntry {
    pub config_id: i64,
    pub name: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// False when the outcome could not be written back to the configuration store.
    pub recorded: bool,
}

/// Summary of one orchestrator pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Active configurations considered, after any name filter.
    pub active: usize,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_inactive: usize,
    pub skipped_in_flight: usize,
    /// Due in the listing snapshot, but recorded or removed by the time a slot freed up.
    pub skipped_stale: usize,
    pub cancelled: usize,
    pub record_failures: usize,
    pub entries: Vec<TickEntry>,
}

impl TickReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            dry_run,
            active: 0,
            due: 0,
            succeeded: 0,
            failed: 0,
            skipped_inactive: 0,
            skipped_in_flight: 0,
            skipped_stale: 0,
            cancelled: 0,
            record_failures: 0,
            entries: Vec::new(),
        }
    }

    /// Whether an automation gate should treat the tick as clean.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.record_failures == 0
    }

    pub fn entry(&self, config_id: i64) -> Option<&TickEntry> {
        self.entries.iter().find(|e| e.config_id == config_id)
    }
}

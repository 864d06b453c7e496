//! Tracks background jobs started through the HTTP surface.
//!
//! A tick or a manual run requested over HTTP returns a `job_id` right away
//! and keeps running on its own task. Its progress reaches this module as
//! `JobUpdate` messages, so the task never needs write access to the map.
//!
//! The main components are:
//! - `JobsState`: clonable handle on the job map plus the update sender. It is
//!   registered as actix application data in `services::configure_app`.
//! - `JobUpdate`: a status change for one job.
//! - `start_job_updater`: the single writer that applies updates to the map.
//!   Finished jobs are dropped once they are older than the retention window,
//!   so a scheduler polling `POST /api/ticks` forever does not grow the map.

use common::jobs::JobStatus;
use std::time::Duration;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(3600);

/// Latest status of one job and when it reached a final state.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub status: JobStatus,
    pub finished_at: Option<Instant>,
}

/// Shared state of all background jobs.
#[derive(Clone)]
pub struct JobsState {
    /// Job id to its latest status. Read by the status endpoint.
    pub jobs: Arc<RwLock<HashMap<String, TrackedJob>>>,
    /// Background jobs push their status changes here.
    pub tx: mpsc::Sender<JobUpdate>,
    /// How long a finished job stays queryable.
    retention: Duration,
}

/// A status change for one background job.
#[derive(Debug)]
pub struct JobUpdate {
    pub(crate) job_id: String,
    pub(crate) status: JobStatus,
}

impl JobUpdate {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
        }
    }
}

impl JobsState {
    /// Creates the state and the receiving end that `start_job_updater` consumes.
    pub fn new(capacity: usize, retention: Duration) -> (Self, mpsc::Receiver<JobUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        let state = Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tx,
            retention,
        };
        (state, rx)
    }

    /// Allocates a job id and marks it `Pending`.
    pub async fn register(&self) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.write().await.insert(
            job_id.clone(),
            TrackedJob {
                status: JobStatus::Pending,
                finished_at: None,
            },
        );
        job_id
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().await.get(job_id).map(|job| job.status.clone())
    }
}

fn is_final(status: &JobStatus) -> bool {
    matches!(status, JobStatus::Completed(_) | JobStatus::Failed(_))
}

/// Applies every `JobUpdate` received on `rx` until all senders are gone.
///
/// Spawn once per `JobsState`, as `main.rs` does before starting the server.
pub async fn start_job_updater(state: JobsState, mut rx: mpsc::Receiver<JobUpdate>) {
    while let Some(update) = rx.recv().await {
        let now = Instant::now();
        let mut jobs = state.jobs.write().await;
        let finished_at = is_final(&update.status).then_some(now);
        jobs.insert(
            update.job_id,
            TrackedJob {
                status: update.status,
                finished_at,
            },
        );
        jobs.retain(|_, job| match job.finished_at {
            Some(at) => now.duration_since(at) <= state.retention,
            None => true,
        });
    }
}

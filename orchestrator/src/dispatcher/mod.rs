//! # Orchestrator
//!
//! One tick selects the due configurations, runs each through the transfer
//! executor under a concurrency cap and writes every outcome back to the
//! configuration store.
//!
//! ## Tick workflow
//!
//! 1.  **Listing**: active configurations are read from the store. A store
//!     failure here ends the tick before anything is dispatched.
//! 2.  **Selection**: the optional name filter is applied, then `schedule::is_due`
//!     against the injected `now`. The due set is a snapshot, so one tick never
//!     runs the same configuration twice.
//! 3.  **Dry run**: the due set is reported as `Planned` and the tick ends. No
//!     executor call, no store write.
//! 4.  **Dispatch**: each due configuration waits for one of `max_parallel`
//!     slots, is claimed in the `InFlight` set (shared with overlapping ticks)
//!     and is spawned. A cancelled tick stops dispatching; queued configurations
//!     are reported as skipped while running ones finish.
//! 5.  **Confirmation**: once claimed, the row is read again. Another tick may
//!     have run it since the listing; if it is no longer due (or was removed)
//!     the job is skipped as stale.
//! 6.  **Completion**: every finished job calls `mark_run` with its completion
//!     time, independently of its siblings, then notifies on failure. The
//!     notification has its own ceiling so a hung channel cannot hold a slot.
//!
//! Per job the states are `Due -> Running -> {Succeeded, Failed}`. There are
//! no retries; a configuration that failed is still overdue on the next tick.

mod in_flight;

pub use in_flight::{InFlight, InFlightGuard};

use crate::error::OrchestratorError;
use crate::executor::TransferExecutor;
use crate::notifier::Notifier;
use crate::schedule::{due_state, is_due, DueState};
use crate::store::{ConfigStore, RunRecord, StoreError};
use chrono::{DateTime, Utc};
use common::model::configuration::Configuration;
use common::model::tick::{JobOutcome, TickEntry, TickReport};
use log::{error, info, warn};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_PARALLEL: usize = 5;
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-tick knobs.
#[derive(Debug, Clone)]
pub struct TickOptions {
    pub max_parallel: NonZeroUsize,
    pub dry_run: bool,
    /// When non-empty, only configurations with one of these names are considered.
    pub config_names: Vec<String>,
    pub cancel: CancellationToken,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            max_parallel: NonZeroUsize::new(DEFAULT_MAX_PARALLEL).unwrap_or(NonZeroUsize::MIN),
            dry_run: false,
            config_names: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// How a manual run names its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSelector {
    Id(i64),
    Name(String),
}

impl std::fmt::Display for ConfigSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSelector::Id(id) => write!(f, "ID {id}"),
            ConfigSelector::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Collaborators every dispatched job needs, cheap to clone into a task.
#[derive(Clone)]
struct JobContext {
    store: Arc<dyn ConfigStore>,
    executor: Arc<dyn TransferExecutor>,
    notifier: Arc<dyn Notifier>,
    job_timeout: Option<Duration>,
    notify_timeout: Duration,
}

/// Result of one job as seen by the tick.
struct JobResult {
    entry: TickEntry,
    /// The outcome could not be written for a reason other than the row having been deleted.
    write_failed: bool,
}

impl JobResult {
    fn stale(config: &Configuration, reason: &str) -> Self {
        Self {
            entry: skipped_entry(config, reason),
            write_failed: false,
        }
    }
}

pub struct Orchestrator {
    ctx: JobContext,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        executor: Arc<dyn TransferExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ctx: JobContext {
                store,
                executor,
                notifier,
                job_timeout: None,
                notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            },
            in_flight: InFlight::default(),
        }
    }

    /// Ceiling on a single transfer; a slower one is recorded as failed.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.job_timeout = Some(timeout);
        self
    }

    /// Ceiling on delivering one failure notification.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.notify_timeout = timeout;
        self
    }

    pub fn store(&self) -> Arc<dyn ConfigStore> {
        Arc::clone(&self.ctx.store)
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Runs one orchestrator pass at `now`.
    pub async fn run_tick(
        &self,
        now: DateTime<Utc>,
        options: &TickOptions,
    ) -> Result<TickReport, OrchestratorError> {
        info!(
            "Starting tick at {} (max parallel jobs: {}, dry run: {})",
            now, options.max_parallel, options.dry_run
        );
        let mut report = TickReport::new(now, options.dry_run);

        let mut configs = store_call(&self.ctx.store, |s| s.list_active())
            .await
            .map_err(|e| {
                error!("Error fetching configurations: {}", e);
                OrchestratorError::StoreUnavailable(e)
            })?;
        info!("Found {} active configurations", configs.len());

        if !options.config_names.is_empty() {
            for name in &options.config_names {
                if !configs.iter().any(|c| &c.name == name) {
                    self.report_unlisted(name, &mut report).await;
                }
            }
            configs.retain(|c| options.config_names.contains(&c.name));
            info!("Filtered to {} specified configurations", configs.len());
        }
        report.active = configs.len();

        let mut due = Vec::new();
        for config in configs {
            match due_state(&config, now) {
                DueState::Due => {
                    info!(
                        "Config '{}' is due to run (last run: {})",
                        config.name,
                        describe_last_run(&config)
                    );
                    due.push(config);
                }
                DueState::Inactive => {
                    report.skipped_inactive += 1;
                }
                DueState::ManualOnly => {
                    info!("Config '{}' runs on manual trigger only", config.name);
                }
                DueState::NotDue { next_due_at } => {
                    info!(
                        "Config '{}' not due yet (last run: {}, next due: {})",
                        config.name,
                        describe_last_run(&config),
                        next_due_at
                    );
                }
            }
        }
        report.due = due.len();

        if due.is_empty() {
            info!("No configurations are due to run");
            report.finished_at = Utc::now();
            return Ok(report);
        }

        if options.dry_run {
            info!("DRY RUN MODE - would process these configs:");
            for config in &due {
                info!(
                    "  - {} (ID: {}) - Frequency: {}h, Last run: {}",
                    config.name,
                    config.id,
                    config.run_frequency_hours,
                    describe_last_run(config)
                );
                report.entries.push(planned_entry(config));
            }
            report.finished_at = Utc::now();
            return Ok(report);
        }

        info!("Processing {} configurations", due.len());
        self.dispatch(due, now, options, &mut report).await;
        report.entries.sort_by_key(|e| e.config_id);
        report.finished_at = Utc::now();

        info!(
            "Orchestrator completed. Successful: {}, Failed: {}, Skipped: {}",
            report.succeeded,
            report.failed,
            report.skipped_in_flight + report.skipped_stale + report.cancelled
        );
        Ok(report)
    }

    /// A requested name that is not among the active rows: inactive, or unknown.
    async fn report_unlisted(&self, name: &str, report: &mut TickReport) {
        let lookup = name.to_string();
        match store_call(&self.ctx.store, move |s| s.find_by_name(&lookup)).await {
            Ok(Some(config)) if !config.is_active => {
                info!("Config '{}' is inactive, skipping", name);
                report.skipped_inactive += 1;
                report.entries.push(skipped_entry(&config, "inactive"));
            }
            Ok(_) => warn!("No active configuration named '{}'", name),
            Err(e) => warn!("Cannot look up configuration '{}': {}", name, e),
        }
    }

    async fn dispatch(
        &self,
        due: Vec<Configuration>,
        now: DateTime<Utc>,
        options: &TickOptions,
        report: &mut TickReport,
    ) {
        let slots = Arc::new(Semaphore::new(options.max_parallel.get()));
        let mut running = JoinSet::new();
        let mut queue = due.into_iter();

        while let Some(config) = queue.next() {
            if options.cancel.is_cancelled() {
                record_cancelled(report, config, queue.by_ref());
                break;
            }

            let Some(guard) = self.in_flight.try_claim(config.id) else {
                warn!(
                    "Config '{}' (ID: {}) is already running in another tick, skipping",
                    config.name, config.id
                );
                report.skipped_in_flight += 1;
                report.entries.push(skipped_entry(&config, "already running"));
                continue;
            };

            let permit = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => None,
                permit = Arc::clone(&slots).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                drop(guard);
                record_cancelled(report, config, queue.by_ref());
                break;
            };

            let ctx = self.ctx.clone();
            running.spawn(async move {
                let result = match confirm_due(&ctx, config, now).await {
                    Ok(config) => run_job(&ctx, config).await,
                    Err(stale) => stale,
                };
                drop(permit);
                drop(guard);
                result
            });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(result) => tally(report, result),
                Err(e) => error!("Tick job ended abnormally: {}", e),
            }
        }
    }

    /// Dispatches one configuration immediately, regardless of its schedule.
    ///
    /// This is the only way manual-only configurations run. The outcome is
    /// recorded and notified exactly as in a tick.
    pub async fn run_manual(
        &self,
        selector: ConfigSelector,
        now: DateTime<Utc>,
    ) -> Result<TickReport, OrchestratorError> {
        let lookup = selector.clone();
        let config = store_call(&self.ctx.store, move |s| match lookup {
            ConfigSelector::Id(id) => match s.get(id) {
                Ok(config) => Ok(Some(config)),
                Err(StoreError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            ConfigSelector::Name(name) => s.find_by_name(&name),
        })
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(selector.to_string()))?;

        if !config.is_active {
            return Err(OrchestratorError::Inactive(config.name));
        }
        let guard = self
            .in_flight
            .try_claim(config.id)
            .ok_or_else(|| OrchestratorError::AlreadyRunning(config.name.clone()))?;

        info!("Manual run requested for config '{}' (ID: {})", config.name, config.id);
        let mut report = TickReport::new(now, false);
        report.active = 1;
        report.due = 1;
        let result = run_job(&self.ctx, config).await;
        drop(guard);
        tally(&mut report, result);
        report.finished_at = Utc::now();
        Ok(report)
    }
}

/// Re-reads a claimed configuration and keeps it only if it is still due at `now`.
///
/// The listing is a snapshot; by the time a slot frees up an overlapping tick
/// may already have run and recorded the row. A store error here falls back to
/// the snapshot rather than dropping the run.
async fn confirm_due(
    ctx: &JobContext,
    config: Configuration,
    now: DateTime<Utc>,
) -> Result<Configuration, JobResult> {
    let id = config.id;
    match store_call(&ctx.store, move |s| s.get(id)).await {
        Ok(fresh) if is_due(&fresh, now) => Ok(fresh),
        Ok(fresh) => {
            info!(
                "Config '{}' (ID: {}) is no longer due (last run: {}), skipping",
                fresh.name,
                id,
                describe_last_run(&fresh)
            );
            Err(JobResult::stale(&fresh, "no longer due"))
        }
        Err(StoreError::NotFound(_)) => {
            warn!("Config '{}' (ID: {}) was removed before it ran", config.name, id);
            Err(JobResult::stale(&config, "removed"))
        }
        Err(e) => {
            warn!("Cannot re-read config '{}' (ID: {}): {}", config.name, id, e);
            Ok(config)
        }
    }
}

/// Executes one configuration, records its outcome and notifies on failure.
async fn run_job(ctx: &JobContext, config: Configuration) -> JobResult {
    let started_at = Utc::now();
    info!("Starting job for config: {} (ID: {})", config.name, config.id);

    let result = match config.validate() {
        Err(e) => Err(format!("invalid configuration: {e}")),
        Ok(()) => execute_with_ceiling(ctx, &config).await,
    };
    let finished_at = Utc::now();

    let (outcome, record) = match result {
        Ok(()) => {
            info!("Job completed successfully for config: {}", config.name);
            (JobOutcome::Succeeded, RunRecord::succeeded())
        }
        Err(reason) => {
            error!("Job failed for config: {}: {}", config.name, reason);
            (
                JobOutcome::Failed {
                    reason: reason.clone(),
                },
                RunRecord::failed(reason),
            )
        }
    };

    let id = config.id;
    let (recorded, write_failed) =
        match store_call(&ctx.store, move |s| s.mark_run(id, finished_at, &record)).await {
            Ok(()) => {
                info!("Updated last_run for config ID: {}", id);
                (true, false)
            }
            Err(StoreError::NotFound(_)) => {
                warn!(
                    "Config '{}' (ID: {}) was removed while running, outcome not recorded",
                    config.name, id
                );
                (false, false)
            }
            Err(e) => {
                error!("Error updating last_run for config ID {}: {}", id, e);
                (false, true)
            }
        };

    if let Some(reason) = outcome.failure_reason() {
        let delivery = ctx.notifier.notify_failure(&config.name, reason);
        match tokio::time::timeout(ctx.notify_timeout, delivery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failure notification for '{}' not delivered: {}", config.name, e),
            Err(_) => warn!(
                "Failure notification for '{}' timed out after {:?}",
                config.name, ctx.notify_timeout
            ),
        }
    }

    JobResult {
        entry: TickEntry {
            config_id: config.id,
            name: config.name,
            outcome,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            recorded,
        },
        write_failed,
    }
}

/// Runs the executor in its own task so a panic or a timeout stays inside this job.
async fn execute_with_ceiling(ctx: &JobContext, config: &Configuration) -> Result<(), String> {
    let executor = Arc::clone(&ctx.executor);
    let job_config = config.clone();
    let mut handle = tokio::spawn(async move { executor.execute(&job_config).await });

    let joined = match ctx.job_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(format!("timed out after {:?}", limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_err) => Err(format!("transfer task aborted: {join_err}")),
    }
}

/// Runs a blocking store call off the async workers.
async fn store_call<T, F>(store: &Arc<dyn ConfigStore>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ConfigStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
}

fn tally(report: &mut TickReport, result: JobResult) {
    match result.entry.outcome {
        JobOutcome::Succeeded => report.succeeded += 1,
        JobOutcome::Failed { .. } => report.failed += 1,
        JobOutcome::Skipped { .. } => report.skipped_stale += 1,
        JobOutcome::Planned => {}
    }
    if result.write_failed {
        report.record_failures += 1;
    }
    report.entries.push(result.entry);
}

fn record_cancelled(
    report: &mut TickReport,
    first: Configuration,
    rest: impl Iterator<Item = Configuration>,
) {
    warn!("Tick cancelled, not dispatching remaining configurations");
    for config in std::iter::once(first).chain(rest) {
        report.cancelled += 1;
        report.entries.push(skipped_entry(&config, "cancelled"));
    }
}

fn planned_entry(config: &Configuration) -> TickEntry {
    TickEntry {
        config_id: config.id,
        name: config.name.clone(),
        outcome: JobOutcome::Planned,
        started_at: None,
        finished_at: None,
        recorded: false,
    }
}

fn skipped_entry(config: &Configuration, reason: &str) -> TickEntry {
    TickEntry {
        config_id: config.id,
        name: config.name.clone(),
        outcome: JobOutcome::Skipped {
            reason: reason.to_string(),
        },
        started_at: None,
        finished_at: None,
        recorded: false,
    }
}

fn describe_last_run(config: &Configuration) -> String {
    config
        .last_run
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}

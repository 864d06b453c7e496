//! HTTP surface of the orchestrator.
//!
//! Every long-running action (a tick, a manual run) is started as a background
//! job tracked by `job_controller::state::JobsState`; the request returns the
//! `job_id` immediately and the client polls `/api/ticks/status/{job_id}`.

pub mod configs;
pub mod ticks;

use crate::dispatcher::Orchestrator;
use actix_web::web;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Application data shared by every handler.
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: Arc<Orchestrator>,
    /// Used when a tick request does not set `max_parallel_jobs`.
    pub max_parallel: NonZeroUsize,
    /// Cancelled on shutdown; background ticks stop dispatching new jobs.
    pub shutdown: CancellationToken,
    /// Every background tick and manual run, awaited before the process exits.
    pub tasks: TaskTracker,
}

/// Registers every scope. Application data (`AppContext`, `JobsState`) is added by the caller.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.service(configs::configure_routes())
        .service(ticks::configure_routes());
}

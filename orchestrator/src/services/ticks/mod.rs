//! Tick endpoints.
//!
//! - `POST /api/ticks`: starts a tick in the background. The JSON body carries
//!   `dry_run`, `max_parallel_jobs` and `config_names`, all optional. Returns
//!   `{ "job_id": .. }` right away. A scheduler (cron, Cloud Scheduler) calls
//!   this endpoint to drive the orchestrator.
//!
//! - `GET /api/ticks/status/{job_id}`: current `JobStatus` of a tick or manual
//!   run job; `Completed` carries the full tick report.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod get_status;
mod start;

const API_PATH: &str = "/api/ticks";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", post().to(start::process))
        .route("/status/{job_id}", get().to(get_status::process))
}

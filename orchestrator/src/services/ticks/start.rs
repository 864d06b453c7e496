//! # Tick Start Service
//!
//! Provides `POST /api/ticks`, which runs one orchestrator tick in the background.
//!
//! ## Workflow:
//!
//! 1.  **HTTP Request**: `process` receives a `StartTickRequest`. A zero
//!     `max_parallel_jobs` is rejected with `400 Bad Request`.
//!
//! 2.  **Job Scheduling**: `schedule_tick_job` registers a new `job_id` as
//!     `Pending` in the shared `JobsState` and returns it to the client at once.
//!
//! 3.  **Background Processing**: a spawned task reports `Running`, calls
//!     `Orchestrator::run_tick` with the current time and a cancellation token
//!     derived from the server's shutdown token, and finally reports
//!     `Completed(report)` or `Failed(reason)` through the job updater channel.
//!     The task is tracked in `AppContext::tasks`, so a shutdown waits for it.

use crate::job_controller::state::{JobUpdate, JobsState};
use crate::services::AppContext;
use crate::dispatcher::TickOptions;
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use common::jobs::JobStatus;
use common::requests::StartTickRequest;
use log::info;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub(crate) async fn process(
    jobs_state: web::Data<JobsState>,
    app: web::Data<AppContext>,
    payload: web::Json<StartTickRequest>,
) -> impl Responder {
    match schedule_tick_job(&jobs_state, &app, payload.into_inner()).await {
        Ok(job_id) => HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id })),
        Err(err) => HttpResponse::BadRequest().body(err),
    }
}

fn tick_options(app: &AppContext, req: StartTickRequest) -> Result<TickOptions, String> {
    let max_parallel = match req.max_parallel_jobs {
        Some(n) => NonZeroUsize::new(n).ok_or("max_parallel_jobs must be at least 1")?,
        None => app.max_parallel,
    };
    Ok(TickOptions {
        max_parallel,
        dry_run: req.dry_run,
        config_names: req.config_names,
        cancel: app.shutdown.child_token(),
    })
}

async fn schedule_tick_job(
    jobs_state: &JobsState,
    app: &AppContext,
    req: StartTickRequest,
) -> Result<String, String> {
    let options = tick_options(app, req)?;
    let job_id = jobs_state.register().await;
    info!("Scheduled tick job {}", job_id);

    let tx = jobs_state.tx.clone();
    let orchestrator = Arc::clone(&app.orchestrator);
    let id = job_id.clone();
    app.tasks.spawn(async move {
        let _ = tx.send(JobUpdate::new(id.clone(), JobStatus::Running)).await;
        let status = match orchestrator.run_tick(Utc::now(), &options).await {
            Ok(report) => JobStatus::Completed(report),
            Err(e) => JobStatus::Failed(e.to_string()),
        };
        let _ = tx.send(JobUpdate::new(id, status)).await;
    });

    Ok(job_id)
}

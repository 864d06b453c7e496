use crate::dispatcher::ConfigSelector;
use crate::job_controller::state::{JobUpdate, JobsState};
use crate::services::AppContext;
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use common::jobs::JobStatus;
use std::sync::Arc;

/// Handler for `POST /api/configs/{id}/run`.
///
/// The configuration is looked up by the background task, so an unknown or
/// inactive id surfaces as a `Failed` job status rather than an HTTP error.
pub(crate) async fn process(
    id: web::Path<i64>,
    jobs_state: web::Data<JobsState>,
    app: web::Data<AppContext>,
) -> impl Responder {
    let job_id = schedule_manual_run(&jobs_state, &app, id.into_inner()).await;
    HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id }))
}

async fn schedule_manual_run(jobs_state: &JobsState, app: &AppContext, id: i64) -> String {
    let job_id = jobs_state.register().await;
    let tx = jobs_state.tx.clone();
    let orchestrator = Arc::clone(&app.orchestrator);
    let job = job_id.clone();

    app.tasks.spawn(async move {
        let _ = tx.send(JobUpdate::new(job.clone(), JobStatus::Running)).await;
        let status = match orchestrator.run_manual(ConfigSelector::Id(id), Utc::now()).await {
            Ok(report) => JobStatus::Completed(report),
            Err(e) => JobStatus::Failed(e.to_string()),
        };
        let _ = tx.send(JobUpdate::new(job, status)).await;
    });

    job_id
}

mod support;

use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use common::jobs::JobStatus;
use orchestrator::job_controller::state::{start_job_updater, JobsState, DEFAULT_JOB_RETENTION};
use orchestrator::services::{self, AppContext};
use orchestrator::store::ConfigStore;
use orchestrator::Orchestrator;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use support::{config, CountingStore, RecordingNotifier, ScriptedExecutor};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct Harness {
    store: CountingStore,
    executor: ScriptedExecutor,
    jobs: JobsState,
    app: AppContext,
}

fn harness(store: CountingStore) -> Harness {
    harness_with(store, ScriptedExecutor::default())
}

fn harness_with(store: CountingStore, executor: ScriptedExecutor) -> Harness {
    let orchestrator = Orchestrator::new(
        Arc::new(store.clone()),
        Arc::new(executor.clone()),
        Arc::new(RecordingNotifier::default()),
    );
    let (jobs, rx) = JobsState::new(16, DEFAULT_JOB_RETENTION);
    tokio::spawn(start_job_updater(jobs.clone(), rx));
    Harness {
        store,
        executor,
        jobs,
        app: AppContext {
            orchestrator: Arc::new(orchestrator),
            max_parallel: NonZeroUsize::new(2).unwrap(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        },
    }
}

async fn wait_for_completion(jobs: &JobsState, job_id: &str) -> JobStatus {
    for _ in 0..200 {
        match jobs.status(job_id).await {
            Some(JobStatus::Pending) | Some(JobStatus::Running) | None => {}
            Some(done) => return done,
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($h.jobs.clone()))
                .app_data(web::Data::new($h.app.clone()))
                .configure(services::configure_app),
        )
        .await
    };
}

#[actix_web::test]
async fn lists_configurations_with_their_due_state() {
    let now = Utc::now();
    let h = harness(CountingStore::with_configs([
        config(1, "overdue", 24, Some(now - Duration::hours(30))),
        config(2, "fresh", 24, Some(now - Duration::hours(1))),
        config(3, "manual", 0, None),
    ]));
    let app = app!(h);

    let req = test::TestRequest::get().uri("/api/configs").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let states: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["due"]["state"].as_str().unwrap())
        .collect();
    assert_eq!(states, vec!["due", "not_due", "manual_only"]);
    assert_eq!(body[0]["name"], "overdue");
    assert!(body[1]["due"]["next_due_at"].is_string());
}

#[actix_web::test]
async fn tick_runs_in_the_background_and_reports() {
    let h = harness(CountingStore::with_configs([
        config(1, "a", 24, None),
        config(2, "b", 24, None),
    ]));
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/ticks")
        .set_json(serde_json::json!({}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    match wait_for_completion(&h.jobs, &job_id).await {
        JobStatus::Completed(report) => {
            assert_eq!(report.succeeded, 2);
            assert!(!report.dry_run);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(h.executor.calls().len(), 2);

    let req = test::TestRequest::get()
        .uri(&format!("/api/ticks/status/{job_id}"))
        .to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["Completed"]["succeeded"], 2);
}

#[actix_web::test]
async fn dry_run_tick_touches_nothing() {
    let h = harness(CountingStore::with_configs([config(1, "a", 24, None)]));
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/ticks")
        .set_json(serde_json::json!({ "dry_run": true }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    match wait_for_completion(&h.jobs, body["job_id"].as_str().unwrap()).await {
        JobStatus::Completed(report) => {
            assert!(report.dry_run);
            assert_eq!(report.due, 1);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(h.executor.calls().is_empty());
    assert_eq!(h.store.mark_run_count(), 0);
}

#[actix_web::test]
async fn zero_parallelism_is_rejected() {
    let h = harness(CountingStore::default());
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/ticks")
        .set_json(serde_json::json!({ "max_parallel_jobs": 0 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn unknown_job_is_not_found() {
    let h = harness(CountingStore::default());
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri("/api/ticks/status/does-not-exist")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn manual_run_executes_a_manual_only_configuration() {
    let h = harness(CountingStore::with_configs([config(7, "on_demand", 0, None)]));
    let app = app!(h);

    let req = test::TestRequest::post().uri("/api/configs/7/run").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    match wait_for_completion(&h.jobs, body["job_id"].as_str().unwrap()).await {
        JobStatus::Completed(report) => assert_eq!(report.succeeded, 1),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(h.executor.calls(), vec![7]);
    assert!(h.store.get(7).unwrap().last_run.is_some());
}

#[actix_web::test]
async fn manual_run_of_unknown_configuration_fails_the_job() {
    let h = harness(CountingStore::default());
    let app = app!(h);

    let req = test::TestRequest::post().uri("/api/configs/42/run").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    match wait_for_completion(&h.jobs, body["job_id"].as_str().unwrap()).await {
        JobStatus::Failed(reason) => assert!(reason.contains("42"), "{reason}"),
        other => panic!("unexpected status {other:?}"),
    }
}

#[actix_web::test]
async fn shutdown_waits_for_running_jobs_to_be_recorded() {
    let h = harness_with(
        CountingStore::with_configs([config(1, "a", 24, None), config(2, "b", 24, None)]),
        ScriptedExecutor::with_delay(std::time::Duration::from_millis(100)),
    );
    let app = app!(h);

    let req = test::TestRequest::post()
        .uri("/api/ticks")
        .set_json(serde_json::json!({ "max_parallel_jobs": 1 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Let the first transfer start, then shut down as `serve` does.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    h.app.shutdown.cancel();
    h.app.tasks.close();
    h.app.tasks.wait().await;

    assert_eq!(h.executor.calls(), vec![1]);
    assert!(h.store.get(1).unwrap().last_run.is_some());
    assert_eq!(h.store.get(2).unwrap().last_run, None);

    match wait_for_completion(&h.jobs, &job_id).await {
        JobStatus::Completed(report) => {
            assert_eq!(report.succeeded, 1);
            assert_eq!(report.cancelled, 1);
        }
        other => panic!("unexpected status {other:?}"),
    }
}

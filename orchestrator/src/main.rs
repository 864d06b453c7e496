use actix_web::{web, App, HttpServer};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use common::model::configuration::{
    Configuration, SchemaField, SchemaMode, SourceReference, TargetReference,
};
use common::model::tick::{JobOutcome, TickReport};
use env_logger::Env;
use log::{error, info, warn};
use orchestrator::config::Settings;
use orchestrator::executor::CloudRunExecutor;
use orchestrator::job_controller::state::{start_job_updater, JobsState};
use orchestrator::notifier::{LogNotifier, Notifier, SlackNotifier};
use orchestrator::schedule::{due_state, DueState};
use orchestrator::services::{self, AppContext};
use orchestrator::store::{ConfigStore, SqliteConfigStore};
use orchestrator::{ConfigSelector, Orchestrator, OrchestratorError, TickOptions};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// At least one dispatched job failed, or an outcome could not be recorded.
const EXIT_JOB_FAILED: u8 = 1;
/// Settings, store or listing error: nothing was dispatched.
const EXIT_TICK_ERROR: u8 = 2;

#[derive(Parser)]
#[command(author, version, about = "Dispatches due sheet-to-BigQuery transfers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML settings file
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Configuration database, overrides the settings file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one tick: dispatch every due configuration
    Tick {
        /// Show what would be executed without running anything
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of transfers running at the same time
        #[arg(long)]
        max_parallel_jobs: Option<NonZeroUsize>,
        /// Only consider configurations with these names
        #[arg(long, num_args = 1..)]
        config_names: Vec<String>,
        /// Print the tick report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one configuration now, whatever its schedule
    Run {
        #[arg(long, conflicts_with = "name", required_unless_present = "name")]
        id: Option<i64>,
        #[arg(long)]
        name: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every configuration with its scheduling state
    Status,
    /// Print an example configuration
    Example,
    /// List recent executions of the Cloud Run transfer job
    Executions {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Serve the HTTP API
    Serve {
        /// Address to listen on, overrides the settings file
        #[arg(long)]
        bind: Option<String>,
    },
}

#[actix_web::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_TICK_ERROR);
        }
    };
    if let Some(database) = cli.database {
        settings.database_path = database;
    }

    match cli.command {
        Commands::Example => return print_example(),
        Commands::Executions { limit } => return list_executions(&settings, limit).await,
        _ => {}
    }

    let orchestrator = match build_orchestrator(&settings) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_TICK_ERROR);
        }
    };

    match cli.command {
        Commands::Tick {
            dry_run,
            max_parallel_jobs,
            config_names,
            json,
        } => {
            let max_parallel = max_parallel_jobs
                .or_else(|| NonZeroUsize::new(settings.max_parallel_jobs))
                .unwrap_or(NonZeroUsize::MIN);
            let options = TickOptions {
                max_parallel,
                dry_run,
                config_names,
                cancel: cancel_on_ctrl_c(),
            };
            let result = orchestrator.run_tick(Utc::now(), &options).await;
            finish(result, json)
        }
        Commands::Run { id, name, json } => {
            let selector = match (id, name) {
                (Some(id), _) => ConfigSelector::Id(id),
                (None, Some(name)) => ConfigSelector::Name(name),
                (None, None) => return ExitCode::from(EXIT_TICK_ERROR),
            };
            let result = orchestrator.run_manual(selector, Utc::now()).await;
            finish(result, json)
        }
        Commands::Status => print_status(orchestrator.store()).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.http.bind.clone());
            match serve(orchestrator, &settings, &bind).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("Server error: {}", e);
                    ExitCode::from(EXIT_TICK_ERROR)
                }
            }
        }
        Commands::Example => print_example(),
        Commands::Executions { limit } => list_executions(&settings, limit).await,
    }
}

async fn list_executions(settings: &Settings, limit: usize) -> ExitCode {
    let executor = CloudRunExecutor::new(settings.cloud_run.clone());
    match executor.list_executions(limit).await {
        Ok(listing) => {
            println!("Recent executions of '{}':", settings.cloud_run.job_name);
            print!("{}", listing);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot list executions: {}", e);
            ExitCode::from(EXIT_TICK_ERROR)
        }
    }
}

fn build_orchestrator(settings: &Settings) -> Result<Orchestrator, OrchestratorError> {
    let store = SqliteConfigStore::open(&settings.database_path)?;
    let executor = CloudRunExecutor::new(settings.cloud_run.clone());
    let notifier: Arc<dyn Notifier> = match &settings.slack.token {
        Some(token) => Arc::new(SlackNotifier::new(token.clone(), settings.slack.channel.clone())),
        None => {
            warn!("slack_accessToken not set, failures will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let orchestrator = Orchestrator::new(Arc::new(store), Arc::new(executor), notifier);
    Ok(match settings.job_timeout() {
        Some(timeout) => orchestrator.with_job_timeout(timeout),
        None => orchestrator,
    })
}

/// Stops new dispatches on the first Ctrl-C; running transfers still finish.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for running jobs to finish");
            trigger.cancel();
        }
    });
    token
}

fn finish(result: Result<TickReport, OrchestratorError>, json: bool) -> ExitCode {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("Error in orchestrator: {}", e);
            return ExitCode::from(EXIT_TICK_ERROR);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Cannot encode report: {}", e),
        }
    } else {
        print_report(&report);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_JOB_FAILED)
    }
}

fn print_report(report: &TickReport) {
    println!(
        "{}active: {}, due: {}, succeeded: {}, failed: {}, skipped: {}",
        if report.dry_run { "[dry run] " } else { "" },
        report.active,
        report.due,
        report.succeeded,
        report.failed,
        report.skipped_inactive + report.skipped_in_flight + report.skipped_stale + report.cancelled
    );
    for entry in &report.entries {
        let outcome = match &entry.outcome {
            JobOutcome::Planned => "would run".to_string(),
            JobOutcome::Skipped { reason } => format!("skipped ({reason})"),
            JobOutcome::Succeeded => "succeeded".to_string(),
            JobOutcome::Failed { reason } => format!("FAILED: {reason}"),
        };
        let took = match (entry.started_at, entry.finished_at) {
            (Some(start), Some(end)) => format!(" in {}s", (end - start).num_seconds()),
            _ => String::new(),
        };
        println!("  [{}] {}: {}{}", entry.config_id, entry.name, outcome, took);
    }
    if report.record_failures > 0 {
        println!("  {} outcome(s) could not be recorded", report.record_failures);
    }
}

async fn print_status(store: Arc<dyn ConfigStore>) -> ExitCode {
    let configs = match tokio::task::spawn_blocking(move || store.list_all()).await {
        Ok(Ok(configs)) => configs,
        Ok(Err(e)) => {
            error!("{}", e);
            return ExitCode::from(EXIT_TICK_ERROR);
        }
        Err(e) => {
            error!("Status task failed: {}", e);
            return ExitCode::from(EXIT_TICK_ERROR);
        }
    };

    let now = Utc::now();
    println!("Configuration status:");
    for config in &configs {
        let state = due_state(config, now);
        let next = match state {
            DueState::NotDue { next_due_at } => format!(", next: {}", fmt_time(next_due_at)),
            _ => String::new(),
        };
        println!(
            "  - [{}] {}: {} (freq: {}h, last: {}{})",
            config.id,
            config.name,
            state.label(),
            config.run_frequency_hours,
            config.last_run.map(fmt_time).unwrap_or_else(|| "never".to_string()),
            next
        );
    }
    if configs.is_empty() {
        println!("  (none)");
    }
    ExitCode::SUCCESS
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn print_example() -> ExitCode {
    let now = Utc::now();
    let mut example = Configuration::new(
        1,
        "example_sheet_transfer",
        SourceReference {
            sheet_url: "https://docs.google.com/spreadsheets/d/YOUR_SHEET_ID/edit".to_string(),
            tab_name: Some("Sheet1".to_string()),
        },
        TargetReference {
            project_id: "your-project".to_string(),
            dataset_id: "your_dataset".to_string(),
            table_id: "your_table".to_string(),
        },
        24,
        now - Duration::days(1),
    );
    example.schema_mode = SchemaMode::Custom;
    example.schema_definition = Some(vec![
        SchemaField::new("column1", "STRING"),
        SchemaField {
            name: "column2".to_string(),
            field_type: "INTEGER".to_string(),
            mode: "REQUIRED".to_string(),
        },
    ]);

    match serde_json::to_string_pretty(&example) {
        Ok(text) => {
            println!("Example configuration:");
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot encode example: {}", e);
            ExitCode::from(EXIT_TICK_ERROR)
        }
    }
}

async fn serve(orchestrator: Arc<Orchestrator>, settings: &Settings, bind: &str) -> std::io::Result<()> {
    let (jobs_state, rx) = JobsState::new(100, settings.http.job_retention());

    // Start job updater task
    let updater_state = jobs_state.clone();
    tokio::spawn(async move {
        start_job_updater(updater_state, rx).await;
    });

    let app_ctx = AppContext {
        orchestrator,
        max_parallel: NonZeroUsize::new(settings.max_parallel_jobs).unwrap_or(NonZeroUsize::MIN),
        shutdown: CancellationToken::new(),
        tasks: TaskTracker::new(),
    };
    let shutdown = app_ctx.shutdown.clone();
    let tasks = app_ctx.tasks.clone();

    info!("Server running at http://{}", bind);
    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(jobs_state.clone()))
            .app_data(web::Data::new(app_ctx.clone()))
            .configure(services::configure_app)
    })
    .bind(bind)?
    .run()
    .await;

    // Background ticks stop dispatching; running transfers finish and are recorded.
    shutdown.cancel();
    tasks.close();
    if !tasks.is_empty() {
        info!("Waiting for {} background job(s) to finish", tasks.len());
    }
    tasks.wait().await;
    result
}

//! Scheduling core for recurring spreadsheet-to-warehouse transfers.
//!
//! `dispatcher::Orchestrator` runs ticks: it lists active configurations from a
//! `store::ConfigStore`, keeps the ones `schedule::is_due` selects, runs them
//! through an `executor::TransferExecutor` with bounded parallelism and writes
//! each outcome back. Failures are reported through a `notifier::Notifier`.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job_controller;
pub mod notifier;
pub mod schedule;
pub mod services;
pub mod store;

pub use dispatcher::{ConfigSelector, Orchestrator, TickOptions};
pub use error::OrchestratorError;

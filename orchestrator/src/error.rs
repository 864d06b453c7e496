use crate::store::StoreError;
use thiserror::Error;

/// Errors that end an orchestrator operation as a whole.
///
/// Failures of individual transfers never show up here: they are contained at
/// the job boundary and reported through `TickReport`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The due set cannot be computed, so nothing was dispatched.
    #[error("configuration store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("configuration {0} not found")]
    NotFound(String),
    #[error("configuration '{0}' is inactive")]
    Inactive(String),
    #[error("configuration '{0}' is already running")]
    AlreadyRunning(String),
}

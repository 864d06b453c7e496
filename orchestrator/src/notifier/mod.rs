//! Failure notifications.
//!
//! Delivery is best effort: the orchestrator logs a notifier error and moves on.

mod slack;

pub use slack::SlackNotifier;

use async_trait::async_trait;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Transport(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, config_name: &str, reason: &str) -> Result<(), NotifyError>;
}

/// Text sent for a failed transfer.
pub fn failure_message(config_name: &str, reason: &str) -> String {
    format!("Sheet to BigQuery job failed for '{config_name}': {reason}")
}

/// Writes failures to the log only. Used when no chat channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_failure(&self, config_name: &str, reason: &str) -> Result<(), NotifyError> {
        warn!(
            "Notifier not configured, skipping notification: {}",
            failure_message(config_name, reason)
        );
        Ok(())
    }
}

//! Transfer execution.
//!
//! The orchestrator never moves data itself. Each due configuration is handed
//! to a `TransferExecutor`, which performs (or launches and waits for) the
//! spreadsheet-to-warehouse transfer and reports success or a failure reason.

mod cloud_run;

pub use cloud_run::{CloudRunExecutor, CloudRunSettings};

use async_trait::async_trait;
use common::model::configuration::Configuration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer ran and reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The transfer could not be started at all.
    #[error("could not launch transfer: {0}")]
    Launch(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Runs the transfer described by `config` to completion.
    async fn execute(&self, config: &Configuration) -> Result<(), TransferError>;
}

/// Shortens tool output to something that fits in a report line or a chat message.
pub(crate) fn summarize(output: &str, max_chars: usize) -> String {
    let line = output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no error output");
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let mut short: String = line.chars().take(max_chars).collect();
        short.push_str("...");
        short
    }
}

//! Service settings.
//!
//! Resolved in three layers: built-in defaults, an optional TOML file, then
//! environment variables. Command-line flags are applied on top by `main.rs`.

use crate::dispatcher::DEFAULT_MAX_PARALLEL;
use crate::executor::CloudRunSettings;
use crate::job_controller::state::DEFAULT_JOB_RETENTION;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 2400;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("max_parallel_jobs must be at least 1")]
    ZeroParallelism,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlackSettings {
    pub channel: String,
    /// Without a token failures are only logged.
    pub token: Option<String>,
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            channel: "dev_alerts".to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub bind: String,
    /// How long a finished background job stays visible on the status endpoint.
    pub job_retention_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            job_retention_secs: DEFAULT_JOB_RETENTION.as_secs(),
        }
    }
}

impl HttpSettings {
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub max_parallel_jobs: usize,
    pub job_timeout_secs: u64,
    pub cloud_run: CloudRunSettings,
    pub slack: SlackSettings,
    pub http: HttpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("orchestrator.sqlite"),
            max_parallel_jobs: DEFAULT_MAX_PARALLEL,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            cloud_run: CloudRunSettings::default(),
            slack: SlackSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `path` when given, then with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies overrides read through `lookup`, which stands in for the environment.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ORCHESTRATOR_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("ORCHESTRATOR_MAX_PARALLEL_JOBS") {
            self.max_parallel_jobs = value.parse().map_err(|_| SettingsError::Env {
                key: "ORCHESTRATOR_MAX_PARALLEL_JOBS",
                value,
            })?;
        }
        if let Some(value) = lookup("ORCHESTRATOR_JOB_TIMEOUT_SECS") {
            self.job_timeout_secs = value.parse().map_err(|_| SettingsError::Env {
                key: "ORCHESTRATOR_JOB_TIMEOUT_SECS",
                value,
            })?;
        }
        // Same variable name the deployed transfer job reads its token from.
        if let Some(token) = lookup("slack_accessToken").filter(|t| !t.is_empty()) {
            self.slack.token = Some(token);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_parallel_jobs == 0 {
            return Err(SettingsError::ZeroParallelism);
        }
        Ok(())
    }

    /// `None` when the timeout is disabled with `0`.
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

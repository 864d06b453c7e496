//! # Cloud Run Transfer Executor
//!
//! Runs one transfer by executing the deployed Cloud Run job through the
//! `gcloud` CLI.
//!
//! ## Workflow
//!
//! 1.  The configuration is flattened into the environment variables the
//!     transfer job reads (`CONFIG_ID`, `GOOGLE_SHEET_URL`, `SCHEMA_HANDLING`, ...).
//! 2.  They are written to a temporary YAML file, one `KEY: 'value'` line per
//!     variable, single quotes doubled inside values.
//! 3.  `gcloud run jobs execute <job> --region <region> --env-vars-file <file> --wait`
//!     is spawned and awaited. The child is killed if the future is dropped,
//!     which is how the orchestrator's timeout takes effect.
//! 4.  A non-zero exit status becomes `TransferError::Failed` carrying the last
//!     line of stderr. The temporary file is removed when it goes out of scope.

use super::{summarize, TransferError, TransferExecutor};
use async_trait::async_trait;
use common::model::configuration::Configuration;
use log::{debug, error, info};
use serde::Deserialize;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio::process::Command;

const MAX_ERROR_CHARS: usize = 500;

/// Where the transfer job is deployed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudRunSettings {
    pub job_name: String,
    pub region: String,
    pub gcloud_bin: String,
    /// Pass `--wait` so the call returns only once the execution has finished.
    pub wait: bool,
}

impl Default for CloudRunSettings {
    fn default() -> Self {
        Self {
            job_name: "sheettobigquery-job".to_string(),
            region: "us-central1".to_string(),
            gcloud_bin: "gcloud".to_string(),
            wait: true,
        }
    }
}

pub struct CloudRunExecutor {
    settings: CloudRunSettings,
}

impl CloudRunExecutor {
    pub fn new(settings: CloudRunSettings) -> Self {
        Self { settings }
    }

    /// Environment handed to the transfer job, in a stable order.
    pub fn env_vars(config: &Configuration) -> Result<Vec<(&'static str, String)>, TransferError> {
        let source = &config.source_reference;
        let target = &config.target_reference;
        let mut vars = vec![
            ("CONFIG_ID", config.id.to_string()),
            ("CONFIG_NAME", config.name.clone()),
            ("GOOGLE_SHEET_URL", source.sheet_url.clone()),
            ("GOOGLE_CLOUD_PROJECT_ID", target.project_id.clone()),
            ("BIGQUERY_DATASET_ID", target.dataset_id.clone()),
            ("BIGQUERY_TABLE_ID", target.table_id.clone()),
            ("SCHEMA_HANDLING", config.schema_mode.as_str().to_string()),
        ];
        if let Some(tab) = source.tab_name.as_ref().filter(|t| !t.is_empty()) {
            vars.push(("GOOGLE_SHEET_TAB_NAME", tab.clone()));
        }
        if let Some(fields) = config.schema_definition.as_ref().filter(|f| !f.is_empty()) {
            let json = serde_json::to_string(fields)
                .map_err(|e| TransferError::Launch(format!("cannot encode schema: {e}")))?;
            vars.push(("CUSTOM_SCHEMA", json));
        }
        Ok(vars)
    }

    /// Renders the `--env-vars-file` YAML body.
    pub fn render_env_file(vars: &[(&'static str, String)]) -> String {
        vars.iter()
            .map(|(key, value)| format!("{}: '{}'\n", key, value.replace('\'', "''")))
            .collect()
    }

    fn write_env_file(config: &Configuration) -> Result<NamedTempFile, TransferError> {
        let vars = Self::env_vars(config)?;
        let mut file = tempfile::Builder::new()
            .prefix("transfer-env-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(Self::render_env_file(&vars).as_bytes())?;
        file.flush()?;
        debug!("Created environment file: {}", file.path().display());
        Ok(file)
    }
}

impl CloudRunExecutor {
    /// Recent executions of the deployed job, as printed by `gcloud`.
    pub async fn list_executions(&self, limit: usize) -> Result<String, TransferError> {
        let output = Command::new(&self.settings.gcloud_bin)
            .args(["run", "jobs", "executions", "list"])
            .arg("--job")
            .arg(&self.settings.job_name)
            .arg("--region")
            .arg(&self.settings.region)
            .arg("--limit")
            .arg(limit.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TransferError::Launch(format!("{}: {}", self.settings.gcloud_bin, e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(TransferError::Failed(format!(
                "gcloud exited with {}: {}",
                output.status,
                summarize(&String::from_utf8_lossy(&output.stderr), MAX_ERROR_CHARS)
            )))
        }
    }
}

#[async_trait]
impl TransferExecutor for CloudRunExecutor {
    async fn execute(&self, config: &Configuration) -> Result<(), TransferError> {
        let env_file = Self::write_env_file(config)?;

        let mut cmd = Command::new(&self.settings.gcloud_bin);
        cmd.args(["run", "jobs", "execute", self.settings.job_name.as_str()])
            .arg("--region")
            .arg(&self.settings.region)
            .arg("--env-vars-file")
            .arg(env_file.path());
        if self.settings.wait {
            cmd.arg("--wait");
        }
        cmd.kill_on_drop(true);

        info!(
            "Executing Cloud Run job '{}' in {} for config '{}' (ID: {})",
            self.settings.job_name, self.settings.region, config.name, config.id
        );
        let output = cmd.output().await.map_err(|e| {
            TransferError::Launch(format!("{}: {}", self.settings.gcloud_bin, e))
        })?;

        if output.status.success() {
            info!("Job completed successfully for config: {}", config.name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Job failed for config: {}", config.name);
            error!("Error output: {}", stderr.trim());
            Err(TransferError::Failed(format!(
                "gcloud exited with {}: {}",
                output.status,
                summarize(&stderr, MAX_ERROR_CHARS)
            )))
        }
    }
}

use serde::{Deserialize, Serialize};

/// Request payload for starting a tick in the background.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartTickRequest {
    #[serde(default)]
    pub dry_run: bool,
    /// Falls back to the service setting when omitted.
    #[serde(default)]
    pub max_parallel_jobs: Option<usize>,
    /// Restricts the tick to configurations with these names.
    #[serde(default)]
    pub config_names: Vec<String>,
}

use crate::model::tick::TickReport;
use serde::Serialize;

/// Lifecycle of a background job started through the HTTP surface.
#[derive(Clone, Debug, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed(TickReport),
    Failed(String),
}

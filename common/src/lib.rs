//! Data model shared between the orchestrator service, its HTTP surface and its CLI.

pub mod jobs;
pub mod model;
pub mod requests;

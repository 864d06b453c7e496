//! Due-selection policy.
//!
//! Everything here is a pure function of the configuration and an injected
//! `now`, so the scheduler can be exercised deterministically.

use chrono::{DateTime, Duration, Utc};
use common::model::configuration::Configuration;
use serde::Serialize;

/// Scheduling classification of a configuration at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DueState {
    Inactive,
    ManualOnly,
    Due,
    NotDue { next_due_at: DateTime<Utc> },
}

impl DueState {
    pub fn label(&self) -> &'static str {
        match self {
            DueState::Inactive => "inactive",
            DueState::ManualOnly => "manual only",
            DueState::Due => "due",
            DueState::NotDue { .. } => "not due",
        }
    }
}

fn interval(config: &Configuration) -> Duration {
    Duration::hours(i64::from(config.run_frequency_hours))
}

/// Earliest instant at which an automatic run becomes due again, if any.
///
/// `None` for inactive and manual-only configurations. A configuration that
/// never ran is due from the beginning of time, reported as its creation date.
pub fn next_due_at(config: &Configuration) -> Option<DateTime<Utc>> {
    if !config.is_active || config.run_frequency_hours == 0 {
        return None;
    }
    match config.last_run {
        None => Some(config.created_at),
        Some(last_run) => Some(
            last_run
                .checked_add_signed(interval(config))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        ),
    }
}

pub fn due_state(config: &Configuration, now: DateTime<Utc>) -> DueState {
    if !config.is_active {
        return DueState::Inactive;
    }
    if config.run_frequency_hours == 0 {
        return DueState::ManualOnly;
    }
    let Some(last_run) = config.last_run else {
        return DueState::Due;
    };
    match last_run.checked_add_signed(interval(config)) {
        // The boundary is inclusive: exactly one interval later counts as due.
        Some(next) if now >= next => DueState::Due,
        Some(next) => DueState::NotDue { next_due_at: next },
        // An interval that overflows the calendar is never reached.
        None => DueState::NotDue {
            next_due_at: DateTime::<Utc>::MAX_UTC,
        },
    }
}

/// Whether `config` should be picked up by an automatic tick at `now`.
pub fn is_due(config: &Configuration, now: DateTime<Utc>) -> bool {
    due_state(config, now) == DueState::Due
}

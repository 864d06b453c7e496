//! Configuration endpoints.
//!
//! - `GET /api/configs`: every configuration with its scheduling state at the
//!   time of the request (`due`, `not_due` with the next due time, `manual_only`
//!   or `inactive`).
//!
//! - `POST /api/configs/{id}/run`: dispatches one configuration right away,
//!   regardless of its schedule, as a background job. Returns `{ "job_id": .. }`.
//!   This is how manual-only configurations are run.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

mod list;
mod run;

const API_PATH: &str = "/api/configs";

pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", get().to(list::process))
        .route("/{id}/run", post().to(run::process))
}

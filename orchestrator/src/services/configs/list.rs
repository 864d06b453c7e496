use crate::schedule::{due_state, DueState};
use crate::services::AppContext;
use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use common::model::configuration::Configuration;
use serde::Serialize;

/// A configuration as listed by `GET /api/configs`.
#[derive(Serialize)]
pub struct ConfigStatusView {
    #[serde(flatten)]
    pub configuration: Configuration,
    pub due: DueState,
}

pub(crate) async fn process(app: web::Data<AppContext>) -> impl Responder {
    match list_configs(&app).await {
        Ok(configs) => HttpResponse::Ok().json(configs),
        Err(e) => HttpResponse::ServiceUnavailable()
            .body(format!("Error listing configurations: {}", e)),
    }
}

async fn list_configs(app: &AppContext) -> Result<Vec<ConfigStatusView>, String> {
    let store = app.orchestrator.store();
    let configs = web::block(move || store.list_all())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    let now = Utc::now();
    Ok(configs
        .into_iter()
        .map(|configuration| ConfigStatusView {
            due: due_state(&configuration, now),
            configuration,
        })
        .collect())
}

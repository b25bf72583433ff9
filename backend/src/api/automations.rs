use crate::services::AutomationEngine;
use actix_web::{get, web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct NextRunQuery {
    pub cron: String,
    pub timezone: Option<String>,
    pub after: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextRunResponse {
    pub cron: String,
    pub timezone: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Execution history, oldest first
#[get("/{automation_id}/logs")]
pub async fn get_logs(
    engine: web::Data<AutomationEngine>,
    path: web::Path<String>,
) -> impl Responder {
    let automation_id = path.into_inner();
    match engine.repository().automation_logs(&automation_id).await {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(e) => {
            error!("Failed to load logs of {}: {}", automation_id, e);
            HttpResponse::InternalServerError().body("Error fetching logs")
        }
    }
}

#[get("/{automation_id}/stats")]
pub async fn get_stats(
    engine: web::Data<AutomationEngine>,
    path: web::Path<String>,
) -> impl Responder {
    let automation_id = path.into_inner();
    match engine.repository().automation_stats(&automation_id).await {
        Ok(Some(stats)) => HttpResponse::Ok().json(stats),
        Ok(None) => HttpResponse::NotFound().body("No executions recorded"),
        Err(e) => {
            error!("Failed to load stats of {}: {}", automation_id, e);
            HttpResponse::InternalServerError().body("Error fetching stats")
        }
    }
}

/// Next fire time of a cron expression; `nextRun` is null when nothing
/// matches within a year
#[get("/next-run")]
pub async fn next_run(
    engine: web::Data<AutomationEngine>,
    query: web::Query<NextRunQuery>,
) -> impl Responder {
    let query = query.into_inner();
    let after = query.after.unwrap_or_else(Utc::now);
    let next_run = engine.next_run(&query.cron, query.timezone.as_deref(), after);

    HttpResponse::Ok().json(NextRunResponse {
        cron: query.cron,
        timezone: query.timezone,
        next_run,
    })
}

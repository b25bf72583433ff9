use crate::{
    models::{DeviceStatus, FactMap},
    services::{AutomationEngine, AutomationRun},
};
use actix_web::{post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: DeviceStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub automation_id: String,
    pub status: String,
    pub failed_actions: usize,
    pub total_duration_ms: u64,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub fired: usize,
    pub runs: Vec<RunSummary>,
}

impl From<Vec<AutomationRun>> for EventResponse {
    fn from(runs: Vec<AutomationRun>) -> Self {
        let runs: Vec<RunSummary> = runs
            .into_iter()
            .map(|run| RunSummary {
                failed_actions: run.results.iter().filter(|r| r.is_failure()).count(),
                status: run.log.status.as_str().to_string(),
                total_duration_ms: run.log.total_duration_ms,
                automation_id: run.automation_id,
            })
            .collect();
        Self {
            fired: runs.len(),
            runs,
        }
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Ingest a device telemetry update (a JSON object of field values)
#[post("/{workspace_id}/devices/{device_id}/data")]
pub async fn ingest_device_data(
    engine: web::Data<AutomationEngine>,
    path: web::Path<(String, String)>,
    body: web::Json<FactMap>,
) -> impl Responder {
    let (workspace_id, device_id) = path.into_inner();
    let runs = engine
        .handle_device_data(&workspace_id, &device_id, body.into_inner())
        .await;
    HttpResponse::Ok().json(EventResponse::from(runs))
}

/// Report a device connectivity transition
#[post("/{workspace_id}/devices/{device_id}/status")]
pub async fn report_device_status(
    engine: web::Data<AutomationEngine>,
    path: web::Path<(String, String)>,
    body: web::Json<StatusRequest>,
) -> impl Responder {
    let (workspace_id, device_id) = path.into_inner();
    let runs = engine
        .handle_device_status(&workspace_id, &device_id, body.status)
        .await;
    HttpResponse::Ok().json(EventResponse::from(runs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_request_deserialization() {
        let request: StatusRequest = serde_json::from_str(r#"{"status": "offline"}"#).unwrap();
        assert_eq!(request.status, DeviceStatus::Offline);
        assert!(serde_json::from_str::<StatusRequest>(r#"{"status": "asleep"}"#).is_err());
    }
}

use crate::{
    models::{Automation, Workspace},
    services::{AutomationEngine, SaveAutomationError},
};
use actix_web::{get, put, web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Deserialize)]
pub struct WorkspaceRequest {
    pub name: String,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Serialize)]
pub struct WarningsResponse {
    pub warnings: Vec<String>,
}

// ============================================================================
// Endpoints
// ============================================================================

/// Register or rename a workspace
#[put("/{workspace_id}")]
pub async fn put_workspace(
    engine: web::Data<AutomationEngine>,
    path: web::Path<String>,
    body: web::Json<WorkspaceRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let workspace = Workspace {
        workspace_id: path.into_inner(),
        name: body.name,
        plan: body.plan.unwrap_or_else(|| "free".to_string()),
    };

    match engine.repository().save_workspace(&workspace).await {
        Ok(()) => HttpResponse::Ok().json(workspace),
        Err(e) => {
            error!("Failed to save workspace {}: {}", workspace.workspace_id, e);
            HttpResponse::InternalServerError().body("Error saving workspace")
        }
    }
}

/// Create or replace an automation. Identifiers come from the path.
#[put("/{workspace_id}/automations/{automation_id}")]
pub async fn put_automation(
    engine: web::Data<AutomationEngine>,
    path: web::Path<(String, String)>,
    body: web::Json<JsonValue>,
) -> impl Responder {
    let (workspace_id, automation_id) = path.into_inner();

    let mut document = body.into_inner();
    let Some(fields) = document.as_object_mut() else {
        return HttpResponse::BadRequest().body("Automation must be a JSON object");
    };
    fields.insert("workspaceId".to_string(), JsonValue::String(workspace_id));
    fields.insert("automationId".to_string(), JsonValue::String(automation_id));

    let automation: Automation = match serde_json::from_value(document) {
        Ok(a) => a,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid automation: {}", e)),
    };

    match engine.save_automation(&automation).await {
        Ok(()) => HttpResponse::Ok().json(automation),
        Err(SaveAutomationError::Invalid(msg)) => {
            HttpResponse::BadRequest().body(format!("Invalid automation: {}", msg))
        }
        Err(SaveAutomationError::Store(e)) => {
            error!("Failed to save automation {}: {}", automation.automation_id, e);
            HttpResponse::InternalServerError().body("Error saving automation")
        }
    }
}

/// Possible feedback loops between the workspace's automations (advisory)
#[get("/{workspace_id}/automations/warnings")]
pub async fn automation_warnings(
    engine: web::Data<AutomationEngine>,
    path: web::Path<String>,
) -> impl Responder {
    let workspace_id = path.into_inner();
    match engine.loop_warnings(&workspace_id).await {
        Ok(warnings) => HttpResponse::Ok().json(WarningsResponse { warnings }),
        Err(e) => {
            error!("Failed to load automations of {}: {}", workspace_id, e);
            HttpResponse::InternalServerError().body("Error fetching automations")
        }
    }
}

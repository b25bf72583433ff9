use actix_web::web;

pub mod automations;
pub mod events;
pub mod workspaces;

pub fn config(cfg: &mut web::ServiceConfig) {
    // Workspace-scoped ingest and rule management
    cfg.service(
        web::scope("/api/workspaces")
            .service(events::ingest_device_data)
            .service(events::report_device_status)
            .service(workspaces::automation_warnings)
            .service(workspaces::put_automation)
            .service(workspaces::put_workspace),
    );

    // Execution history and schedule preview
    cfg.service(
        web::scope("/api/automations")
            .service(automations::next_run)
            .service(automations::get_logs)
            .service(automations::get_stats),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{
        PlanCatalog, StoreWorkspaceDirectory, WebhookError, WebhookRequest, WebhookSender,
    };
    use crate::services::{ActionPipeline, AutomationEngine};
    use crate::store::{AutomationRepository, MemoryEntityStore};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;

    struct RejectingWebhooks;

    #[async_trait]
    impl WebhookSender for RejectingWebhooks {
        async fn send(&self, _request: &WebhookRequest) -> Result<(), WebhookError> {
            Err(WebhookError::Status(500))
        }
    }

    fn engine() -> AutomationEngine {
        let repository = AutomationRepository::new(Arc::new(MemoryEntityStore::new()));
        let pipeline = ActionPipeline::new(
            Arc::new(RejectingWebhooks),
            Arc::new(StoreWorkspaceDirectory::new(repository.clone())),
        );
        AutomationEngine::new(repository, pipeline, Arc::new(PlanCatalog::default()))
    }

    fn hot_room() -> JsonValue {
        json!({
            "name": "Hot room",
            "triggerType": "device_data",
            "triggerConfig": {
                "type": "device_data",
                "deviceId": "D",
                "conditions": [{"field": "temp", "operator": "greater_than", "value": 30}]
            },
            "actions": [
                {"type": "send_webhook", "url": "https://hooks.example.com/hot"},
                {"type": "log", "message": "hot"}
            ]
        })
    }

    #[actix_rt::test]
    async fn test_ingest_fires_and_records() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(engine()))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/api/workspaces/ws1/automations/r1")
            .set_json(hot_room())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::post()
            .uri("/api/workspaces/ws1/devices/D/data")
            .set_json(json!({"temp": 32}))
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["fired"], 1);
        assert_eq!(body["runs"][0]["automationId"], "r1");
        assert_eq!(body["runs"][0]["status"], "partial_failure");
        assert_eq!(body["runs"][0]["failedActions"], 1);

        let req = test::TestRequest::post()
            .uri("/api/workspaces/ws1/devices/D/data")
            .set_json(json!({"temp": 28}))
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["fired"], 0);

        let req = test::TestRequest::get().uri("/api/automations/r1/stats").to_request();
        let stats: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["totalExecutions"], 1);
        assert_eq!(stats["partialFailureCount"], 1);

        let req = test::TestRequest::get().uri("/api/automations/r1/logs").to_request();
        let logs: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
        assert_eq!(logs[0]["actionResults"][0]["status"], "failure");
        assert_eq!(logs[0]["actionResults"][1]["status"], "success");
    }

    #[actix_rt::test]
    async fn test_mismatched_trigger_is_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(engine()))
                .configure(config),
        )
        .await;

        let mut automation = hot_room();
        automation["triggerType"] = json!("schedule");
        let req = test::TestRequest::put()
            .uri("/api/workspaces/ws1/automations/r1")
            .set_json(automation)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_status_and_stats_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(engine()))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/workspaces/ws1/devices/D/status")
            .set_json(json!({"status": "online"}))
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["fired"], 0);

        let req = test::TestRequest::get().uri("/api/automations/nope/stats").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_warnings_endpoint() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(engine()))
                .configure(config),
        )
        .await;

        for (id, watches, target) in [("A", "thermo", "heater"), ("B", "heater", "thermo")] {
            let req = test::TestRequest::put()
                .uri(&format!("/api/workspaces/ws1/automations/{}", id))
                .set_json(json!({
                    "name": id,
                    "triggerType": "device_data",
                    "triggerConfig": {"type": "device_data", "deviceId": watches},
                    "actions": [{
                        "type": "update_device",
                        "targetDeviceId": target,
                        "field": "power",
                        "value": true
                    }]
                }))
                .to_request();
            assert!(test::call_service(&app, req).await.status().is_success());
        }

        let req = test::TestRequest::get()
            .uri("/api/workspaces/ws1/automations/warnings")
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["warnings"].as_array().unwrap().len(), 2);
    }

    #[actix_rt::test]
    async fn test_next_run_endpoint() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(engine()))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/automations/next-run?cron=0%209%20*%20*%201-5&after=2024-01-12T23:00:00Z")
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["nextRun"], "2024-01-15T09:00:00Z");

        let req = test::TestRequest::get()
            .uri("/api/automations/next-run?cron=0%200%2030%202%20*")
            .to_request();
        let body: JsonValue = test::call_and_read_body_json(&app, req).await;
        assert!(body["nextRun"].is_null());
    }
}

//! End-to-end match -> execute -> record flows against the in-memory store

use async_trait::async_trait;
use automation_core::integrations::{
    DeviceCommand, DeviceDispatcher, DeviceEndpoint, DispatchError, PlanCatalog,
    StoreWorkspaceDirectory, WebhookError, WebhookRequest, WebhookSender,
};
use automation_core::models::{ActionStatus, Automation, DeviceStatus, ExecutionStatus, Workspace};
use automation_core::services::{ActionPipeline, AutomationEngine};
use automation_core::store::{AutomationRepository, MemoryEntityStore};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingWebhooks {
    requests: Mutex<Vec<WebhookRequest>>,
}

#[async_trait]
impl WebhookSender for RecordingWebhooks {
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        self.requests.lock().unwrap().push(request.clone());
        if request.url.contains("broken") {
            Err(WebhookError::ConnectionError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct RecordingDevices {
    commands: Mutex<Vec<(String, DeviceCommand)>>,
}

#[async_trait]
impl DeviceDispatcher for RecordingDevices {
    fn transport_name(&self) -> &'static str {
        "recording"
    }

    async fn resolve(
        &self,
        workspace_id: &str,
        device_id: &str,
    ) -> Result<DeviceEndpoint, DispatchError> {
        if device_id == "ghost" {
            return Err(DispatchError::DeviceNotFound(device_id.to_string()));
        }
        Ok(DeviceEndpoint {
            workspace_id: workspace_id.to_string(),
            device_id: device_id.to_string(),
            address: device_id.to_string(),
        })
    }

    async fn deliver(
        &self,
        endpoint: &DeviceEndpoint,
        command: &DeviceCommand,
    ) -> Result<(), DispatchError> {
        self.commands
            .lock()
            .unwrap()
            .push((endpoint.address.clone(), command.clone()));
        Ok(())
    }
}

struct Harness {
    engine: AutomationEngine,
    webhooks: Arc<RecordingWebhooks>,
    devices: Arc<RecordingDevices>,
}

async fn harness() -> Harness {
    let repository = AutomationRepository::new(Arc::new(MemoryEntityStore::new()));
    repository
        .save_workspace(&Workspace {
            workspace_id: "ws1".to_string(),
            name: "Greenhouse".to_string(),
            plan: "starter".to_string(),
        })
        .await
        .unwrap();

    let webhooks = Arc::new(RecordingWebhooks::default());
    let devices = Arc::new(RecordingDevices::default());
    let pipeline = ActionPipeline::new(
        webhooks.clone(),
        Arc::new(StoreWorkspaceDirectory::new(repository.clone())),
    )
    .with_device_dispatcher(devices.clone());
    let plans = PlanCatalog::parse(PlanCatalog::DEFAULT_RETENTION).unwrap();

    Harness {
        engine: AutomationEngine::new(repository, pipeline, Arc::new(plans)),
        webhooks,
        devices,
    }
}

fn automation(value: JsonValue) -> Automation {
    serde_json::from_value(value).unwrap()
}

fn fields(value: JsonValue) -> serde_json::Map<String, JsonValue> {
    value.as_object().unwrap().clone()
}

#[tokio::test]
async fn test_partial_failure_flow() {
    let h = harness().await;
    h.engine
        .save_automation(&automation(json!({
            "automationId": "hot",
            "workspaceId": "ws1",
            "name": "Hot greenhouse",
            "triggerType": "device_data",
            "triggerConfig": {
                "type": "device_data",
                "deviceId": "thermo",
                "conditions": [{"field": "temp", "operator": "greater_than", "value": 30}]
            },
            "actions": [
                {"type": "send_webhook", "url": "https://broken.example.com/hook"},
                {"type": "update_device", "targetDeviceId": "vent", "field": "open", "value": true},
                {"type": "log", "message": "vent opened"}
            ]
        })))
        .await
        .unwrap();

    let runs = h
        .engine
        .handle_device_data("ws1", "thermo", fields(json!({"temp": 32})))
        .await;

    assert_eq!(runs.len(), 1);
    let statuses: Vec<ActionStatus> = runs[0].results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ActionStatus::Failure, ActionStatus::Success, ActionStatus::Success]
    );
    assert_eq!(runs[0].log.status, ExecutionStatus::PartialFailure);

    // starter plan retention
    let ttl = runs[0].log.expires_at.unwrap() - runs[0].log.executed_at;
    assert_eq!(ttl.num_days(), 30);

    let commands = h.devices.commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "vent");
    assert_eq!(commands[0].1.field, "open");
    assert_eq!(commands[0].1.context["workspaceName"], "Greenhouse");
    drop(commands);

    let requests = h.webhooks.requests.lock().unwrap();
    let body = requests[0].body.as_ref().unwrap();
    assert_eq!(body["automationId"], "hot");
    assert_eq!(body["triggerData"]["data"]["temp"], 32);
    drop(requests);

    let repository = h.engine.repository();
    let logs = repository.automation_logs("hot").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].log_id, runs[0].log.log_id);
    let stats = repository.automation_stats("hot").await.unwrap().unwrap();
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.partial_failure_count, 1);
}

#[tokio::test]
async fn test_condition_group_uses_other_device_snapshot() {
    let h = harness().await;
    h.engine
        .save_automation(&automation(json!({
            "automationId": "door-alarm",
            "workspaceId": "ws1",
            "name": "Door open while armed",
            "triggerType": "device_data",
            "triggerConfig": {
                "type": "device_data",
                "deviceId": "door",
                "conditions": [{"field": "open", "operator": "equals", "value": true}]
            },
            "conditionGroups": [{
                "deviceId": "panel",
                "conditions": [{"field": "mode", "operator": "equals", "value": "armed"}]
            }],
            "actions": [{"type": "log", "message": "intruder"}]
        })))
        .await
        .unwrap();

    // No panel snapshot yet: group fails
    let runs = h.engine.handle_device_data("ws1", "door", fields(json!({"open": true}))).await;
    assert!(runs.is_empty());

    h.engine.handle_device_data("ws1", "panel", fields(json!({"mode": "armed"}))).await;
    let runs = h.engine.handle_device_data("ws1", "door", fields(json!({"open": true}))).await;
    assert_eq!(runs.len(), 1);

    h.engine.handle_device_data("ws1", "panel", fields(json!({"mode": "home"}))).await;
    let runs = h.engine.handle_device_data("ws1", "door", fields(json!({"open": true}))).await;
    assert!(runs.is_empty());
}

#[tokio::test]
async fn test_disabled_and_failing_rules_do_not_block_others() {
    let h = harness().await;
    for (id, status, target) in [
        ("disabled", "disabled", "vent"),
        ("ghost", "active", "ghost"),
        ("lamp", "active", "lamp"),
    ] {
        h.engine
            .save_automation(&automation(json!({
                "automationId": id,
                "workspaceId": "ws1",
                "name": id,
                "status": status,
                "triggerType": "device_status",
                "triggerConfig": {"type": "device_status", "deviceId": "hub", "status": "offline"},
                "actions": [{
                    "type": "update_device",
                    "targetDeviceId": target,
                    "field": "power",
                    "value": false
                }]
            })))
            .await
            .unwrap();
    }

    let runs = h.engine.handle_device_status("ws1", "hub", DeviceStatus::Offline).await;

    let ids: Vec<&str> = runs.iter().map(|r| r.automation_id.as_str()).collect();
    assert_eq!(ids, vec!["ghost", "lamp"]);
    assert_eq!(runs[0].log.status, ExecutionStatus::Failure);
    assert!(runs[0].results[0].error.as_deref().unwrap().contains("ghost"));
    assert_eq!(runs[1].log.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_loop_warnings_for_workspace() {
    let h = harness().await;
    for (id, watches, target) in [("heat", "thermo", "heater"), ("cool", "heater", "thermo")] {
        h.engine
            .save_automation(&automation(json!({
                "automationId": id,
                "workspaceId": "ws1",
                "name": id,
                "triggerType": "device_data",
                "triggerConfig": {"type": "device_data", "deviceId": watches},
                "actions": [{
                    "type": "update_device",
                    "targetDeviceId": target,
                    "field": "power",
                    "value": true
                }]
            })))
            .await
            .unwrap();
    }

    let warnings = h.engine.loop_warnings("ws1").await.unwrap();
    assert_eq!(warnings.len(), 2);
}

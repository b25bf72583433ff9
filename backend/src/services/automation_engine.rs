use crate::{
    integrations::PlanLimitsLookup,
    models::{
        ActionExecutionResult, Automation, AutomationLog, DeviceSnapshot, DeviceStatus, FactMap,
        PlanLimits, TriggerType,
    },
    services::{
        action_pipeline::{ActionContext, ActionPipeline},
        condition_gate::ConditionGate,
        cron::CronEngine,
        execution_recorder::ExecutionRecorder,
        loop_advisor::validate_automation_graph,
        trigger_matcher::TriggerMatcher,
    },
    store::{AutomationRepository, StoreError},
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Plan assumed for workspaces that were never registered
const FALLBACK_PLAN: &str = "free";

/// Outcome of one automation firing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRun {
    pub automation_id: String,
    pub results: Vec<ActionExecutionResult>,
    pub log: AutomationLog,
}

#[derive(Debug, Clone)]
pub enum SaveAutomationError {
    Invalid(String),
    Store(StoreError),
}

impl std::fmt::Display for SaveAutomationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveAutomationError::Invalid(msg) => write!(f, "Invalid automation: {}", msg),
            SaveAutomationError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SaveAutomationError {}

impl From<StoreError> for SaveAutomationError {
    fn from(err: StoreError) -> Self {
        SaveAutomationError::Store(err)
    }
}

/// Entry point for inbound events: matches rules, runs their pipelines
/// concurrently and records every firing
#[derive(Clone)]
pub struct AutomationEngine {
    repository: AutomationRepository,
    matcher: TriggerMatcher,
    pipeline: ActionPipeline,
    recorder: ExecutionRecorder,
    plans: Arc<dyn PlanLimitsLookup>,
}

impl AutomationEngine {
    pub fn new(
        repository: AutomationRepository,
        pipeline: ActionPipeline,
        plans: Arc<dyn PlanLimitsLookup>,
    ) -> Self {
        Self {
            matcher: TriggerMatcher::new(
                CronEngine::default(),
                ConditionGate::new(repository.clone()),
            ),
            recorder: ExecutionRecorder::new(repository.store()),
            repository,
            pipeline,
            plans,
        }
    }

    /// Replace the cron engine (e.g. one with a fixed calendar source)
    pub fn with_cron_engine(mut self, cron: CronEngine) -> Self {
        self.matcher = TriggerMatcher::new(cron, ConditionGate::new(self.repository.clone()));
        self
    }

    pub fn repository(&self) -> &AutomationRepository {
        &self.repository
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    /// Store the reported fields as the device's latest snapshot, then fire
    /// every device-data rule they satisfy
    pub async fn handle_device_data(
        &self,
        workspace_id: &str,
        device_id: &str,
        fields: FactMap,
    ) -> Vec<AutomationRun> {
        self.store_snapshot(workspace_id, device_id, &fields).await;

        let automations = self.load_automations(workspace_id).await;
        let matched = self
            .matcher
            .match_device_data(&automations, device_id, &fields)
            .await;

        let trigger_data = json!({ "deviceId": device_id, "data": fields });
        self.fire(workspace_id, matched, TriggerType::DeviceData, trigger_data)
            .await
    }

    pub async fn handle_device_status(
        &self,
        workspace_id: &str,
        device_id: &str,
        status: DeviceStatus,
    ) -> Vec<AutomationRun> {
        let automations = self.load_automations(workspace_id).await;
        let matched = self
            .matcher
            .match_device_status(&automations, device_id, status)
            .await;

        let trigger_data = json!({ "deviceId": device_id, "status": status.as_str() });
        self.fire(workspace_id, matched, TriggerType::DeviceStatus, trigger_data)
            .await
    }

    /// Periodic tick across every registered workspace. Workspaces are
    /// ticked concurrently; runs come back grouped in registry order.
    pub async fn handle_schedule_tick(&self, now: DateTime<Utc>) -> Vec<AutomationRun> {
        let workspace_ids = match self.repository.workspace_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list workspaces for schedule tick: {}", e);
                return Vec::new();
            }
        };

        debug!("Schedule tick {} over {} workspaces", now, workspace_ids.len());

        let mut tasks = JoinSet::new();
        for (position, workspace_id) in workspace_ids.into_iter().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move {
                let runs = engine.handle_workspace_tick(&workspace_id, now).await;
                (position, runs)
            });
        }

        let mut ticks = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tick) => ticks.push(tick),
                Err(e) => error!("Workspace tick aborted: {}", e),
            }
        }
        ticks.sort_by_key(|(position, _)| *position);
        ticks.into_iter().flat_map(|(_, runs)| runs).collect()
    }

    pub async fn handle_workspace_tick(
        &self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<AutomationRun> {
        let automations = self.load_automations(workspace_id).await;
        let matched = self.matcher.match_schedule(&automations, now).await;

        let trigger_data = json!({ "scheduledAt": now });
        self.fire(workspace_id, matched, TriggerType::Schedule, trigger_data)
            .await
    }

    // =========================================================================
    // Rule management helpers
    // =========================================================================

    pub async fn save_automation(
        &self,
        automation: &Automation,
    ) -> Result<(), SaveAutomationError> {
        automation.validate().map_err(SaveAutomationError::Invalid)?;
        self.repository.save_automation(automation).await?;
        info!(
            "Saved automation '{}' ({}) in workspace {}",
            automation.name, automation.automation_id, automation.workspace_id
        );
        Ok(())
    }

    /// Possible feedback loops between the workspace's rules
    pub async fn loop_warnings(&self, workspace_id: &str) -> Result<Vec<String>, StoreError> {
        let automations = self.repository.automations(workspace_id).await?;
        Ok(validate_automation_graph(&automations))
    }

    pub fn next_run(
        &self,
        cron: &str,
        timezone: Option<&str>,
        after: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.matcher.cron().next_match(cron, after, timezone)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn store_snapshot(&self, workspace_id: &str, device_id: &str, fields: &FactMap) {
        let mut merged = match self.repository.device_snapshot(workspace_id, device_id).await {
            Ok(Some(previous)) => previous.fields,
            Ok(None) => FactMap::new(),
            Err(e) => {
                warn!("Could not read snapshot of {}/{}: {}", workspace_id, device_id, e);
                FactMap::new()
            }
        };
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));

        let snapshot = DeviceSnapshot {
            device_id: device_id.to_string(),
            fields: merged,
            updated_at: Utc::now(),
        };
        if let Err(e) = self
            .repository
            .save_device_snapshot(workspace_id, &snapshot)
            .await
        {
            error!("Failed to store snapshot of {}/{}: {}", workspace_id, device_id, e);
        }
    }

    async fn load_automations(&self, workspace_id: &str) -> Vec<Automation> {
        match self.repository.automations(workspace_id).await {
            Ok(automations) => automations,
            Err(e) => {
                error!("Failed to load automations for workspace {}: {}", workspace_id, e);
                Vec::new()
            }
        }
    }

    async fn plan_limits(&self, workspace_id: &str) -> PlanLimits {
        let plan = match self.repository.workspace(workspace_id).await {
            Ok(Some(workspace)) => workspace.plan,
            Ok(None) => FALLBACK_PLAN.to_string(),
            Err(e) => {
                warn!("Could not read plan of workspace {}: {}", workspace_id, e);
                FALLBACK_PLAN.to_string()
            }
        };
        self.plans.get_plan_limits(&plan)
    }

    /// Execute and record every matched rule concurrently. Runs come back
    /// in match order.
    async fn fire(
        &self,
        workspace_id: &str,
        matched: Vec<Automation>,
        trigger_type: TriggerType,
        trigger_data: JsonValue,
    ) -> Vec<AutomationRun> {
        if matched.is_empty() {
            return Vec::new();
        }

        let limits = self.plan_limits(workspace_id).await;
        let fired_at = Utc::now();
        let mut tasks = JoinSet::new();

        for (position, automation) in matched.into_iter().enumerate() {
            info!(
                "Automation '{}' ({}) fired by {}",
                automation.name,
                automation.automation_id,
                trigger_type.as_str()
            );

            let engine = self.clone();
            let context = ActionContext {
                automation_id: automation.automation_id.clone(),
                automation_name: automation.name.clone(),
                workspace_id: workspace_id.to_string(),
                workspace_name: workspace_id.to_string(),
                trigger_type,
                trigger_data: trigger_data.clone(),
                fired_at,
            };
            let trigger_data = trigger_data.clone();

            tasks.spawn(async move {
                let started = Instant::now();
                let results = engine.pipeline.execute(&automation.actions, context).await;
                let total_duration_ms = started.elapsed().as_millis() as u64;

                let log = engine
                    .recorder
                    .record(
                        &automation,
                        trigger_type,
                        trigger_data,
                        results.clone(),
                        total_duration_ms,
                        &limits,
                    )
                    .await;

                info!(
                    "Automation {} finished: {} in {} ms",
                    automation.automation_id,
                    log.status.as_str(),
                    total_duration_ms
                );

                (
                    position,
                    AutomationRun {
                        automation_id: automation.automation_id,
                        results,
                        log,
                    },
                )
            });
        }

        let mut runs = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(run) => runs.push(run),
                Err(e) => error!("Automation run aborted: {}", e),
            }
        }
        runs.sort_by_key(|(position, _)| *position);
        runs.into_iter().map(|(_, run)| run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{
        PlanCatalog, StoreWorkspaceDirectory, WebhookError, WebhookRequest, WebhookSender,
    };
    use crate::models::{ActionStatus, ExecutionStatus, Workspace};
    use crate::store::MemoryEntityStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct NoopWebhooks;

    #[async_trait]
    impl WebhookSender for NoopWebhooks {
        async fn send(&self, _request: &WebhookRequest) -> Result<(), WebhookError> {
            Ok(())
        }
    }

    fn engine() -> AutomationEngine {
        let repository = AutomationRepository::new(Arc::new(MemoryEntityStore::new()));
        let pipeline = ActionPipeline::new(
            Arc::new(NoopWebhooks),
            Arc::new(StoreWorkspaceDirectory::new(repository.clone())),
        );
        let plans = PlanCatalog::parse(PlanCatalog::DEFAULT_RETENTION).unwrap();
        AutomationEngine::new(repository, pipeline, Arc::new(plans))
    }

    fn automation(id: &str, trigger: JsonValue) -> Automation {
        serde_json::from_value(json!({
            "automationId": id,
            "workspaceId": "ws1",
            "name": format!("rule {}", id),
            "triggerType": trigger["type"].clone(),
            "triggerConfig": trigger,
            "actions": [{"type": "log", "message": "fired"}]
        }))
        .unwrap()
    }

    fn fields(value: JsonValue) -> FactMap {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_device_data_fires_matching_rule() {
        let engine = engine();
        engine
            .save_automation(&automation(
                "r1",
                json!({"type": "device_data", "deviceId": "D", "conditions": [
                    {"field": "temp", "operator": "greater_than", "value": 30}
                ]}),
            ))
            .await
            .unwrap();

        let runs = engine.handle_device_data("ws1", "D", fields(json!({"temp": 32}))).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].automation_id, "r1");
        assert_eq!(runs[0].results[0].status, ActionStatus::Success);
        assert_eq!(runs[0].log.trigger_data["data"]["temp"], 32);

        let cooler = engine.handle_device_data("ws1", "D", fields(json!({"temp": 28}))).await;
        assert!(cooler.is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_merge_fields() {
        let engine = engine();
        engine.handle_device_data("ws1", "D", fields(json!({"temp": 20}))).await;
        engine.handle_device_data("ws1", "D", fields(json!({"humidity": 40}))).await;

        let snapshot = engine.repository().device_snapshot("ws1", "D").await.unwrap().unwrap();
        assert_eq!(snapshot.fields["temp"], 20);
        assert_eq!(snapshot.fields["humidity"], 40);
    }

    #[tokio::test]
    async fn test_device_status_fires_only_on_configured_transition() {
        let engine = engine();
        engine
            .save_automation(&automation(
                "offline-alert",
                json!({"type": "device_status", "deviceId": "D", "status": "offline"}),
            ))
            .await
            .unwrap();

        assert!(engine.handle_device_status("ws1", "D", DeviceStatus::Online).await.is_empty());
        let runs = engine.handle_device_status("ws1", "D", DeviceStatus::Offline).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].log.trigger_data["status"], "offline");
    }

    #[tokio::test]
    async fn test_schedule_tick_walks_registered_workspaces() {
        let engine = engine();
        engine
            .repository()
            .save_workspace(&Workspace {
                workspace_id: "ws1".to_string(),
                name: "Office".to_string(),
                plan: "pro".to_string(),
            })
            .await
            .unwrap();
        engine
            .save_automation(&automation(
                "morning",
                json!({"type": "schedule", "cron": "0 9 * * *"}),
            ))
            .await
            .unwrap();

        let nine = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let runs = engine.handle_schedule_tick(nine).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].log.status, ExecutionStatus::Success);
        // pro plan keeps logs for 90 days
        let ttl = runs[0].log.expires_at.unwrap() - runs[0].log.executed_at;
        assert_eq!(ttl.num_days(), 90);

        let ten_past = Utc.with_ymd_and_hms(2024, 3, 4, 9, 10, 0).unwrap();
        assert!(engine.handle_schedule_tick(ten_past).await.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_tick_reaches_workspace_known_only_by_its_rules() {
        let engine = engine();
        engine
            .save_automation(&automation(
                "hourly",
                json!({"type": "schedule", "cron": "0 * * * *"}),
            ))
            .await
            .unwrap();

        let on_the_hour = Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap();
        let runs = engine.handle_schedule_tick(on_the_hour).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].automation_id, "hourly");
        assert_eq!(runs[0].log.workspace_id, "ws1");
    }

    #[tokio::test]
    async fn test_slow_workspace_does_not_delay_others_on_tick() {
        let engine = engine();
        for (workspace_id, id, action) in [
            ("ws-slow", "slow", json!({"type": "log", "message": "late", "delayMs": 1500})),
            ("ws-fast", "fast", json!({"type": "log", "message": "early"})),
        ] {
            let mut rule = automation(id, json!({"type": "schedule", "cron": "* * * * *"}));
            rule.workspace_id = workspace_id.to_string();
            rule.actions = vec![serde_json::from_value(action).unwrap()];
            engine.save_automation(&rule).await.unwrap();
        }

        let tick_started = Utc::now();
        let runs = engine.handle_schedule_tick(tick_started).await;

        assert_eq!(runs.len(), 2);
        let fast = runs.iter().find(|r| r.automation_id == "fast").unwrap();
        let slow = runs.iter().find(|r| r.automation_id == "slow").unwrap();
        assert!(fast.log.executed_at - tick_started < chrono::Duration::milliseconds(1000));
        assert!(slow.log.executed_at - tick_started >= chrono::Duration::milliseconds(1500));
    }

    #[tokio::test]
    async fn test_unregistered_workspace_uses_fallback_plan() {
        let engine = engine();
        engine
            .save_automation(&automation(
                "s",
                json!({"type": "device_status", "deviceId": "D", "status": "online"}),
            ))
            .await
            .unwrap();
        let runs = engine.handle_device_status("ws1", "D", DeviceStatus::Online).await;
        let ttl = runs[0].log.expires_at.unwrap() - runs[0].log.executed_at;
        assert_eq!(ttl.num_days(), 7);
    }

    #[tokio::test]
    async fn test_save_rejects_mismatched_trigger() {
        let engine = engine();
        let mut bad = automation("x", json!({"type": "schedule", "cron": "* * * * *"}));
        bad.trigger_type = TriggerType::DeviceData;
        assert!(matches!(
            engine.save_automation(&bad).await,
            Err(SaveAutomationError::Invalid(_))
        ));
        assert!(engine.repository().automations("ws1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_many_matches_run_and_return_in_order() {
        let engine = engine();
        for id in ["a", "b", "c", "d"] {
            engine
                .save_automation(&automation(
                    id,
                    json!({"type": "device_status", "deviceId": "D", "status": "online"}),
                ))
                .await
                .unwrap();
        }
        let runs = engine.handle_device_status("ws1", "D", DeviceStatus::Online).await;
        let ids: Vec<&str> = runs.iter().map(|r| r.automation_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let stats = engine.repository().automation_stats("c").await.unwrap().unwrap();
        assert_eq!(stats.total_executions, 1);
    }

    #[test]
    fn test_next_run() {
        let engine = engine();
        let friday_night = Utc.with_ymd_and_hms(2024, 1, 12, 23, 0, 0).unwrap();
        assert_eq!(
            engine.next_run("0 9 * * 1-5", None, friday_night),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap())
        );
        assert_eq!(engine.next_run("bad", None, friday_night), None);
    }
}

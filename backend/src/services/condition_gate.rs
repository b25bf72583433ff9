use crate::{
    models::{Automation, ConditionGroup, FactMap, Logic},
    services::condition::evaluate_all,
    store::AutomationRepository,
};
use log::{debug, error};

/// Facts already delivered by the triggering event
#[derive(Debug, Clone, Copy)]
pub struct KnownFacts<'a> {
    pub device_id: &'a str,
    pub facts: &'a FactMap,
}

/// Evaluates an automation's secondary condition groups against live
/// device state
#[derive(Clone)]
pub struct ConditionGate {
    repository: AutomationRepository,
}

impl ConditionGate {
    pub fn new(repository: AutomationRepository) -> Self {
        Self { repository }
    }

    /// No groups means the gate is open. Devices without a stored snapshot
    /// (or whose snapshot cannot be read) fail their group.
    pub async fn passes(&self, automation: &Automation, known: Option<KnownFacts<'_>>) -> bool {
        if automation.condition_groups.is_empty() {
            return true;
        }

        let mut outcomes = Vec::with_capacity(automation.condition_groups.len());
        for group in &automation.condition_groups {
            let passed = self
                .group_passes(&automation.workspace_id, group, known)
                .await;
            debug!(
                "Automation {} condition group on device {}: {}",
                automation.automation_id, group.device_id, passed
            );
            outcomes.push(passed);
        }

        match automation.condition_logic {
            Logic::And => outcomes.iter().all(|p| *p),
            Logic::Or => outcomes.iter().any(|p| *p),
        }
    }

    async fn group_passes(
        &self,
        workspace_id: &str,
        group: &ConditionGroup,
        known: Option<KnownFacts<'_>>,
    ) -> bool {
        if let Some(known) = known.filter(|k| k.device_id == group.device_id) {
            return evaluate_all(&group.conditions, group.logic, known.facts);
        }

        match self
            .repository
            .device_snapshot(workspace_id, &group.device_id)
            .await
        {
            Ok(Some(snapshot)) => evaluate_all(&group.conditions, group.logic, &snapshot.fields),
            Ok(None) => false,
            Err(e) => {
                error!(
                    "Failed to load state of device {} in workspace {}: {}",
                    group.device_id, workspace_id, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceSnapshot;
    use crate::store::MemoryEntityStore;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn automation(groups: serde_json::Value, logic: &str) -> Automation {
        serde_json::from_value(json!({
            "automationId": "a1",
            "workspaceId": "ws1",
            "name": "Gate",
            "triggerType": "device_status",
            "triggerConfig": {"type": "device_status", "deviceId": "d1", "status": "online"},
            "conditionGroups": groups,
            "conditionLogic": logic
        }))
        .unwrap()
    }

    async fn gate_with(snapshots: Vec<(&str, serde_json::Value)>) -> ConditionGate {
        let repo = AutomationRepository::new(Arc::new(MemoryEntityStore::new()));
        for (device_id, fields) in snapshots {
            repo.save_device_snapshot(
                "ws1",
                &DeviceSnapshot {
                    device_id: device_id.to_string(),
                    fields: fields.as_object().cloned().unwrap(),
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }
        ConditionGate::new(repo)
    }

    #[tokio::test]
    async fn test_no_groups_passes() {
        let gate = gate_with(vec![]).await;
        assert!(gate.passes(&automation(json!([]), "AND"), None).await);
    }

    #[tokio::test]
    async fn test_groups_use_stored_snapshots() {
        let gate = gate_with(vec![("d2", json!({"door": "closed"}))]).await;
        let a = automation(
            json!([{
                "deviceId": "d2",
                "conditions": [{"field": "door", "operator": "equals", "value": "closed"}]
            }]),
            "AND",
        );
        assert!(gate.passes(&a, None).await);
    }

    #[tokio::test]
    async fn test_missing_snapshot_fails_closed() {
        let gate = gate_with(vec![]).await;
        let a = automation(json!([{"deviceId": "ghost", "conditions": []}]), "AND");
        assert!(!gate.passes(&a, None).await);
    }

    #[tokio::test]
    async fn test_known_facts_take_precedence_over_store() {
        let gate = gate_with(vec![("d1", json!({"temp": 10}))]).await;
        let a = automation(
            json!([{
                "deviceId": "d1",
                "conditions": [{"field": "temp", "operator": "greater_than", "value": 30}]
            }]),
            "AND",
        );
        let live = json!({"temp": 35}).as_object().cloned().unwrap();
        let known = KnownFacts {
            device_id: "d1",
            facts: &live,
        };
        assert!(gate.passes(&a, Some(known)).await);
        assert!(!gate.passes(&a, None).await);
    }

    #[tokio::test]
    async fn test_or_across_groups() {
        let gate = gate_with(vec![("d2", json!({"on": true}))]).await;
        let groups = json!([
            {"deviceId": "ghost", "conditions": []},
            {"deviceId": "d2", "conditions": [{"field": "on", "operator": "equals", "value": true}]}
        ]);
        assert!(gate.passes(&automation(groups.clone(), "OR"), None).await);
        assert!(!gate.passes(&automation(groups, "AND"), None).await);
    }
}

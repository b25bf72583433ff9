use crate::{
    models::{Automation, DeviceStatus, FactMap, TriggerConfig},
    services::{
        condition::evaluate_all,
        condition_gate::{ConditionGate, KnownFacts},
        cron::CronEngine,
    },
};
use chrono::{DateTime, Utc};

/// Selects the active automations an event fires. Trigger predicates are
/// checked first, then the condition-group gate.
#[derive(Clone)]
pub struct TriggerMatcher {
    cron: CronEngine,
    gate: ConditionGate,
}

impl TriggerMatcher {
    pub fn new(cron: CronEngine, gate: ConditionGate) -> Self {
        Self { cron, gate }
    }

    pub fn cron(&self) -> &CronEngine {
        &self.cron
    }

    pub async fn match_device_data(
        &self,
        automations: &[Automation],
        device_id: &str,
        fields: &FactMap,
    ) -> Vec<Automation> {
        let candidates = device_data_candidates(automations, device_id, fields);
        let known = KnownFacts {
            device_id,
            facts: fields,
        };
        self.gate_all(candidates, Some(known)).await
    }

    pub async fn match_device_status(
        &self,
        automations: &[Automation],
        device_id: &str,
        status: DeviceStatus,
    ) -> Vec<Automation> {
        let candidates = device_status_candidates(automations, device_id, status);
        self.gate_all(candidates, None).await
    }

    pub async fn match_schedule(
        &self,
        automations: &[Automation],
        now: DateTime<Utc>,
    ) -> Vec<Automation> {
        let candidates = schedule_candidates(&self.cron, automations, now);
        self.gate_all(candidates, None).await
    }

    async fn gate_all(
        &self,
        candidates: Vec<&Automation>,
        known: Option<KnownFacts<'_>>,
    ) -> Vec<Automation> {
        let mut matched = Vec::new();
        for automation in candidates {
            if self.gate.passes(automation, known).await {
                matched.push(automation.clone());
            }
        }
        matched
    }
}

/// Active device-data automations on `device_id` whose own conditions hold
pub fn device_data_candidates<'a>(
    automations: &'a [Automation],
    device_id: &str,
    fields: &FactMap,
) -> Vec<&'a Automation> {
    automations
        .iter()
        .filter(|a| a.is_active() && a.validate().is_ok())
        .filter(|a| match &a.trigger_config {
            TriggerConfig::DeviceData(trigger) => {
                trigger.device_id == device_id
                    && evaluate_all(&trigger.conditions, trigger.logic, fields)
            }
            _ => false,
        })
        .collect()
}

/// Active device-status automations waiting for exactly this transition
pub fn device_status_candidates<'a>(
    automations: &'a [Automation],
    device_id: &str,
    status: DeviceStatus,
) -> Vec<&'a Automation> {
    automations
        .iter()
        .filter(|a| a.is_active() && a.validate().is_ok())
        .filter(|a| match &a.trigger_config {
            TriggerConfig::DeviceStatus(trigger) => {
                trigger.device_id == device_id && trigger.status == status
            }
            _ => false,
        })
        .collect()
}

/// Active schedule automations whose cron matches `now`
pub fn schedule_candidates<'a>(
    cron: &CronEngine,
    automations: &'a [Automation],
    now: DateTime<Utc>,
) -> Vec<&'a Automation> {
    automations
        .iter()
        .filter(|a| a.is_active() && a.validate().is_ok())
        .filter(|a| match &a.trigger_config {
            TriggerConfig::Schedule(trigger) => {
                cron.matches(&trigger.cron, now, trigger.timezone.as_deref())
            }
            _ => false,
        })
        .collect()
}

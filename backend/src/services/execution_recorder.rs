use crate::{
    models::{
        ActionExecutionResult, Automation, AutomationLog, AutomationStats, ExecutionStatus,
        LogIndexEntry, PlanLimits, TriggerType,
    },
    store::{keys, Entity, EntityStore, StoreError},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, warn};
use rand::Rng;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Attempts made to land a stats update before giving up
const STATS_MAX_ATTEMPTS: u32 = 8;
const STATS_BACKOFF_BASE_MS: u64 = 5;

/// Persists one log per firing, its per-automation index row, and folds
/// the outcome into the automation's rolling stats
#[derive(Clone)]
pub struct ExecutionRecorder {
    store: Arc<dyn EntityStore>,
}

impl ExecutionRecorder {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Build and persist the log. Store failures are logged, never returned;
    /// the log is handed back either way.
    pub async fn record(
        &self,
        automation: &Automation,
        trigger_type: TriggerType,
        trigger_data: JsonValue,
        action_results: Vec<ActionExecutionResult>,
        total_duration_ms: u64,
        limits: &PlanLimits,
    ) -> AutomationLog {
        let executed_at = Utc::now();
        let log = AutomationLog {
            // time-ordered, so same-instant logs keep their record order
            log_id: uuid::Uuid::now_v7().to_string(),
            automation_id: automation.automation_id.clone(),
            workspace_id: automation.workspace_id.clone(),
            trigger_type,
            trigger_data,
            status: ExecutionStatus::from_results(&action_results),
            action_results,
            total_duration_ms,
            executed_at,
            expires_at: expiry_for(executed_at, limits),
        };

        if let Err(e) = self.write_log(&log).await {
            error!(
                "Failed to persist log {} for automation {}: {}",
                log.log_id, log.automation_id, e
            );
        }

        if let Err(e) = self
            .update_stats(&log.automation_id, log.status, executed_at, total_duration_ms)
            .await
        {
            error!("Failed to update stats for automation {}: {}", log.automation_id, e);
        }

        log
    }

    async fn write_log(&self, log: &AutomationLog) -> Result<(), StoreError> {
        let (pk, sk) = keys::log(&log.workspace_id, log.executed_at, &log.log_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::to_value(log)?).with_expiry(log.expires_at))
            .await?;

        let index = LogIndexEntry {
            log_id: log.log_id.clone(),
            automation_id: log.automation_id.clone(),
            workspace_id: log.workspace_id.clone(),
            status: log.status,
            executed_at: log.executed_at,
        };
        let (pk, sk) = keys::log_index(&log.automation_id, log.executed_at, &log.log_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::to_value(&index)?).with_expiry(log.expires_at))
            .await
    }

    /// Compare-and-swap loop on the stats row's version so concurrent
    /// firings of one automation cannot overwrite each other's counts
    async fn update_stats(
        &self,
        automation_id: &str,
        status: ExecutionStatus,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Result<(), StoreError> {
        let (pk, sk) = keys::stats(automation_id);

        for attempt in 1..=STATS_MAX_ATTEMPTS {
            let current = self.store.get(&pk, &sk).await?;
            let (mut stats, expected) = match current {
                Some(entity) => (
                    serde_json::from_value::<AutomationStats>(entity.data)?,
                    Some(entity.version),
                ),
                None => (AutomationStats::new(automation_id), None),
            };

            stats.apply(status, executed_at, duration_ms);
            let entity = Entity::new(pk.clone(), sk.clone(), serde_json::to_value(&stats)?);

            if self.store.put_if_version(entity, expected).await? {
                return Ok(());
            }

            debug!(
                "Stats update for {} lost a race (attempt {}/{})",
                automation_id, attempt, STATS_MAX_ATTEMPTS
            );
            let jitter = rand::rng().random_range(0..=STATS_BACKOFF_BASE_MS * attempt as u64);
            tokio::time::sleep(Duration::from_millis(STATS_BACKOFF_BASE_MS + jitter)).await;
        }

        warn!(
            "Giving up on stats update for {} after {} attempts",
            automation_id, STATS_MAX_ATTEMPTS
        );
        Err(StoreError::Conflict(format!("stats for automation {}", automation_id)))
    }
}

/// Retention past the representable date range means the log never expires
fn expiry_for(executed_at: DateTime<Utc>, limits: &PlanLimits) -> Option<DateTime<Utc>> {
    limits
        .ttl_days
        .and_then(|days| ChronoDuration::try_days(i64::from(days)))
        .and_then(|ttl| executed_at.checked_add_signed(ttl))
}

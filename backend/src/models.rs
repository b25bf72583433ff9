use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;

/// Field name -> value pairs a condition is evaluated against
pub type FactMap = Map<String, JsonValue>;

// ============================================================================
// Automation definition
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    DeviceData,
    DeviceStatus,
    Schedule,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::DeviceData => "device_data",
            TriggerType::DeviceStatus => "device_status",
            TriggerType::Schedule => "schedule",
        }
    }
}

/// How a list of boolean checks is combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    /// Anything this build does not understand; never matches
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDataTrigger {
    pub device_id: String,
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusTrigger {
    pub device_id: String,
    pub status: DeviceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    DeviceData(DeviceDataTrigger),
    DeviceStatus(DeviceStatusTrigger),
    Schedule(ScheduleTrigger),
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::DeviceData(_) => TriggerType::DeviceData,
            TriggerConfig::DeviceStatus(_) => TriggerType::DeviceStatus,
            TriggerConfig::Schedule(_) => TriggerType::Schedule,
        }
    }
}

/// Secondary gate bound to a single device's last known fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub device_id: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAction {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAction {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceAction {
    pub target_device_id: String,
    pub field: String,
    pub value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAction {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayAction {
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Log(LogAction),
    SendWebhook(WebhookAction),
    UpdateDevice(UpdateDeviceAction),
    SendEmail(EmailAction),
    Delay(DelayAction),
}

impl ActionConfig {
    pub fn action_type(&self) -> &'static str {
        match self {
            ActionConfig::Log(_) => "log",
            ActionConfig::SendWebhook(_) => "send_webhook",
            ActionConfig::UpdateDevice(_) => "update_device",
            ActionConfig::SendEmail(_) => "send_email",
            ActionConfig::Delay(_) => "delay",
        }
    }

    /// Scheduling delay applied before the action runs. `delay` actions
    /// carry their wait as the action itself, not as a pre-delay.
    pub fn pre_delay(&self) -> Option<Duration> {
        let delay_ms = match self {
            ActionConfig::Log(a) => a.delay_ms,
            ActionConfig::SendWebhook(a) => a.delay_ms,
            ActionConfig::UpdateDevice(a) => a.delay_ms,
            ActionConfig::SendEmail(a) => a.delay_ms,
            ActionConfig::Delay(_) => None,
        };
        delay_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

// ============================================================================
// Automation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub automation_id: String,
    pub workspace_id: String,
    pub name: String,
    #[serde(default)]
    pub status: AutomationStatus,
    pub trigger_type: TriggerType,
    pub trigger_config: TriggerConfig,
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub condition_logic: Logic,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

impl Automation {
    pub fn is_active(&self) -> bool {
        self.status == AutomationStatus::Active
    }

    /// Checks the structural invariants an automation must hold before it is stored
    pub fn validate(&self) -> Result<(), String> {
        if self.automation_id.trim().is_empty() {
            return Err("automationId must not be empty".to_string());
        }
        if self.workspace_id.trim().is_empty() {
            return Err("workspaceId must not be empty".to_string());
        }
        if self.trigger_config.trigger_type() != self.trigger_type {
            return Err(format!(
                "triggerConfig.type '{}' does not match triggerType '{}'",
                self.trigger_config.trigger_type().as_str(),
                self.trigger_type.as_str()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Execution results, logs and stats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionResult {
    pub action_index: usize,
    pub action_type: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ActionExecutionResult {
    pub fn is_failure(&self) -> bool {
        self.status == ActionStatus::Failure
    }
}

/// Overall outcome of one automation firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    PartialFailure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::PartialFailure => "partial_failure",
        }
    }

    /// `failure` only when every attempted action failed, `partial_failure`
    /// when some did; an empty action list is a success.
    pub fn from_results(results: &[ActionExecutionResult]) -> Self {
        let failed = results.iter().filter(|r| r.is_failure()).count();
        if failed == 0 {
            ExecutionStatus::Success
        } else if failed == results.len() {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::PartialFailure
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationLog {
    pub log_id: String,
    pub automation_id: String,
    pub workspace_id: String,
    pub trigger_type: TriggerType,
    pub trigger_data: JsonValue,
    pub status: ExecutionStatus,
    pub action_results: Vec<ActionExecutionResult>,
    pub total_duration_ms: u64,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Secondary record listing a log under its automation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogIndexEntry {
    pub log_id: String,
    pub automation_id: String,
    pub workspace_id: String,
    pub status: ExecutionStatus,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStats {
    pub automation_id: String,
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub partial_failure_count: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub total_duration_ms: u64,
}

impl AutomationStats {
    pub fn new(automation_id: &str) -> Self {
        Self {
            automation_id: automation_id.to_string(),
            total_executions: 0,
            success_count: 0,
            failure_count: 0,
            partial_failure_count: 0,
            last_execution_at: None,
            last_execution_status: None,
            total_duration_ms: 0,
        }
    }

    pub fn apply(&mut self, status: ExecutionStatus, executed_at: DateTime<Utc>, duration_ms: u64) {
        self.total_executions += 1;
        match status {
            ExecutionStatus::Success => self.success_count += 1,
            ExecutionStatus::Failure => self.failure_count += 1,
            ExecutionStatus::PartialFailure => self.partial_failure_count += 1,
        }
        self.last_execution_at = Some(executed_at);
        self.last_execution_status = Some(status);
        self.total_duration_ms += duration_ms;
    }
}

// ============================================================================
// Workspaces and devices
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub workspace_id: String,
    pub name: String,
    #[serde(default = "default_plan")]
    pub plan: String,
}

fn default_plan() -> String {
    "free".to_string()
}

/// Retention-related limits of a billing plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<u32>,
}

/// Last known field values reported by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub fields: FactMap,
    pub updated_at: DateTime<Utc>,
}

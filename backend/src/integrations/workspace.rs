use crate::models::{PlanLimits, Workspace};
use crate::store::{AutomationRepository, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;

/// Looks up workspace metadata (display name, billing plan)
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    async fn workspace(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError>;
}

pub struct StoreWorkspaceDirectory {
    repository: AutomationRepository,
}

impl StoreWorkspaceDirectory {
    pub fn new(repository: AutomationRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl WorkspaceDirectory for StoreWorkspaceDirectory {
    async fn workspace(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError> {
        self.repository.workspace(workspace_id).await
    }
}

pub trait PlanLimitsLookup: Send + Sync {
    fn get_plan_limits(&self, plan: &str) -> PlanLimits;
}

/// Log retention per plan. Plans without an entry keep logs forever.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanCatalog {
    retention_days: HashMap<String, u32>,
}

impl PlanCatalog {
    pub const DEFAULT_RETENTION: &'static str = "free=7,starter=30,pro=90";

    /// Parse `plan=days` pairs separated by commas
    pub fn parse(entries: &str) -> Result<Self, String> {
        let mut retention_days = HashMap::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (plan, days) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected plan=days, got '{}'", entry))?;
            let days: u32 = days.trim().parse().map_err(|_| {
                format!(
                    "invalid retention days for plan '{}': '{}'",
                    plan.trim(),
                    days.trim()
                )
            })?;
            retention_days.insert(plan.trim().to_string(), days);
        }
        Ok(Self { retention_days })
    }
}

impl PlanLimitsLookup for PlanCatalog {
    fn get_plan_limits(&self, plan: &str) -> PlanLimits {
        PlanLimits {
            ttl_days: self.retention_days.get(plan).copied(),
        }
    }
}

use super::{keys, Entity, EntityStore, StoreError};
use crate::models::{
    Automation, AutomationLog, AutomationStats, DeviceSnapshot, LogIndexEntry, Workspace,
};
use log::warn;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Typed access to the documents the engine keeps in the entity store
#[derive(Clone)]
pub struct AutomationRepository {
    store: Arc<dyn EntityStore>,
}

impl AutomationRepository {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        (pk, sk): (String, String),
    ) -> Result<Option<T>, StoreError> {
        match self.store.get(&pk, &sk).await? {
            Some(entity) => Ok(Some(serde_json::from_value(entity.data)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Workspaces
    // =========================================================================

    pub async fn save_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let (pk, sk) = keys::workspace(&workspace.workspace_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::to_value(workspace)?))
            .await?;
        self.register_workspace(&workspace.workspace_id).await
    }

    /// Schedule ticks only visit workspaces listed here
    async fn register_workspace(&self, workspace_id: &str) -> Result<(), StoreError> {
        let (pk, sk) = keys::workspace_registry(workspace_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::json!({})))
            .await
    }

    pub async fn workspace(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError> {
        self.get_typed(keys::workspace(workspace_id)).await
    }

    pub async fn workspace_ids(&self) -> Result<Vec<String>, StoreError> {
        let entries = self
            .store
            .query_by_partition(keys::WORKSPACE_REGISTRY)
            .await?;
        Ok(entries.into_iter().map(|e| e.sk).collect())
    }

    // =========================================================================
    // Automations
    // =========================================================================

    pub async fn save_automation(&self, automation: &Automation) -> Result<(), StoreError> {
        let (pk, sk) = keys::automation(&automation.workspace_id, &automation.automation_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::to_value(automation)?))
            .await?;
        self.register_workspace(&automation.workspace_id).await
    }

    /// All automations of a workspace. Documents that no longer parse are
    /// skipped so one bad row cannot stop evaluation of the others.
    pub async fn automations(&self, workspace_id: &str) -> Result<Vec<Automation>, StoreError> {
        let entries = self
            .store
            .query_by_partition(&keys::workspace_partition(workspace_id))
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.sk.starts_with(keys::AUTOMATION_PREFIX))
            .filter_map(|e| match serde_json::from_value::<Automation>(e.data) {
                Ok(automation) => Some(automation),
                Err(err) => {
                    warn!("Skipping unreadable automation {}/{}: {}", e.pk, e.sk, err);
                    None
                }
            })
            .collect())
    }

    // =========================================================================
    // Device snapshots
    // =========================================================================

    pub async fn save_device_snapshot(
        &self,
        workspace_id: &str,
        snapshot: &DeviceSnapshot,
    ) -> Result<(), StoreError> {
        let (pk, sk) = keys::device_state(workspace_id, &snapshot.device_id);
        self.store
            .put(Entity::new(pk, sk, serde_json::to_value(snapshot)?))
            .await
    }

    pub async fn device_snapshot(
        &self,
        workspace_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceSnapshot>, StoreError> {
        self.get_typed(keys::device_state(workspace_id, device_id))
            .await
    }

    // =========================================================================
    // Execution history
    // =========================================================================

    /// Logs of one automation, oldest first
    pub async fn automation_logs(
        &self,
        automation_id: &str,
    ) -> Result<Vec<AutomationLog>, StoreError> {
        let index = self
            .store
            .query_by_partition(&keys::log_index_partition(automation_id))
            .await?;

        let mut logs = Vec::with_capacity(index.len());
        for entry in index {
            let entry: LogIndexEntry = serde_json::from_value(entry.data)?;
            let key = keys::log(&entry.workspace_id, entry.executed_at, &entry.log_id);
            if let Some(log) = self.get_typed::<AutomationLog>(key).await? {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    pub async fn automation_stats(
        &self,
        automation_id: &str,
    ) -> Result<Option<AutomationStats>, StoreError> {
        self.get_typed(keys::stats(automation_id)).await
    }
}

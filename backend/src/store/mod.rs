//! Generic partition/sort-key entity store
//!
//! Everything the engine persists (device snapshots, automations, logs, log
//! index rows, stats) is a JSON document addressed by `(pk, sk)`. Entities
//! carry a `version` counter so writers that need read-modify-write safety
//! can use [`EntityStore::put_if_version`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

pub mod postgres;
pub mod repository;

pub use postgres::PgEntityStore;
pub use repository::AutomationRepository;

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub pk: String,
    pub sk: String,
    pub data: JsonValue,
    pub version: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>, data: JsonValue) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
            data,
            version: 0,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Error types for store operations
#[derive(Debug, Clone)]
pub enum StoreError {
    ConnectionError(String),
    QueryFailed(String),
    Serialization(String),
    Conflict(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ConnectionError(msg) => write!(f, "Store connection error: {}", msg),
            StoreError::QueryFailed(msg) => write!(f, "Store query failed: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Store serialization error: {}", msg),
            StoreError::Conflict(msg) => write!(f, "Concurrent update conflict: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one entity; expired entities read as absent
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Entity>, StoreError>;

    /// Unconditional upsert; bumps the stored version
    async fn put(&self, entity: Entity) -> Result<(), StoreError>;

    /// All live entities of a partition, ordered by sort key
    async fn query_by_partition(&self, pk: &str) -> Result<Vec<Entity>, StoreError>;

    /// Write only if the stored version still equals `expected`
    /// (`None` = the entity must not exist yet). Returns `false` on conflict.
    async fn put_if_version(
        &self,
        entity: Entity,
        expected: Option<i64>,
    ) -> Result<bool, StoreError>;
}

/// Key layout shared by every store backend
pub mod keys {
    use chrono::{DateTime, SecondsFormat, Utc};

    pub const WORKSPACE_REGISTRY: &str = "WORKSPACES";

    pub fn workspace(workspace_id: &str) -> (String, String) {
        (format!("WS#{}", workspace_id), "META".to_string())
    }

    pub fn workspace_registry(workspace_id: &str) -> (String, String) {
        (WORKSPACE_REGISTRY.to_string(), workspace_id.to_string())
    }

    pub fn automation(workspace_id: &str, automation_id: &str) -> (String, String) {
        (
            format!("WS#{}", workspace_id),
            format!("{}{}", AUTOMATION_PREFIX, automation_id),
        )
    }

    pub const AUTOMATION_PREFIX: &str = "AUTOMATION#";

    pub fn workspace_partition(workspace_id: &str) -> String {
        format!("WS#{}", workspace_id)
    }

    pub fn device_state(workspace_id: &str, device_id: &str) -> (String, String) {
        (
            format!("WS#{}#DEVICE#{}", workspace_id, device_id),
            "STATE".to_string(),
        )
    }

    pub fn log(
        workspace_id: &str,
        executed_at: DateTime<Utc>,
        log_id: &str,
    ) -> (String, String) {
        (
            format!("WS#{}#LOGS", workspace_id),
            chronological_sort_key(executed_at, log_id),
        )
    }

    pub fn log_index(
        automation_id: &str,
        executed_at: DateTime<Utc>,
        log_id: &str,
    ) -> (String, String) {
        (
            log_index_partition(automation_id),
            chronological_sort_key(executed_at, log_id),
        )
    }

    pub fn log_index_partition(automation_id: &str) -> String {
        format!("AUTOMATION#{}#LOGS", automation_id)
    }

    pub fn stats(automation_id: &str) -> (String, String) {
        (format!("AUTOMATION#{}", automation_id), "STATS".to_string())
    }

    /// Fixed-width UTC timestamp so lexical order equals time order. Ids
    /// minted in the same microsecond break the tie.
    fn chronological_sort_key(at: DateTime<Utc>, id: &str) -> String {
        format!("{}#{}", at.to_rfc3339_opts(SecondsFormat::Micros, true), id)
    }
}

/// In-process store used by tests and database-less deployments
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: RwLock<BTreeMap<(String, String), Entity>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Entity>, StoreError> {
        let entities = self.entities.read().await;
        let now = Utc::now();
        Ok(entities
            .get(&(pk.to_string(), sk.to_string()))
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    async fn put(&self, mut entity: Entity) -> Result<(), StoreError> {
        let mut entities = self.entities.write().await;
        let key = (entity.pk.clone(), entity.sk.clone());
        entity.version = entities.get(&key).map(|e| e.version + 1).unwrap_or(1);
        entities.insert(key, entity);
        Ok(())
    }

    async fn query_by_partition(&self, pk: &str) -> Result<Vec<Entity>, StoreError> {
        let entities = self.entities.read().await;
        let now = Utc::now();
        Ok(entities
            .range((pk.to_string(), String::new())..)
            .take_while(|((entity_pk, _), _)| entity_pk == pk)
            .map(|(_, e)| e)
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect())
    }

    async fn put_if_version(
        &self,
        mut entity: Entity,
        expected: Option<i64>,
    ) -> Result<bool, StoreError> {
        let mut entities = self.entities.write().await;
        let key = (entity.pk.clone(), entity.sk.clone());
        let current = entities.get(&key).map(|e| e.version);
        if current != expected {
            return Ok(false);
        }
        entity.version = expected.map(|v| v + 1).unwrap_or(1);
        entities.insert(key, entity);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_put_and_get() {
        let store = MemoryEntityStore::new();
        store.put(Entity::new("p", "s", json!({"a": 1}))).await.unwrap();
        let entity = store.get("p", "s").await.unwrap().unwrap();
        assert_eq!(entity.data["a"], 1);
        assert_eq!(entity.version, 1);
        assert!(store.get("p", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_by_partition_is_sorted_and_scoped() {
        let store = MemoryEntityStore::new();
        store.put(Entity::new("p", "b", json!(2))).await.unwrap();
        store.put(Entity::new("p", "a", json!(1))).await.unwrap();
        store.put(Entity::new("p2", "a", json!(3))).await.unwrap();
        store.put(Entity::new("o", "z", json!(4))).await.unwrap();

        let items = store.query_by_partition("p").await.unwrap();
        let sks: Vec<&str> = items.iter().map(|e| e.sk.as_str()).collect();
        assert_eq!(sks, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_expired_entities_are_hidden() {
        let store = MemoryEntityStore::new();
        let past = Utc::now() - Duration::days(1);
        store
            .put(Entity::new("p", "old", json!(1)).with_expiry(Some(past)))
            .await
            .unwrap();
        assert!(store.get("p", "old").await.unwrap().is_none());
        assert!(store.query_by_partition("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_if_version_detects_conflicts() {
        let store = MemoryEntityStore::new();
        assert!(store.put_if_version(Entity::new("p", "s", json!(1)), None).await.unwrap());
        // Second create loses
        assert!(!store.put_if_version(Entity::new("p", "s", json!(2)), None).await.unwrap());
        // Stale version loses, current version wins
        assert!(!store.put_if_version(Entity::new("p", "s", json!(3)), Some(7)).await.unwrap());
        assert!(store.put_if_version(Entity::new("p", "s", json!(4)), Some(1)).await.unwrap());

        let entity = store.get("p", "s").await.unwrap().unwrap();
        assert_eq!(entity.data, json!(4));
        assert_eq!(entity.version, 2);
    }

    #[test]
    fn test_log_keys_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let (pk_a, sk_a) = keys::log_index("a1", early, "zzz");
        let (pk_b, sk_b) = keys::log_index("a1", late, "aaa");
        assert_eq!(pk_a, pk_b);
        assert!(sk_a < sk_b);
        assert!(sk_a.starts_with("2024-01-09T23:59:59.000000Z#"));
    }
}

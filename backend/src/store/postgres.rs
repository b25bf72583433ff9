use super::{Entity, EntityStore, StoreError};
use crate::{db::DbPool, schema::entities};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use serde_json::Value as JsonValue;

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::entities)]
struct EntityRow {
    pk: String,
    sk: String,
    data: JsonValue,
    version: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity {
            pk: row.pk,
            sk: row.sk,
            data: row.data,
            version: row.version,
            expires_at: row.expires_at,
        }
    }
}

impl EntityRow {
    fn from_entity(entity: Entity, version: i64) -> Self {
        Self {
            pk: entity.pk,
            sk: entity.sk,
            data: entity.data,
            version,
            expires_at: entity.expires_at,
        }
    }
}

fn query_error(err: diesel::result::Error) -> StoreError {
    StoreError::QueryFailed(err.to_string())
}

/// PostgreSQL-backed entity store. Diesel is synchronous, so every call
/// runs on the blocking pool.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: DbPool,
}

impl PgEntityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Store task failed: {}", e)))?
    }

    /// Delete rows whose retention has elapsed
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            diesel::delete(entities::table.filter(entities::expires_at.le(Utc::now())))
                .execute(conn)
                .map_err(query_error)
        })
        .await
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get(&self, pk: &str, sk: &str) -> Result<Option<Entity>, StoreError> {
        let (pk, sk) = (pk.to_string(), sk.to_string());
        let row = self
            .with_conn(move |conn| {
                entities::table
                    .filter(entities::pk.eq(pk))
                    .filter(entities::sk.eq(sk))
                    .filter(
                        entities::expires_at
                            .is_null()
                            .or(entities::expires_at.gt(Utc::now())),
                    )
                    .select(EntityRow::as_select())
                    .first(conn)
                    .optional()
                    .map_err(query_error)
            })
            .await?;
        Ok(row.map(Entity::from))
    }

    async fn put(&self, entity: Entity) -> Result<(), StoreError> {
        let row = EntityRow::from_entity(entity, 1);
        self.with_conn(move |conn| {
            diesel::insert_into(entities::table)
                .values(&row)
                .on_conflict((entities::pk, entities::sk))
                .do_update()
                .set((
                    entities::data.eq(excluded(entities::data)),
                    entities::version.eq(entities::version + 1),
                    entities::expires_at.eq(excluded(entities::expires_at)),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(query_error)
        })
        .await
    }

    async fn query_by_partition(&self, pk: &str) -> Result<Vec<Entity>, StoreError> {
        let pk = pk.to_string();
        let rows = self
            .with_conn(move |conn| {
                entities::table
                    .filter(entities::pk.eq(pk))
                    .filter(
                        entities::expires_at
                            .is_null()
                            .or(entities::expires_at.gt(Utc::now())),
                    )
                    .order(entities::sk.asc())
                    .select(EntityRow::as_select())
                    .load(conn)
                    .map_err(query_error)
            })
            .await?;
        Ok(rows.into_iter().map(Entity::from).collect())
    }

    async fn put_if_version(
        &self,
        entity: Entity,
        expected: Option<i64>,
    ) -> Result<bool, StoreError> {
        let affected = match expected {
            None => {
                let row = EntityRow::from_entity(entity, 1);
                self.with_conn(move |conn| {
                    diesel::insert_into(entities::table)
                        .values(&row)
                        .on_conflict((entities::pk, entities::sk))
                        .do_nothing()
                        .execute(conn)
                        .map_err(query_error)
                })
                .await?
            }
            Some(version) => {
                let row = EntityRow::from_entity(entity, version + 1);
                self.with_conn(move |conn| {
                    diesel::update(
                        entities::table
                            .filter(entities::pk.eq(&row.pk))
                            .filter(entities::sk.eq(&row.sk))
                            .filter(entities::version.eq(version)),
                    )
                    .set((
                        entities::data.eq(&row.data),
                        entities::version.eq(row.version),
                        entities::expires_at.eq(row.expires_at),
                    ))
                    .execute(conn)
                    .map_err(query_error)
                })
                .await?
            }
        };
        Ok(affected == 1)
    }
}

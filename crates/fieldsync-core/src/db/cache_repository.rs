//! Entity cache repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{CachedEntity, EntityKey};
use libsql::{params, Connection, Row};

use super::row_ext::{nullable_int, opt_int};

/// Trait for offline entity cache storage (async)
#[allow(async_fn_in_trait)]
pub trait EntityCacheRepository {
    /// Get the cached state of an entity
    async fn get(&self, key: &EntityKey) -> Result<Option<CachedEntity>>;

    /// Insert or replace a cached entity
    async fn upsert(&self, entity: &CachedEntity) -> Result<()>;

    /// List cached entities, most recently touched first
    async fn list(&self, limit: usize) -> Result<Vec<CachedEntity>>;
}

/// libSQL implementation of `EntityCacheRepository`
pub struct LibSqlEntityCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entity(row: &Row) -> Result<CachedEntity> {
        let data: String = row.get(2)?;
        Ok(CachedEntity {
            entity_type: row.get(0)?,
            entity_id: row.get(1)?,
            data: serde_json::from_str(&data)?,
            version: row.get(3)?,
            local_updated_at: row.get(4)?,
            synced_at: opt_int(row, 5)?,
        })
    }
}

impl EntityCacheRepository for LibSqlEntityCacheRepository<'_> {
    async fn get(&self, key: &EntityKey) -> Result<Option<CachedEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, entity_id, data, version, local_updated_at, synced_at
                 FROM entity_cache
                 WHERE entity_type = ? AND entity_id = ?",
                params![key.entity_type.as_str(), key.entity_id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, entity: &CachedEntity) -> Result<()> {
        let data = serde_json::to_string(&entity.data)?;
        self.conn
            .execute(
                "INSERT INTO entity_cache (
                    entity_type, entity_id, data, version, local_updated_at, synced_at
                 ) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                    data = excluded.data,
                    version = excluded.version,
                    local_updated_at = excluded.local_updated_at,
                    synced_at = excluded.synced_at",
                params![
                    entity.entity_type.as_str(),
                    entity.entity_id.as_str(),
                    data,
                    entity.version,
                    entity.local_updated_at,
                    nullable_int(entity.synced_at)
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<CachedEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, entity_id, data, version, local_updated_at, synced_at
                 FROM entity_cache
                 ORDER BY MAX(local_updated_at, COALESCE(synced_at, 0)) DESC,
                          entity_type ASC, entity_id ASC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(Self::parse_entity(&row)?);
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn order(id: &str, version: i64) -> CachedEntity {
        CachedEntity {
            entity_type: "order".to_string(),
            entity_id: id.to_string(),
            data: json!({"status": "ASSIGNED", "version": version}),
            version,
            local_updated_at: 10,
            synced_at: Some(10),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlEntityCacheRepository::new(db.connection());

        let entity = order("42", 3);
        repo.upsert(&entity).await.unwrap();
        assert_eq!(repo.get(&entity.key()).await.unwrap(), Some(entity.clone()));

        let updated = CachedEntity {
            version: 4,
            synced_at: None,
            ..entity
        };
        repo.upsert(&updated).await.unwrap();
        assert_eq!(repo.get(&updated.key()).await.unwrap(), Some(updated));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_entity() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlEntityCacheRepository::new(db.connection());
        let key = EntityKey::new("order", "missing");
        assert_eq!(repo.get(&key).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_respects_limit() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlEntityCacheRepository::new(db.connection());
        for id in ["1", "2", "3"] {
            repo.upsert(&order(id, 1)).await.unwrap();
        }
        assert_eq!(repo.list(2).await.unwrap().len(), 2);
    }
}

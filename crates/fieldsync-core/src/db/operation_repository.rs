//! Operation queue repository implementation
//!
//! Every status change is a guarded `UPDATE ... WHERE status = <source>` so a
//! row can only move along an edge of the operation state machine.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{
    ConflictData, ConflictResolutionRecord, EntityKey, NewOperation, OperationId,
    OperationStatus, SyncOperation,
};
use libsql::{params, Connection, Row, Value as SqlValue};

use super::row_ext::{nullable_int, nullable_text, opt_int, opt_text};

const OPERATION_COLUMNS: &str = "id, method, url, body, priority, timestamp, retry_count, \
     max_retries, status, last_error, entity_type, entity_id, conflict_data, next_attempt_at, \
     updated_at, completed_at, sequence";

/// Statuses that hold back later writes to the same entity.
const UNSETTLED: &str = "('PENDING', 'IN_PROGRESS', 'CONFLICT')";

/// Trait for operation queue storage (async)
#[allow(async_fn_in_trait)]
pub trait OperationRepository {
    /// Insert a new PENDING operation at the end of its entity's write order
    async fn insert(&self, op: &NewOperation, now_ms: i64) -> Result<SyncOperation>;

    /// Insert a PENDING operation at an existing write-order position
    async fn insert_at(
        &self,
        op: &NewOperation,
        sequence: i64,
        now_ms: i64,
    ) -> Result<SyncOperation>;

    /// Get an operation by ID
    async fn get(&self, id: OperationId) -> Result<Option<SyncOperation>>;

    /// List operations in a status, oldest first
    async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<SyncOperation>>;

    /// Due PENDING operations that come first in their entity's write order,
    /// in drain order
    async fn list_claimable(&self, now_ms: i64, limit: usize) -> Result<Vec<SyncOperation>>;

    /// Unsettled operations on `key` in write order
    async fn list_entity_backlog(&self, key: &EntityKey, limit: usize)
        -> Result<Vec<SyncOperation>>;

    /// PENDING -> IN_PROGRESS
    async fn claim(&self, id: OperationId, now_ms: i64) -> Result<()>;

    /// IN_PROGRESS -> COMPLETED
    async fn mark_completed(&self, id: OperationId, now_ms: i64) -> Result<()>;

    /// IN_PROGRESS -> PENDING after a retryable failure
    async fn reschedule(
        &self,
        id: OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
        now_ms: i64,
    ) -> Result<()>;

    /// IN_PROGRESS -> FAILED
    async fn mark_failed(
        &self,
        id: OperationId,
        retry_count: u32,
        error: &str,
        now_ms: i64,
    ) -> Result<()>;

    /// IN_PROGRESS -> PENDING without touching retry bookkeeping
    async fn release(&self, id: OperationId, now_ms: i64) -> Result<()>;

    /// IN_PROGRESS -> CONFLICT
    async fn mark_conflict(&self, id: OperationId, data: &ConflictData, now_ms: i64)
        -> Result<()>;

    /// Remove an operation that is awaiting external action
    async fn delete(&self, id: OperationId, expected: OperationStatus) -> Result<()>;

    /// Number of operations per status
    async fn status_counts(&self) -> Result<Vec<(OperationStatus, u64)>>;

    /// PENDING, IN_PROGRESS or CONFLICT operations targeting `key`
    async fn count_active_for_entity(&self, key: &EntityKey) -> Result<u64>;

    /// Requeue every IN_PROGRESS operation; returns how many were found
    async fn requeue_in_progress(&self, now_ms: i64) -> Result<u64>;

    /// Delete COMPLETED operations finished before `before_ms`
    async fn prune_completed(&self, before_ms: i64) -> Result<u64>;

    /// Earliest `next_attempt_at` among PENDING operations not held back by
    /// an earlier write to the same entity
    async fn next_claimable_deadline(&self) -> Result<Option<i64>>;

    /// Append to the conflict resolution log
    async fn insert_resolution(&self, record: &ConflictResolutionRecord) -> Result<i64>;

    /// Most recent conflict resolutions first
    async fn list_resolutions(&self, limit: usize) -> Result<Vec<ConflictResolutionRecord>>;
}

/// libSQL implementation of `OperationRepository`
pub struct LibSqlOperationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &Row) -> Result<SyncOperation> {
        let method: String = row.get(1)?;
        let status: String = row.get(8)?;
        let body = opt_text(row, 3)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;
        let conflict_data = opt_text(row, 12)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(SyncOperation {
            id: OperationId::new(row.get(0)?),
            method: method.parse()?,
            url: row.get(2)?,
            body,
            priority: i32::try_from(row.get::<i64>(4)?).unwrap_or_default(),
            timestamp: row.get(5)?,
            retry_count: u32::try_from(row.get::<i64>(6)?).unwrap_or_default(),
            max_retries: opt_int(row, 7)?.and_then(|value| u32::try_from(value).ok()),
            status: status.parse()?,
            last_error: opt_text(row, 9)?,
            entity_type: row.get(10)?,
            entity_id: row.get(11)?,
            conflict_data,
            next_attempt_at: row.get(13)?,
            updated_at: row.get(14)?,
            completed_at: opt_int(row, 15)?,
            sequence: row.get(16)?,
        })
    }

    async fn insert_with_sequence(
        &self,
        op: &NewOperation,
        sequence: Option<i64>,
        now_ms: i64,
    ) -> Result<SyncOperation> {
        let body = op.body.as_ref().map(serde_json::to_string).transpose()?;

        self.conn
            .execute(
                "INSERT INTO sync_operations (
                    method, url, body, priority, timestamp, retry_count, max_retries,
                    status, entity_type, entity_id, next_attempt_at, updated_at, sequence
                 ) VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 0, ?,
                    COALESCE(?, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM sync_operations)))",
                params![
                    op.method.as_str(),
                    op.url.as_str(),
                    nullable_text(body),
                    i64::from(op.priority),
                    now_ms,
                    nullable_int(op.max_retries.map(i64::from)),
                    OperationStatus::Pending.as_str(),
                    op.entity_type.as_str(),
                    op.entity_id.as_str(),
                    now_ms,
                    nullable_int(sequence)
                ],
            )
            .await?;

        let id = OperationId::new(self.conn.last_insert_rowid());
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))
    }

    async fn query_operations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncOperation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    /// Move `id` from `from` to `to`, setting the extra `assignments`.
    async fn transition(
        &self,
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
        assignments: &str,
        values: Vec<SqlValue>,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(Error::InvalidState(format!(
                "{from} -> {to} is not a valid operation transition"
            )));
        }

        let sql = format!(
            "UPDATE sync_operations SET status = ?, {assignments} WHERE id = ? AND status = ?"
        );
        let mut bound = Vec::with_capacity(values.len() + 3);
        bound.push(SqlValue::Text(to.as_str().to_string()));
        bound.extend(values);
        bound.push(SqlValue::Integer(id.get()));
        bound.push(SqlValue::Text(from.as_str().to_string()));

        let rows = self.conn.execute(&sql, bound).await?;
        if rows == 0 {
            return Err(self.rejected_change(id, from).await);
        }
        Ok(())
    }

    async fn rejected_change(&self, id: OperationId, expected: OperationStatus) -> Error {
        match self.get(id).await {
            Ok(Some(op)) => Error::InvalidState(format!(
                "operation {id} is {}, expected {expected}",
                op.status
            )),
            Ok(None) => Error::NotFound(format!("operation {id}")),
            Err(error) => error,
        }
    }

    async fn scalar_u64(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let mut rows = self.conn.query(sql, params).await?;
        let value = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(value).unwrap_or_default())
    }
}

impl OperationRepository for LibSqlOperationRepository<'_> {
    async fn insert(&self, op: &NewOperation, now_ms: i64) -> Result<SyncOperation> {
        self.insert_with_sequence(op, None, now_ms).await
    }

    async fn insert_at(
        &self,
        op: &NewOperation,
        sequence: i64,
        now_ms: i64,
    ) -> Result<SyncOperation> {
        self.insert_with_sequence(op, Some(sequence), now_ms).await
    }

    async fn get(&self, id: OperationId) -> Result<Option<SyncOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM sync_operations WHERE id = ?");
        let mut operations = self.query_operations(&sql, [id.get()]).await?;
        Ok(operations.pop())
    }

    async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM sync_operations
             WHERE status = ?
             ORDER BY priority DESC, timestamp ASC, id ASC
             LIMIT ?"
        );
        self.query_operations(&sql, params![status.as_str(), limit as i64])
            .await
    }

    async fn list_claimable(&self, now_ms: i64, limit: usize) -> Result<Vec<SyncOperation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM sync_operations AS op
             WHERE op.status = 'PENDING' AND op.next_attempt_at <= ?
               AND NOT EXISTS (
                   SELECT 1 FROM sync_operations AS earlier
                   WHERE earlier.entity_type = op.entity_type
                     AND earlier.entity_id = op.entity_id
                     AND (earlier.sequence < op.sequence
                          OR (earlier.sequence = op.sequence AND earlier.id < op.id))
                     AND earlier.status IN {UNSETTLED})
             ORDER BY op.priority DESC, op.timestamp ASC, op.id ASC
             LIMIT ?"
        );
        self.query_operations(&sql, params![now_ms, limit as i64])
            .await
    }

    async fn list_entity_backlog(
        &self,
        key: &EntityKey,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM sync_operations
             WHERE entity_type = ? AND entity_id = ? AND status IN {UNSETTLED}
             ORDER BY sequence ASC, id ASC
             LIMIT ?"
        );
        self.query_operations(
            &sql,
            params![key.entity_type.as_str(), key.entity_id.as_str(), limit as i64],
        )
        .await
    }

    async fn claim(&self, id: OperationId, now_ms: i64) -> Result<()> {
        self.transition(
            id,
            OperationStatus::Pending,
            OperationStatus::InProgress,
            "updated_at = ?",
            vec![SqlValue::Integer(now_ms)],
        )
        .await
    }

    async fn mark_completed(&self, id: OperationId, now_ms: i64) -> Result<()> {
        self.transition(
            id,
            OperationStatus::InProgress,
            OperationStatus::Completed,
            "updated_at = ?, completed_at = ?, last_error = NULL",
            vec![SqlValue::Integer(now_ms), SqlValue::Integer(now_ms)],
        )
        .await
    }

    async fn reschedule(
        &self,
        id: OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.transition(
            id,
            OperationStatus::InProgress,
            OperationStatus::Pending,
            "retry_count = ?, next_attempt_at = ?, last_error = ?, updated_at = ?",
            vec![
                SqlValue::Integer(i64::from(retry_count)),
                SqlValue::Integer(next_attempt_at),
                SqlValue::Text(error.to_string()),
                SqlValue::Integer(now_ms),
            ],
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: OperationId,
        retry_count: u32,
        error: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.transition(
            id,
            OperationStatus::InProgress,
            OperationStatus::Failed,
            "retry_count = ?, last_error = ?, updated_at = ?",
            vec![
                SqlValue::Integer(i64::from(retry_count)),
                SqlValue::Text(error.to_string()),
                SqlValue::Integer(now_ms),
            ],
        )
        .await
    }

    async fn release(&self, id: OperationId, now_ms: i64) -> Result<()> {
        self.transition(
            id,
            OperationStatus::InProgress,
            OperationStatus::Pending,
            "updated_at = ?",
            vec![SqlValue::Integer(now_ms)],
        )
        .await
    }

    async fn mark_conflict(
        &self,
        id: OperationId,
        data: &ConflictData,
        now_ms: i64,
    ) -> Result<()> {
        let serialized = serde_json::to_string(data)?;
        self.transition(
            id,
            OperationStatus::InProgress,
            OperationStatus::Conflict,
            "conflict_data = ?, updated_at = ?",
            vec![SqlValue::Text(serialized), SqlValue::Integer(now_ms)],
        )
        .await
    }

    async fn delete(&self, id: OperationId, expected: OperationStatus) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_operations WHERE id = ? AND status = ?",
                params![id.get(), expected.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(self.rejected_change(id, expected).await);
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(OperationStatus, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_operations GROUP BY status",
                (),
            )
            .await?;

        let mut counts = OperationStatus::ALL
            .into_iter()
            .map(|status| (status, 0u64))
            .collect::<Vec<_>>();
        while let Some(row) = rows.next().await? {
            let status: OperationStatus = row.get::<String>(0)?.parse()?;
            let count = u64::try_from(row.get::<i64>(1)?).unwrap_or_default();
            if let Some(entry) = counts.iter_mut().find(|(known, _)| *known == status) {
                entry.1 = count;
            }
        }
        Ok(counts)
    }

    async fn count_active_for_entity(&self, key: &EntityKey) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM sync_operations
             WHERE entity_type = ? AND entity_id = ? AND status IN {UNSETTLED}"
        );
        self.scalar_u64(
            &sql,
            params![key.entity_type.as_str(), key.entity_id.as_str()],
        )
        .await
    }

    async fn requeue_in_progress(&self, now_ms: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_operations SET status = 'PENDING', updated_at = ?
                 WHERE status = 'IN_PROGRESS'",
                [now_ms],
            )
            .await?;
        Ok(rows)
    }

    async fn prune_completed(&self, before_ms: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_operations WHERE status = 'COMPLETED' AND completed_at < ?",
                [before_ms],
            )
            .await?;
        Ok(rows)
    }

    async fn next_claimable_deadline(&self) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MIN(op.next_attempt_at) FROM sync_operations AS op
             WHERE op.status = 'PENDING'
               AND NOT EXISTS (
                   SELECT 1 FROM sync_operations AS earlier
                   WHERE earlier.entity_type = op.entity_type
                     AND earlier.entity_id = op.entity_id
                     AND (earlier.sequence < op.sequence
                          OR (earlier.sequence = op.sequence AND earlier.id < op.id))
                     AND earlier.status IN {UNSETTLED})"
        );
        let mut rows = self.conn.query(&sql, ()).await?;
        match rows.next().await? {
            Some(row) => opt_int(&row, 0),
            None => Ok(None),
        }
    }

    async fn insert_resolution(&self, record: &ConflictResolutionRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO conflict_resolutions (
                    operation_id, entity_type, entity_id, server_version, local_version,
                    strategy, replacement_operation_id, resolved_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.operation_id,
                    record.entity_type.as_str(),
                    record.entity_id.as_str(),
                    record.server_version,
                    record.local_version,
                    record.strategy.as_str(),
                    nullable_int(record.replacement_operation_id),
                    record.resolved_at
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn list_resolutions(&self, limit: usize) -> Result<Vec<ConflictResolutionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, operation_id, entity_type, entity_id, server_version, local_version,
                        strategy, replacement_operation_id, resolved_at
                 FROM conflict_resolutions
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let strategy: String = row.get(6)?;
            records.push(ConflictResolutionRecord {
                id: row.get(0)?,
                operation_id: row.get(1)?,
                entity_type: row.get(2)?,
                entity_id: row.get(3)?,
                server_version: row.get(4)?,
                local_version: row.get(5)?,
                strategy: strategy.parse()?,
                replacement_operation_id: opt_int(&row, 7)?,
                resolved_at: row.get(8)?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{HttpMethod, ResolutionStrategy};
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn order_update(entity_id: &str, version: i64) -> NewOperation {
        NewOperation::new(HttpMethod::Put, format!("/orders/{entity_id}"), "order", entity_id)
            .with_body(json!({"version": version, "status": "COMPLETED"}))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());

        let op = repo.insert(&order_update("42", 3), 1_000).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);

        let fetched = repo.get(op.id).await.unwrap().unwrap();
        assert_eq!(fetched, op);
        assert_eq!(fetched.body_version(), Some(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ids_are_monotonic() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());

        let first = repo.insert(&order_update("1", 1), 1).await.unwrap();
        let second = repo.insert(&order_update("2", 1), 1).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_guarded_transitions() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        let op = repo.insert(&order_update("42", 3), 1).await.unwrap();

        // PENDING cannot complete without being claimed first
        let skipped = repo.mark_completed(op.id, 2).await;
        assert!(matches!(skipped, Err(Error::InvalidState(_))));

        repo.claim(op.id, 2).await.unwrap();
        assert!(matches!(
            repo.claim(op.id, 3).await,
            Err(Error::InvalidState(_))
        ));
        repo.mark_completed(op.id, 3).await.unwrap();

        let done = repo.get(op.id).await.unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert_eq!(done.completed_at, Some(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_operation_is_not_found() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        let result = repo.claim(OperationId::new(99), 1).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_data_roundtrip() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        let op = repo.insert(&order_update("42", 3), 1).await.unwrap();
        repo.claim(op.id, 2).await.unwrap();

        let data = ConflictData {
            entity_type: "order".to_string(),
            entity_id: "42".to_string(),
            server_version: 4,
            local_version: 3,
            server_data: json!({"status": "CANCELLED", "version": 4}),
            local_data: json!({"status": "COMPLETED", "version": 3}),
            timestamp: 5,
        };
        repo.mark_conflict(op.id, &data, 5).await.unwrap();

        let stored = repo.get(op.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Conflict);
        assert_eq!(stored.conflict_data, Some(data));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_counts_include_empty_statuses() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        repo.insert(&order_update("1", 1), 1).await.unwrap();
        repo.insert(&order_update("2", 1), 1).await.unwrap();

        let counts = repo.status_counts().await.unwrap();
        assert_eq!(counts.len(), OperationStatus::ALL.len());
        assert!(counts.contains(&(OperationStatus::Pending, 2)));
        assert!(counts.contains(&(OperationStatus::Failed, 0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolution_log() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());

        let record = ConflictResolutionRecord {
            id: 0,
            operation_id: 7,
            entity_type: "order".to_string(),
            entity_id: "42".to_string(),
            server_version: 4,
            local_version: 3,
            strategy: ResolutionStrategy::KeepLocal,
            replacement_operation_id: Some(8),
            resolved_at: 100,
        };
        let id = repo.insert_resolution(&record).await.unwrap();

        let records = repo.list_resolutions(10).await.unwrap();
        assert_eq!(records, vec![ConflictResolutionRecord { id, ..record }]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claimable_skips_entities_with_unsettled_earlier_writes() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());

        let first = repo.insert(&order_update("42", 3), 1).await.unwrap();
        let second = repo.insert(&order_update("42", 4), 2).await.unwrap();
        let other = repo.insert(&order_update("7", 1), 3).await.unwrap();
        assert!(second.sequence > first.sequence);

        let heads = repo.list_claimable(10, 10).await.unwrap();
        assert_eq!(
            heads.iter().map(|op| op.id).collect::<Vec<_>>(),
            vec![first.id, other.id]
        );

        repo.claim(first.id, 4).await.unwrap();
        let data = ConflictData {
            entity_type: "order".to_string(),
            entity_id: "42".to_string(),
            server_version: 4,
            local_version: 3,
            server_data: json!({"version": 4}),
            local_data: json!({"version": 3}),
            timestamp: 5,
        };
        repo.mark_conflict(first.id, &data, 5).await.unwrap();

        // The conflict still holds back the later write to order 42.
        let heads = repo.list_claimable(10, 10).await.unwrap();
        assert_eq!(heads.iter().map(|op| op.id).collect::<Vec<_>>(), vec![other.id]);
        assert_eq!(repo.next_claimable_deadline().await.unwrap(), Some(0));

        let key = first.entity_key();
        assert_eq!(repo.count_active_for_entity(&key).await.unwrap(), 2);
        let backlog = repo.list_entity_backlog(&key, 10).await.unwrap();
        assert_eq!(
            backlog.iter().map(|op| op.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_at_takes_over_write_position() {
        let db = setup().await;
        let repo = LibSqlOperationRepository::new(db.connection());

        let first = repo.insert(&order_update("42", 3), 1).await.unwrap();
        let second = repo.insert(&order_update("42", 4), 2).await.unwrap();
        repo.claim(first.id, 3).await.unwrap();
        repo.mark_failed(first.id, 0, "gone", 3).await.unwrap();
        repo.delete(first.id, OperationStatus::Failed).await.unwrap();

        let replacement = repo
            .insert_at(&order_update("42", 4), first.sequence, 4)
            .await
            .unwrap();
        assert!(replacement.id > second.id);
        assert_eq!(replacement.sequence, first.sequence);

        let heads = repo.list_claimable(10, 10).await.unwrap();
        assert_eq!(heads.iter().map(|op| op.id).collect::<Vec<_>>(), vec![replacement.id]);
    }
}

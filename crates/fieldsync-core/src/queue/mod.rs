//! Durable operation queue.
//!
//! `QueueStore` owns the libSQL database behind a `tokio::sync::Mutex`. Each
//! mutating method runs inside a single write transaction, so callers never
//! observe a half-applied change. Claiming requires the file's drain lock,
//! which the first call to [`QueueStore::recover_interrupted`] takes.

mod batch;
mod lock;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libsql::Connection;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

pub use batch::{drain_order, select_batch};
pub use lock::DrainLock;

use crate::config::SyncConfig;
use crate::db::{
    begin_write, finish, Database, EntityCacheRepository, LibSqlEntityCacheRepository,
    LibSqlOperationRepository, OperationRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    merge_json, with_version, CachedEntity, ConflictData, ConflictResolution,
    ConflictResolutionRecord, EntityKey, NewOperation, OperationId, OperationStatus,
    SyncOperation,
};
use crate::sync::backoff::{next_attempt_at, should_retry};
use crate::util::{chunk, unix_millis_now};

/// Result of settling a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub record: ConflictResolutionRecord,
    /// Operation enqueued in place of the conflicting one
    pub replacement: Option<SyncOperation>,
}

/// Shared, thread-safe handle to the operation queue.
#[derive(Clone)]
pub struct QueueStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    config: SyncConfig,
    drainer: Arc<OnceCell<DrainLock>>,
}

impl QueueStore {
    /// Open the queue at `db_path`.
    ///
    /// Opening never touches IN_PROGRESS rows; those belong to whichever
    /// process holds the drain lock.
    pub async fn open(db_path: impl Into<PathBuf>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::open(&db_path).await?;
        let store = Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            config,
            drainer: Arc::new(OnceCell::new()),
        };
        Ok(store)
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open_in_memory().await?;
        let store = Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            config,
            drainer: Arc::new(OnceCell::new()),
        };
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Checkpoint pending writes to the database file.
    pub async fn flush(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.flush().await
    }

    /// Become the drainer for this queue, requeueing every IN_PROGRESS
    /// operation left behind by an interrupted pass.
    ///
    /// Runs once per store (and its clones); later calls return 0. Fails with
    /// [`Error::Busy`] while another process holds the drain lock. Retry
    /// counts are untouched: the interrupted attempt never got a verdict.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let mut recovered = 0;
        let requeued = &mut recovered;
        self.drainer
            .get_or_try_init(|| async move {
                let lock = match self.db_path.as_deref() {
                    Some(path) => DrainLock::acquire(path)?,
                    None => DrainLock::in_memory(),
                };
                let db = self.db.lock().await;
                *requeued = LibSqlOperationRepository::new(db.connection())
                    .requeue_in_progress(unix_millis_now())
                    .await?;
                Ok::<_, Error>(lock)
            })
            .await?;

        if recovered > 0 {
            tracing::warn!("Requeued {recovered} operation(s) interrupted mid-sync");
        }
        Ok(recovered)
    }

    /// Persist a new PENDING operation.
    pub async fn append(&self, op: NewOperation) -> Result<SyncOperation> {
        let op = op.normalized()?;
        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        let stored = repo.insert(&op, unix_millis_now()).await?;
        tracing::debug!(
            "Queued operation {} {} {} for {}",
            stored.id,
            stored.method,
            stored.url,
            stored.entity_key()
        );
        Ok(stored)
    }

    /// Persist many operations, one transaction per `batch_size` chunk.
    ///
    /// Every operation is validated before anything is written.
    pub async fn append_many(&self, ops: Vec<NewOperation>) -> Result<Vec<SyncOperation>> {
        let ops = ops
            .into_iter()
            .map(NewOperation::normalized)
            .collect::<Result<Vec<_>>>()?;

        let db = self.db.lock().await;
        let conn = db.connection();
        let mut stored = Vec::with_capacity(ops.len());
        for group in chunk(&ops, self.config.batch_size) {
            begin_write(conn).await?;
            let result = insert_all(conn, &group, unix_millis_now()).await;
            stored.extend(finish(conn, result).await?);
        }
        tracing::debug!("Queued {} operation(s) in bulk", stored.len());
        Ok(stored)
    }

    /// Record a local edit: merge `op.body` into the cached entity, stamp the
    /// version the server is expected to hold, and queue the write.
    pub async fn record_mutation(&self, op: NewOperation) -> Result<SyncOperation> {
        let op = op.normalized()?;
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = record_mutation_in(conn, op, unix_millis_now()).await;
        finish(conn, result).await
    }

    /// Claim up to `limit` due operations, marking them IN_PROGRESS.
    pub async fn dequeue_batch(&self, limit: usize) -> Result<Vec<SyncOperation>> {
        self.dequeue_batch_at(limit, unix_millis_now()).await
    }

    /// `dequeue_batch` evaluated against an explicit clock.
    pub async fn dequeue_batch_at(&self, limit: usize, now_ms: i64) -> Result<Vec<SyncOperation>> {
        self.recover_interrupted().await?;

        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = claim_batch(conn, limit, now_ms).await;
        let claimed = finish(conn, result).await?;
        if !claimed.is_empty() {
            tracing::debug!("Claimed {} operation(s)", claimed.len());
        }
        Ok(claimed)
    }

    /// Mark an IN_PROGRESS operation as accepted by the server.
    pub async fn complete(&self, id: OperationId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        repo.mark_completed(id, unix_millis_now()).await
    }

    /// Complete an operation and adopt the entity state the server returned.
    ///
    /// The cache is only refreshed when no other write to the entity is still
    /// queued, so unconfirmed local edits are never overwritten.
    pub async fn complete_with_server_state(
        &self,
        id: OperationId,
        server_state: &Value,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = complete_and_refresh(conn, id, server_state, unix_millis_now()).await;
        finish(conn, result).await
    }

    /// Record a retryable failure.
    ///
    /// Increments the retry count; the operation returns to PENDING with a
    /// backoff deadline while retries remain and becomes FAILED otherwise.
    /// Returns the resulting status.
    pub async fn mark_failed(&self, id: OperationId, error: &str) -> Result<OperationStatus> {
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = record_failure(conn, &self.config, id, error, unix_millis_now()).await;
        finish(conn, result).await
    }

    /// Record a non-retryable rejection; the operation becomes FAILED.
    pub async fn mark_rejected(&self, id: OperationId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = async {
            let repo = LibSqlOperationRepository::new(conn);
            let op = require(&repo, id).await?;
            repo.mark_failed(id, op.retry_count, error, unix_millis_now())
                .await
        }
        .await;
        finish(conn, result).await?;
        tracing::warn!("Operation {id} rejected by server: {error}");
        Ok(())
    }

    /// Return a claimed operation to PENDING without counting an attempt.
    pub async fn release(&self, id: OperationId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        repo.release(id, unix_millis_now()).await
    }

    /// Park an operation in CONFLICT until someone resolves it.
    pub async fn mark_conflict(&self, id: OperationId, data: &ConflictData) -> Result<()> {
        if data.server_version == data.local_version {
            return Err(Error::InvalidInput(format!(
                "conflict for operation {id} has matching versions ({})",
                data.server_version
            )));
        }

        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        repo.mark_conflict(id, data, unix_millis_now()).await?;
        tracing::warn!(
            "Operation {id} conflicts on {}/{}: server v{} local v{}",
            data.entity_type,
            data.entity_id,
            data.server_version,
            data.local_version
        );
        Ok(())
    }

    /// Settle a CONFLICT operation. This is the only way out of CONFLICT.
    pub async fn resolve_conflict(
        &self,
        id: OperationId,
        resolution: ConflictResolution,
    ) -> Result<ResolutionOutcome> {
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = resolve_in(conn, id, resolution, unix_millis_now()).await;
        let outcome = finish(conn, result).await?;
        tracing::info!(
            "Resolved conflict on operation {id} ({}) with {}",
            EntityKey::new(
                outcome.record.entity_type.clone(),
                outcome.record.entity_id.clone()
            ),
            outcome.record.strategy
        );
        Ok(outcome)
    }

    /// Queue a FAILED operation again as a fresh operation.
    pub async fn retry_failed(&self, id: OperationId) -> Result<SyncOperation> {
        let db = self.db.lock().await;
        let conn = db.connection();

        begin_write(conn).await?;
        let result = async {
            let repo = LibSqlOperationRepository::new(conn);
            let op = require(&repo, id).await?;
            if op.status != OperationStatus::Failed {
                return Err(Error::InvalidState(format!(
                    "operation {id} is {}, only FAILED operations can be retried",
                    op.status
                )));
            }
            let replacement = repo.insert(&op.replay(), unix_millis_now()).await?;
            repo.delete(id, OperationStatus::Failed).await?;
            Ok::<_, Error>(replacement)
        }
        .await;
        let replacement = finish(conn, result).await?;
        tracing::info!("Requeued failed operation {id} as {}", replacement.id);
        Ok(replacement)
    }

    /// Drop a FAILED operation.
    pub async fn discard(&self, id: OperationId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        repo.delete(id, OperationStatus::Failed).await?;
        tracing::info!("Discarded failed operation {id}");
        Ok(())
    }

    /// Delete archived COMPLETED operations finished before `before_ms`.
    pub async fn prune_completed(&self, before_ms: i64) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlOperationRepository::new(db.connection());
        let pruned = repo.prune_completed(before_ms).await?;
        if pruned > 0 {
            tracing::info!("Pruned {pruned} completed operation(s)");
        }
        Ok(pruned)
    }

    pub async fn get(&self, id: OperationId) -> Result<Option<SyncOperation>> {
        let db = self.db.lock().await;
        LibSqlOperationRepository::new(db.connection()).get(id).await
    }

    pub async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        LibSqlOperationRepository::new(db.connection())
            .list_by_status(status, limit)
            .await
    }

    pub async fn status_counts(&self) -> Result<Vec<(OperationStatus, u64)>> {
        let db = self.db.lock().await;
        LibSqlOperationRepository::new(db.connection())
            .status_counts()
            .await
    }

    /// Operations still waiting to reach the server (PENDING or IN_PROGRESS).
    pub async fn pending_count(&self) -> Result<u64> {
        let counts = self.status_counts().await?;
        Ok(counts
            .into_iter()
            .filter(|(status, _)| {
                matches!(status, OperationStatus::Pending | OperationStatus::InProgress)
            })
            .map(|(_, count)| count)
            .sum())
    }

    /// Earliest time an operation can next be claimed.
    ///
    /// Operations held back by an earlier unsettled write to the same entity
    /// don't count; they become claimable only once that write settles.
    pub async fn next_deadline(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlOperationRepository::new(db.connection())
            .next_claimable_deadline()
            .await
    }

    /// Whether any operation can be claimed at `now_ms`.
    pub async fn has_due_pending(&self, now_ms: i64) -> Result<bool> {
        Ok(self
            .next_deadline()
            .await?
            .is_some_and(|deadline| deadline <= now_ms))
    }

    pub async fn resolution_history(&self, limit: usize) -> Result<Vec<ConflictResolutionRecord>> {
        let db = self.db.lock().await;
        LibSqlOperationRepository::new(db.connection())
            .list_resolutions(limit)
            .await
    }

    pub async fn cached_entity(&self, key: &EntityKey) -> Result<Option<CachedEntity>> {
        let db = self.db.lock().await;
        LibSqlEntityCacheRepository::new(db.connection())
            .get(key)
            .await
    }

    pub async fn cached_entities(&self, limit: usize) -> Result<Vec<CachedEntity>> {
        let db = self.db.lock().await;
        LibSqlEntityCacheRepository::new(db.connection())
            .list(limit)
            .await
    }

    /// Store entity state fetched from the server.
    ///
    /// `data` must carry an integer `version`.
    pub async fn put_server_entity(&self, key: &EntityKey, data: Value) -> Result<CachedEntity> {
        let version = entity_version(&data).ok_or_else(|| {
            Error::InvalidInput(format!("server state for {key} has no integer version"))
        })?;
        let now = unix_millis_now();
        let entity = CachedEntity {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
            data,
            version,
            local_updated_at: now,
            synced_at: Some(now),
        };

        let db = self.db.lock().await;
        LibSqlEntityCacheRepository::new(db.connection())
            .upsert(&entity)
            .await?;
        Ok(entity)
    }
}

fn entity_version(data: &Value) -> Option<i64> {
    data.get("version").and_then(Value::as_i64)
}

async fn require(repo: &LibSqlOperationRepository<'_>, id: OperationId) -> Result<SyncOperation> {
    repo.get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("operation {id}")))
}

async fn insert_all(
    conn: &Connection,
    ops: &[NewOperation],
    now_ms: i64,
) -> Result<Vec<SyncOperation>> {
    let repo = LibSqlOperationRepository::new(conn);
    let mut stored = Vec::with_capacity(ops.len());
    for op in ops {
        stored.push(repo.insert(op, now_ms).await?);
    }
    Ok(stored)
}

/// Claim up to `limit` operations.
///
/// Only the heads of each entity's write order are read in full; when the
/// batch has room, each head's entity backlog is pulled in so later writes to
/// the same entity can ride along behind it.
async fn claim_batch(conn: &Connection, limit: usize, now_ms: i64) -> Result<Vec<SyncOperation>> {
    let repo = LibSqlOperationRepository::new(conn);
    let heads = repo.list_claimable(now_ms, limit).await?;
    let room = limit.saturating_sub(heads.len());

    let candidates = if room == 0 {
        heads
    } else {
        let mut candidates = Vec::with_capacity(heads.len());
        for head in &heads {
            candidates.extend(repo.list_entity_backlog(&head.entity_key(), room + 1).await?);
        }
        candidates.sort_by(drain_order);
        candidates
    };
    let picked = select_batch(&candidates, limit, now_ms);

    let mut by_id: HashMap<OperationId, SyncOperation> =
        candidates.into_iter().map(|op| (op.id, op)).collect();
    let mut claimed = Vec::with_capacity(picked.len());
    for id in picked {
        repo.claim(id, now_ms).await?;
        if let Some(mut op) = by_id.remove(&id) {
            op.status = OperationStatus::InProgress;
            op.updated_at = now_ms;
            claimed.push(op);
        }
    }
    Ok(claimed)
}

async fn record_failure(
    conn: &Connection,
    config: &SyncConfig,
    id: OperationId,
    error: &str,
    now_ms: i64,
) -> Result<OperationStatus> {
    let repo = LibSqlOperationRepository::new(conn);
    let op = require(&repo, id).await?;
    let max_retries = op.effective_max_retries(config.max_retries);
    let retry_count = op.retry_count.saturating_add(1);

    if should_retry(retry_count, max_retries) {
        let deadline = next_attempt_at(now_ms, op.retry_count, &config.backoff_ms);
        repo.reschedule(id, retry_count, deadline, error, now_ms)
            .await?;
        tracing::warn!(
            "Operation {id} failed (attempt {retry_count}/{max_retries}), retrying in {}ms: {error}",
            deadline.saturating_sub(now_ms)
        );
        Ok(OperationStatus::Pending)
    } else {
        repo.mark_failed(id, retry_count, error, now_ms).await?;
        tracing::error!("Operation {id} failed after {retry_count} attempt(s): {error}");
        Ok(OperationStatus::Failed)
    }
}

async fn complete_and_refresh(
    conn: &Connection,
    id: OperationId,
    server_state: &Value,
    now_ms: i64,
) -> Result<bool> {
    let ops = LibSqlOperationRepository::new(conn);
    let op = require(&ops, id).await?;
    ops.mark_completed(id, now_ms).await?;

    let Some(version) = entity_version(server_state) else {
        return Ok(false);
    };
    let key = op.entity_key();
    if ops.count_active_for_entity(&key).await? > 0 {
        return Ok(false);
    }

    let cache = LibSqlEntityCacheRepository::new(conn);
    let local_updated_at = cache
        .get(&key)
        .await?
        .map_or(now_ms, |entity| entity.local_updated_at.min(now_ms));
    cache
        .upsert(&CachedEntity {
            entity_type: key.entity_type,
            entity_id: key.entity_id,
            data: server_state.clone(),
            version,
            local_updated_at,
            synced_at: Some(now_ms),
        })
        .await?;
    Ok(true)
}

async fn record_mutation_in(
    conn: &Connection,
    mut op: NewOperation,
    now_ms: i64,
) -> Result<SyncOperation> {
    let cache = LibSqlEntityCacheRepository::new(conn);
    let key = op.entity_key();
    let patch = op
        .body
        .clone()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let updated = match cache.get(&key).await? {
        Some(entity) => {
            op.body = Some(with_version(&patch, entity.version));
            let next_version = entity.version.saturating_add(1);
            Some(CachedEntity {
                data: with_version(&merge_json(&entity.data, &patch), next_version),
                version: next_version,
                local_updated_at: now_ms,
                ..entity
            })
        }
        None => {
            // Unknown server state: submit as given and start tracking once
            // the body names a version.
            entity_version(&patch).map(|version| CachedEntity {
                entity_type: key.entity_type.clone(),
                entity_id: key.entity_id.clone(),
                data: with_version(&patch, version.saturating_add(1)),
                version: version.saturating_add(1),
                local_updated_at: now_ms,
                synced_at: None,
            })
        }
    };

    if let Some(entity) = updated {
        cache.upsert(&entity).await?;
    }

    LibSqlOperationRepository::new(conn).insert(&op, now_ms).await
}

async fn resolve_in(
    conn: &Connection,
    id: OperationId,
    resolution: ConflictResolution,
    now_ms: i64,
) -> Result<ResolutionOutcome> {
    let ops = LibSqlOperationRepository::new(conn);
    let cache = LibSqlEntityCacheRepository::new(conn);

    let op = require(&ops, id).await?;
    let data = match (op.status, op.conflict_data.clone()) {
        (OperationStatus::Conflict, Some(data)) => data,
        (status, _) => {
            return Err(Error::InvalidState(format!(
                "operation {id} is {status}, not an unresolved conflict"
            )))
        }
    };
    let key = op.entity_key();
    let strategy = resolution.strategy();

    let submit_body = match resolution {
        ConflictResolution::KeepServer => None,
        ConflictResolution::KeepLocal => Some(with_version(&data.local_data, data.server_version)),
        ConflictResolution::Merge(body) => Some(with_version(&body, data.server_version)),
    };

    let (replacement, cached) = match submit_body {
        None => {
            let cached = CachedEntity {
                entity_type: key.entity_type.clone(),
                entity_id: key.entity_id.clone(),
                data: data.server_data.clone(),
                version: data.server_version,
                local_updated_at: now_ms,
                synced_at: Some(now_ms),
            };
            (None, cached)
        }
        Some(body) => {
            let expected = data.server_version.saturating_add(1);
            let cached = CachedEntity {
                entity_type: key.entity_type.clone(),
                entity_id: key.entity_id.clone(),
                data: with_version(&merge_json(&data.server_data, &body), expected),
                version: expected,
                local_updated_at: now_ms,
                synced_at: Some(data.timestamp.min(now_ms)),
            };
            let new_op = op.replay().with_body(body);
            (Some(ops.insert_at(&new_op, op.sequence, now_ms).await?), cached)
        }
    };

    ops.delete(id, OperationStatus::Conflict).await?;
    cache.upsert(&cached).await?;

    let mut record = ConflictResolutionRecord {
        id: 0,
        operation_id: id.get(),
        entity_type: key.entity_type,
        entity_id: key.entity_id,
        server_version: data.server_version,
        local_version: data.local_version,
        strategy,
        replacement_operation_id: replacement.as_ref().map(|op| op.id.get()),
        resolved_at: now_ms,
    };
    record.id = ops.insert_resolution(&record).await?;

    Ok(ResolutionOutcome {
        record,
        replacement,
    })
}

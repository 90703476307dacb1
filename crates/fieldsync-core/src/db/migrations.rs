//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_OPERATION_QUEUE).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_ENTITY_CACHE).await?;
    }
    if version < 3 {
        apply(conn, 3, &V3_CONFLICT_RESOLUTIONS).await?;
    }
    if version < 4 {
        apply(conn, 4, &V4_ENTITY_SEQUENCE).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Version 1: durable operation queue
const V1_OPERATION_QUEUE: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // AUTOINCREMENT: ids are never reused, so they stay monotonic across deletes
    "CREATE TABLE IF NOT EXISTS sync_operations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        body TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        timestamp INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER,
        status TEXT NOT NULL,
        last_error TEXT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        conflict_data TEXT,
        next_attempt_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_drain
        ON sync_operations(status, priority DESC, timestamp ASC, id ASC)",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_entity
        ON sync_operations(entity_type, entity_id, id)",
];

/// Version 2: offline entity cache
const V2_ENTITY_CACHE: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS entity_cache (
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        data TEXT NOT NULL,
        version INTEGER NOT NULL,
        local_updated_at INTEGER NOT NULL,
        synced_at INTEGER,
        PRIMARY KEY (entity_type, entity_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entity_cache_synced ON entity_cache(synced_at)",
];

/// Version 3: conflict resolution audit log
const V3_CONFLICT_RESOLUTIONS: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS conflict_resolutions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_id INTEGER NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        server_version INTEGER NOT NULL,
        local_version INTEGER NOT NULL,
        strategy TEXT NOT NULL,
        replacement_operation_id INTEGER,
        resolved_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_entity
        ON conflict_resolutions(entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_conflict_resolutions_resolved_at
        ON conflict_resolutions(resolved_at DESC)",
];

/// Version 4: per-entity write order that survives conflict replacement
const V4_ENTITY_SEQUENCE: [&str; 4] = [
    "ALTER TABLE sync_operations ADD COLUMN sequence INTEGER NOT NULL DEFAULT 0",
    "UPDATE sync_operations SET sequence = id",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_entity_sequence
        ON sync_operations(entity_type, entity_id, sequence)",
    "CREATE INDEX IF NOT EXISTS idx_sync_operations_sequence ON sync_operations(sequence)",
];

/// Apply one migration's statements and record its version atomically
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_create_all_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["sync_operations", "entity_cache", "conflict_resolutions"] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sequence_backfilled_from_id() {
        let conn = setup().await;
        apply(&conn, 1, &V1_OPERATION_QUEUE).await.unwrap();
        conn.execute(
            "INSERT INTO sync_operations (method, url, priority, timestamp, status,
                 entity_type, entity_id, updated_at)
             VALUES ('PUT', '/orders/42', 0, 1, 'PENDING', 'order', '42', 1)",
            (),
        )
        .await
        .unwrap();

        run(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT id, sequence FROM sync_operations", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), row.get::<i64>(1).unwrap());
    }
}

use std::path::Path;

use fieldsync_core::util::unix_millis_now;
use fieldsync_core::ClientConfig;

use crate::commands::common::{open_store, parse_operation_id};
use crate::error::CliError;

const HOUR_MS: i64 = 60 * 60 * 1_000;

pub async fn run_retry(id: &str, config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let store = open_store(db_path, config).await?;
    let replacement = store.retry_failed(id).await?;
    store.flush().await?;

    println!("{}", replacement.id);
    Ok(())
}

pub async fn run_discard(id: &str, config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let store = open_store(db_path, config).await?;
    store.discard(id).await?;
    store.flush().await?;

    println!("Discarded {id}");
    Ok(())
}

pub fn prune_cutoff(now_ms: i64, older_than_hours: u32) -> i64 {
    now_ms.saturating_sub(i64::from(older_than_hours) * HOUR_MS)
}

pub async fn run_prune(
    older_than_hours: u32,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let pruned = store
        .prune_completed(prune_cutoff(unix_millis_now(), older_than_hours))
        .await?;
    store.flush().await?;

    println!("Pruned {pruned} completed operation(s)");
    Ok(())
}

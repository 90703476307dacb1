use std::path::Path;

use fieldsync_core::ClientConfig;

use crate::cli::OperationArgs;
use crate::commands::common::{build_operation, open_store};
use crate::error::CliError;

pub async fn run_enqueue(
    args: &OperationArgs,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let op = build_operation(args)?;
    let store = open_store(db_path, config).await?;
    let queued = store.append(op).await?;
    store.flush().await?;

    println!("{}", queued.id);
    Ok(())
}

pub async fn run_record(
    args: &OperationArgs,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let op = build_operation(args)?;
    let store = open_store(db_path, config).await?;
    let queued = store.record_mutation(op).await?;
    store.flush().await?;

    match queued.body_version() {
        Some(version) => println!("{} (expects version {version})", queued.id),
        None => println!("{}", queued.id),
    }
    Ok(())
}

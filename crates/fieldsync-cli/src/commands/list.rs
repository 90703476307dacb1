use std::path::Path;

use fieldsync_core::models::OperationStatus;
use fieldsync_core::util::unix_millis_now;
use fieldsync_core::ClientConfig;

use crate::commands::common::{
    format_operation_lines, open_store, operation_to_item, parse_operation_id,
    OperationListItem,
};
use crate::error::CliError;

pub async fn run_list(
    status: &str,
    limit: usize,
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let status = status.parse::<OperationStatus>()?;
    let store = open_store(db_path, config).await?;
    let ops = store.list_by_status(status, limit).await?;
    let now = unix_millis_now();

    if as_json {
        let json_items = ops
            .iter()
            .map(|op| operation_to_item(op, now))
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if ops.is_empty() {
        println!("No {status} operations.");
    } else {
        for line in format_operation_lines(&ops, now) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_show(id: &str, config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let store = open_store(db_path, config).await?;
    let op = store
        .get(id)
        .await?
        .ok_or_else(|| CliError::OperationNotFound(id.to_string()))?;

    println!("{}", serde_json::to_string_pretty(&op)?);
    Ok(())
}

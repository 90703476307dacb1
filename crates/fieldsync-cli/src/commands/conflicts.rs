use std::path::Path;

use fieldsync_core::models::{ConflictResolution, OperationStatus, ResolutionStrategy};
use fieldsync_core::ClientConfig;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_resolution_lines, open_store,
    parse_json_arg, parse_operation_id, ConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(
    limit: usize,
    history: bool,
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;

    if history {
        let records = store.resolution_history(limit).await?;
        if as_json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else if records.is_empty() {
            println!("No conflict resolutions recorded.");
        } else {
            for line in format_resolution_lines(&records) {
                println!("{line}");
            }
        }
        return Ok(());
    }

    let items = store
        .list_by_status(OperationStatus::Conflict, limit)
        .await?
        .iter()
        .filter_map(|op| {
            op.conflict_data
                .as_ref()
                .map(|data| conflict_to_item(op.id, data))
        })
        .collect::<Vec<ConflictItem>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No unresolved conflicts.");
    } else {
        for line in format_conflict_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn parse_resolution(
    strategy: &str,
    body: Option<&str>,
) -> Result<ConflictResolution, CliError> {
    let strategy = strategy.parse::<ResolutionStrategy>()?;
    let body = body.map(|raw| parse_json_arg(raw, "--body")).transpose()?;
    Ok(ConflictResolution::from_parts(strategy, body)?)
}

pub async fn run_resolve(
    id: &str,
    strategy: &str,
    body: Option<&str>,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let resolution = parse_resolution(strategy, body)?;

    let store = open_store(db_path, config).await?;
    let outcome = store.resolve_conflict(id, resolution).await?;
    store.flush().await?;

    match outcome.replacement {
        Some(replacement) => println!(
            "Resolved {id} with {}; queued {}",
            outcome.record.strategy, replacement.id
        ),
        None => println!("Resolved {id} with {}", outcome.record.strategy),
    }
    Ok(())
}

use std::path::Path;

use fieldsync_core::models::EntityKey;
use fieldsync_core::ClientConfig;

use crate::cli::CacheCommands;
use crate::commands::common::{format_timestamp, open_store, parse_json_arg};
use crate::error::CliError;

pub async fn run_cache(
    command: CacheCommands,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;

    match command {
        CacheCommands::Show {
            entity_id,
            entity_type,
        } => {
            let key = EntityKey::new(entity_type, entity_id);
            let entity = store
                .cached_entity(&key)
                .await?
                .ok_or_else(|| CliError::EntityNotFound(key.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&entity)?);
        }
        CacheCommands::List { limit } => {
            let entities = store.cached_entities(limit).await?;
            if entities.is_empty() {
                println!("Entity cache is empty.");
            }
            for entity in entities {
                let synced = entity
                    .synced_at
                    .map_or_else(|| "never".to_string(), format_timestamp);
                let marker = if entity.has_local_changes() {
                    "  (local changes)"
                } else {
                    ""
                };
                println!(
                    "{}  v{}  synced {synced}{marker}",
                    entity.key(),
                    entity.version
                );
            }
        }
        CacheCommands::Put {
            entity_id,
            data,
            entity_type,
        } => {
            let key = EntityKey::new(entity_type, entity_id);
            let data = parse_json_arg(&data, "entity data")?;
            let entity = store.put_server_entity(&key, data).await?;
            store.flush().await?;
            println!("{} v{}", entity.key(), entity.version);
        }
    }

    Ok(())
}

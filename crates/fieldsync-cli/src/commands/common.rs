use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldsync_core::models::{
    ConflictData, ConflictResolutionRecord, EntityKey, HttpMethod, NewOperation, OperationId,
    SyncOperation,
};
use fieldsync_core::sync::{DrainReport, HttpProbe, HttpTransport};
use fieldsync_core::util::compact_text;
use fieldsync_core::{ClientConfig, QueueStore};
use serde::Serialize;
use serde_json::Value;

use crate::cli::OperationArgs;
use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "queue.db";

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: i64,
    pub status: String,
    pub method: String,
    pub url: String,
    pub entity: String,
    pub priority: i32,
    pub retry_count: u32,
    pub queued_at: i64,
    pub relative_time: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub operation_id: i64,
    pub entity: String,
    pub server_version: i64,
    pub local_version: i64,
    pub detected_at: String,
    pub server_data: Value,
    pub local_data: Value,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join(DB_FILE_NAME))
        .ok_or(CliError::NoDefaultDirectory("data"))
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) =
        cli_config_path.or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
    {
        return Ok(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join(CONFIG_FILE_NAME))
        .ok_or(CliError::NoDefaultDirectory("config"))
}

/// Config file overlaid with `FIELDSYNC_*` environment variables.
pub fn load_config(path: &Path) -> Result<ClientConfig, CliError> {
    let config = ClientConfig::load_from_path(path)?;
    Ok(config.with_overrides(|key| env::var(key).ok())?)
}

pub async fn open_store(db_path: &Path, config: &ClientConfig) -> Result<QueueStore, CliError> {
    Ok(QueueStore::open(db_path, config.sync.clone()).await?)
}

pub fn http_transport(config: &ClientConfig) -> Result<HttpTransport, CliError> {
    let base_url = config
        .api_base_url
        .as_deref()
        .ok_or(CliError::ApiNotConfigured)?;
    Ok(HttpTransport::new(base_url, config.sync.request_timeout())?)
}

pub fn health_probe(url: &str, config: &ClientConfig) -> Result<HttpProbe, CliError> {
    let timeout = config.sync.request_timeout().min(Duration::from_secs(5));
    Ok(HttpProbe::new(url, config.probe_interval(), timeout)?)
}

pub fn parse_json_arg(raw: &str, field: &'static str) -> Result<Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidJson {
        field,
        message: error.to_string(),
    })
}

pub fn parse_operation_id(raw: &str) -> Result<OperationId, CliError> {
    Ok(raw.parse::<OperationId>()?)
}

pub fn build_operation(args: &OperationArgs) -> Result<NewOperation, CliError> {
    let method = args.method.parse::<HttpMethod>()?;
    let mut op = NewOperation::new(
        method,
        args.url.clone(),
        args.entity_type.clone(),
        args.entity_id.clone(),
    )
    .with_priority(args.priority);
    if let Some(body) = args.body.as_deref() {
        op = op.with_body(parse_json_arg(body, "--body")?);
    }
    if let Some(max_retries) = args.max_retries {
        op = op.with_max_retries(max_retries);
    }
    Ok(op)
}

pub fn operation_to_item(op: &SyncOperation, now_ms: i64) -> OperationListItem {
    OperationListItem {
        id: op.id.get(),
        status: op.status.to_string(),
        method: op.method.to_string(),
        url: op.url.clone(),
        entity: op.entity_key().to_string(),
        priority: op.priority,
        retry_count: op.retry_count,
        queued_at: op.timestamp,
        relative_time: format_relative_time(op.timestamp, now_ms),
        last_error: op.last_error.clone(),
    }
}

pub fn format_operation_lines(ops: &[SyncOperation], now_ms: i64) -> Vec<String> {
    ops.iter()
        .map(|op| {
            let mut line = format!(
                "{:>6}  {:<11}  {:<6} {}  [{}]  {}",
                op.id,
                op.status,
                op.method,
                op.url,
                op.entity_key(),
                format_relative_time(op.timestamp, now_ms)
            );
            if op.retry_count > 0 {
                line.push_str(&format!("  retries={}", op.retry_count));
            }
            if let Some(error) = &op.last_error {
                line.push_str(&format!("  error={}", compact_text(error)));
            }
            line
        })
        .collect()
}

pub fn conflict_to_item(operation_id: OperationId, data: &ConflictData) -> ConflictItem {
    ConflictItem {
        operation_id: operation_id.get(),
        entity: EntityKey::new(data.entity_type.clone(), data.entity_id.clone()).to_string(),
        server_version: data.server_version,
        local_version: data.local_version,
        detected_at: format_timestamp(data.timestamp),
        server_data: data.server_data.clone(),
        local_data: data.local_data.clone(),
    }
}

pub fn format_conflict_lines(items: &[ConflictItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{:>6}  {}  server v{} / local v{}  detected {}",
                item.operation_id,
                item.entity,
                item.server_version,
                item.local_version,
                item.detected_at
            )
        })
        .collect()
}

pub fn format_resolution_lines(records: &[ConflictResolutionRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let replacement = record
                .replacement_operation_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            format!(
                "{}  op {}  {}/{}  server v{} / local v{}  {}  -> {}",
                format_timestamp(record.resolved_at),
                record.operation_id,
                record.entity_type,
                record.entity_id,
                record.server_version,
                record.local_version,
                record.strategy,
                replacement
            )
        })
        .collect()
}

/// Sum the counters of consecutive passes; `remaining` comes from the last one.
pub fn combine_reports(total: DrainReport, pass: DrainReport) -> DrainReport {
    DrainReport {
        claimed: total.claimed + pass.claimed,
        completed: total.completed + pass.completed,
        conflicts: total.conflicts + pass.conflicts,
        retried: total.retried + pass.retried,
        failed: total.failed + pass.failed,
        released: total.released + pass.released,
        remaining: pass.remaining,
    }
}

pub fn format_report(report: &DrainReport) -> String {
    format!(
        "{} completed, {} conflicts, {} retrying, {} failed, {} remaining",
        report.completed, report.conflicts, report.retried, report.failed, report.remaining
    )
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Describe a deadline relative to `now_ms`, e.g. `in 5s` or `now`.
pub fn format_deadline(deadline_ms: i64, now_ms: i64) -> String {
    let wait_ms = deadline_ms.saturating_sub(now_ms);
    if wait_ms <= 0 {
        "now".to_string()
    } else if wait_ms < 60_000 {
        format!("in {}s", (wait_ms + 999) / 1_000)
    } else {
        format!("in {}m", (wait_ms + 59_999) / 60_000)
    }
}

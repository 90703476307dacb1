use clap::Parser;
use fieldsync_core::models::{ConflictData, EntityKey, HttpMethod, NewOperation, OperationStatus};
use fieldsync_core::sync::DrainReport;
use fieldsync_core::{ClientConfig, QueueStore, SyncConfig};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::cli::{Cli, Commands, CompletionShell, OperationArgs};
use crate::commands::common::{
    build_operation, combine_reports, conflict_to_item, format_conflict_lines, format_deadline,
    format_relative_time, format_report, format_timestamp, parse_json_arg, parse_operation_id,
};
use crate::commands::completions::{render_completions, run_completions};
use crate::commands::config::build_init_config;
use crate::commands::conflicts::{parse_resolution, run_resolve};
use crate::commands::enqueue::{run_enqueue, run_record};
use crate::commands::failed::prune_cutoff;
use crate::commands::sync::run_sync;
use crate::error::CliError;

fn operation_args(method: &str, entity_id: &str, body: Option<&str>) -> OperationArgs {
    OperationArgs {
        method: method.to_string(),
        url: format!("/orders/{entity_id}"),
        entity_id: entity_id.to_string(),
        entity_type: String::new(),
        body: body.map(str::to_string),
        priority: 0,
        max_retries: None,
    }
}

#[test]
fn enqueue_parses_flags_and_negative_priority() {
    let cli = Cli::try_parse_from([
        "fieldsync",
        "enqueue",
        "patch",
        "/orders/42",
        "--entity-id",
        "42",
        "--body",
        r#"{"status":"shipped"}"#,
        "--priority",
        "-3",
        "--max-retries",
        "2",
    ])
    .unwrap();

    let Commands::Enqueue(args) = cli.command else {
        panic!("expected enqueue command");
    };
    assert_eq!(args.priority, -3);
    assert_eq!(args.max_retries, Some(2));

    let op = build_operation(&args).unwrap();
    assert_eq!(op.method, HttpMethod::Patch);
    assert_eq!(op.body, Some(json!({"status": "shipped"})));
    assert_eq!(op.max_retries, Some(2));
}

#[test]
fn global_paths_are_accepted_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fieldsync",
        "status",
        "--db-path",
        "/tmp/queue.db",
        "--config",
        "/tmp/config.json",
    ])
    .unwrap();

    assert_eq!(
        cli.db_path.as_deref(),
        Some(std::path::Path::new("/tmp/queue.db"))
    );
    assert_eq!(
        cli.config.as_deref(),
        Some(std::path::Path::new("/tmp/config.json"))
    );
}

#[test]
fn enqueue_requires_entity_id() {
    assert!(Cli::try_parse_from(["fieldsync", "enqueue", "POST", "/orders"]).is_err());
}

#[test]
fn build_operation_rejects_get_and_bad_json() {
    let error = build_operation(&operation_args("GET", "1", None)).unwrap_err();
    assert!(matches!(error, CliError::Core(_)));

    let error = build_operation(&operation_args("POST", "1", Some("{not json"))).unwrap_err();
    assert!(matches!(error, CliError::InvalidJson { field: "--body", .. }));
}

#[test]
fn parse_helpers_validate_input() {
    assert_eq!(parse_json_arg("[1, 2]", "data").unwrap(), json!([1, 2]));
    assert_eq!(parse_operation_id(" 17 ").unwrap().get(), 17);
    assert!(parse_operation_id("abc").is_err());
}

#[test]
fn parse_resolution_checks_body_rules() {
    assert!(parse_resolution("keep-server", None).is_ok());
    assert!(parse_resolution("keep_local", None).is_ok());
    assert!(parse_resolution("merge", Some(r#"{"qty":3}"#)).is_ok());

    assert!(matches!(
        parse_resolution("merge", None),
        Err(CliError::Core(_))
    ));
    assert!(matches!(
        parse_resolution("keep-server", Some("{}")),
        Err(CliError::Core(_))
    ));
    assert!(matches!(
        parse_resolution("overwrite", None),
        Err(CliError::Core(_))
    ));
}

#[test]
fn format_relative_time_units() {
    let now = 10 * 7 * 24 * 60 * 60 * 1_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 3 * 60_000, now), "3m ago");
    assert_eq!(format_relative_time(now - 2 * 3_600_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 86_400_000, now), "3d ago");
    assert_eq!(format_relative_time(now - 14 * 86_400_000, now), "2w ago");
}

#[test]
fn format_deadline_rounds_up() {
    assert_eq!(format_deadline(1_000, 2_000), "now");
    assert_eq!(format_deadline(2_001, 1_000), "in 2s");
    assert_eq!(format_deadline(61_000, 0), "in 2m");
}

#[test]
fn format_timestamp_returns_utc_label() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn combine_reports_sums_counters_and_keeps_last_remaining() {
    let first = DrainReport {
        claimed: 3,
        completed: 2,
        retried: 1,
        remaining: 4,
        ..DrainReport::default()
    };
    let second = DrainReport {
        claimed: 2,
        completed: 1,
        conflicts: 1,
        remaining: 1,
        ..DrainReport::default()
    };

    let total = combine_reports(combine_reports(DrainReport::default(), first), second);
    assert_eq!(total.claimed, 5);
    assert_eq!(total.completed, 3);
    assert_eq!(total.conflicts, 1);
    assert_eq!(total.retried, 1);
    assert_eq!(total.remaining, 1);
    assert_eq!(
        format_report(&total),
        "3 completed, 1 conflicts, 1 retrying, 0 failed, 1 remaining"
    );
}

#[test]
fn conflict_lines_include_versions() {
    let data = ConflictData {
        entity_type: "order".to_string(),
        entity_id: "42".to_string(),
        server_version: 7,
        local_version: 5,
        server_data: json!({"version": 7}),
        local_data: json!({"version": 5}),
        timestamp: 0,
    };
    let item = conflict_to_item(parse_operation_id("9").unwrap(), &data);
    let lines = format_conflict_lines(&[item]);

    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("order/42"));
    assert!(lines[0].contains("server v7 / local v5"));
}

#[test]
fn init_config_validates_urls() {
    let config = build_init_config(Some(" https://api.example.com ".to_string()), None).unwrap();
    assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
    assert_eq!(
        config.health_endpoint().as_deref(),
        Some("https://api.example.com/health")
    );

    assert!(matches!(
        build_init_config(Some("ftp://example.com".to_string()), None),
        Err(CliError::Config(_))
    ));
}

#[test]
fn prune_cutoff_subtracts_hours() {
    assert_eq!(prune_cutoff(10 * 3_600_000, 24), -14 * 3_600_000);
    assert_eq!(prune_cutoff(48 * 3_600_000, 24), 24 * 3_600_000);
}

#[test]
fn run_completions_writes_bash_script_file() {
    let dir = TempDir::new().unwrap();
    let output_path = dir.path().join("fieldsync.bash");

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_fieldsync()"));
    assert!(script.contains("complete -F _fieldsync"));
}

#[test]
fn completions_cover_every_shell() {
    for shell in [
        CompletionShell::Bash,
        CompletionShell::Zsh,
        CompletionShell::Fish,
        CompletionShell::PowerShell,
    ] {
        let script = String::from_utf8(render_completions(shell)).unwrap();
        assert!(script.contains("fieldsync"), "{shell:?} script names the binary");
    }
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "multi_thread")]
async fn run_enqueue_persists_operation() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let config = ClientConfig::default();

    run_enqueue(
        &operation_args("POST", "42", Some(r#"{"qty":1}"#)),
        &config,
        &db_path,
    )
    .await
    .unwrap();

    let store = QueueStore::open(&db_path, SyncConfig::default()).await.unwrap();
    let pending = store
        .list_by_status(OperationStatus::Pending, 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_type, "order");
    assert_eq!(pending[0].body, Some(json!({"qty": 1})));
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "multi_thread")]
async fn run_record_stamps_cached_version() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let config = ClientConfig::default();
    {
        let store = QueueStore::open(&db_path, SyncConfig::default()).await.unwrap();
        store
            .put_server_entity(
                &EntityKey::new("order", "42"),
                json!({"version": 3, "qty": 1}),
            )
            .await
            .unwrap();
        store.flush().await.unwrap();
    }

    run_record(
        &operation_args("PATCH", "42", Some(r#"{"qty":2}"#)),
        &config,
        &db_path,
    )
    .await
    .unwrap();

    let store = QueueStore::open(&db_path, SyncConfig::default()).await.unwrap();
    let pending = store
        .list_by_status(OperationStatus::Pending, 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body_version(), Some(3));
}

#[cfg_attr(windows, ignore = "libsql integration is flaky on windows CI")]
#[tokio::test(flavor = "multi_thread")]
async fn run_resolve_keep_server_removes_conflict() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");
    let config = ClientConfig::default();

    let id = {
        let store = QueueStore::open(&db_path, SyncConfig::default()).await.unwrap();
        let op = store
            .append(
                NewOperation::new(HttpMethod::Put, "/orders/42", "order", "42")
                    .with_body(json!({"version": 5, "qty": 2})),
            )
            .await
            .unwrap();
        store.dequeue_batch(10).await.unwrap();
        store
            .mark_conflict(
                op.id,
                &ConflictData {
                    entity_type: "order".to_string(),
                    entity_id: "42".to_string(),
                    server_version: 7,
                    local_version: 5,
                    server_data: json!({"version": 7, "qty": 9}),
                    local_data: json!({"version": 5, "qty": 2}),
                    timestamp: 1,
                },
            )
            .await
            .unwrap();
        store.flush().await.unwrap();
        op.id
    };

    run_resolve(&id.to_string(), "keep-server", None, &config, &db_path)
        .await
        .unwrap();

    let store = QueueStore::open(&db_path, SyncConfig::default()).await.unwrap();
    assert!(store.get(id).await.unwrap().is_none());
    let cached = store
        .cached_entity(&EntityKey::new("order", "42"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.version, 7);
    assert_eq!(store.resolution_history(10).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_sync_requires_api_base_url() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.db");

    let error = run_sync(false, &ClientConfig::default(), &db_path)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::ApiNotConfigured));
}

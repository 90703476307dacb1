use std::path::Path;

use fieldsync_core::util::unix_millis_now;
use fieldsync_core::ClientConfig;
use serde::Serialize;

use crate::commands::common::{format_deadline, open_store};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    pending: u64,
    counts: Vec<StatusCount>,
    next_attempt_at: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StatusCount {
    status: String,
    count: u64,
}

pub async fn run_status(
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path, config).await?;
    let counts = store.status_counts().await?;
    let report = StatusReport {
        pending: store.pending_count().await?,
        counts: counts
            .into_iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect(),
        next_attempt_at: store.next_deadline().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for entry in &report.counts {
        println!("{:<11} {}", entry.status, entry.count);
    }
    if let Some(deadline) = report.next_attempt_at {
        println!(
            "next attempt {}",
            format_deadline(deadline, unix_millis_now())
        );
    }
    Ok(())
}

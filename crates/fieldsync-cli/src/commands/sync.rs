use std::path::Path;

use fieldsync_core::sync::{ConnectivityMonitor, DrainOutcome, DrainReport, SyncProcessor};
use fieldsync_core::util::unix_millis_now;
use fieldsync_core::ClientConfig;
use tokio::sync::watch;

use crate::commands::common::{
    combine_reports, format_report, health_probe, http_transport, open_store,
};
use crate::error::CliError;

/// Upper bound on drain passes for one `sync` invocation.
const MAX_PASSES: usize = 100;

pub async fn run_sync(as_json: bool, config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let transport = http_transport(config)?;
    let store = open_store(db_path, config).await?;

    let monitor = ConnectivityMonitor::new(true);
    if let Some(url) = config.health_url.as_deref() {
        let online = health_probe(url, config)?.check().await;
        monitor.set_online(online);
    }

    let processor = SyncProcessor::new(store.clone(), transport, monitor);
    let mut total = DrainReport::default();
    let mut offline = false;

    for _ in 0..MAX_PASSES {
        match processor.drain_once().await? {
            DrainOutcome::Finished(report) => {
                total = combine_reports(total, report);
                if report.claimed == 0 || !store.has_due_pending(unix_millis_now()).await? {
                    break;
                }
            }
            DrainOutcome::Offline => {
                offline = true;
                total.remaining = store.pending_count().await?;
                break;
            }
            DrainOutcome::AlreadyRunning => break,
        }
    }
    store.flush().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&total)?);
    } else if offline {
        println!("Offline; {} operation(s) still queued", total.remaining);
    } else {
        println!("Sync finished: {}", format_report(&total));
    }
    Ok(())
}

pub async fn run_watch(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let transport = http_transport(config)?;
    let store = open_store(db_path, config).await?;
    let probe = config
        .health_endpoint()
        .map(|url| health_probe(&url, config))
        .transpose()?;

    let monitor = ConnectivityMonitor::new(true);
    let processor = SyncProcessor::new(store.clone(), transport, monitor.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_tx.send(true).ok();
        }
    });
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        rx.wait_for(|stop| *stop).await.ok();
    };

    println!("Watching queue (Ctrl-C to stop)");
    match probe {
        Some(probe) => {
            tracing::info!("Probing connectivity via {}", probe.url());
            let (result, ()) = tokio::join!(
                processor.run(stopped(stop_rx.clone())),
                probe.run(&monitor, stopped(stop_rx))
            );
            result?;
        }
        None => processor.run(stopped(stop_rx)).await?,
    }

    store.flush().await?;
    Ok(())
}

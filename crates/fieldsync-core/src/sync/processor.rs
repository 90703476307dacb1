//! Queue drain loop.
//!
//! A pass claims one batch, submits it sequentially, and applies the response
//! policy to each operation. Only one pass runs at a time; triggers that
//! arrive mid-pass are coalesced into a single follow-up pass.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::connectivity::ConnectivityMonitor;
use super::detector::{classify_response, detect_conflict, ResponseClass};
use super::transport::SyncTransport;
use crate::error::Result;
use crate::models::{EntityKey, OperationId, OperationStatus, SyncOperation};
use crate::queue::QueueStore;
use crate::util::unix_millis_now;

/// Counters for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub completed: usize,
    pub conflicts: usize,
    /// Returned to PENDING with a backoff deadline
    pub retried: usize,
    /// Rejected or out of retries
    pub failed: usize,
    /// Handed back unsubmitted because an earlier write to the entity did not land
    pub released: usize,
    /// PENDING or IN_PROGRESS operations left after the pass
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another pass was in flight; a follow-up pass has been requested.
    AlreadyRunning,
    /// Offline; nothing was claimed.
    Offline,
    Finished(DrainReport),
}

/// Cloneable trigger for an immediate pass.
#[derive(Clone)]
pub struct SyncHandle {
    trigger: Arc<Notify>,
}

impl SyncHandle {
    pub fn force_sync(&self) {
        self.trigger.notify_one();
    }
}

enum Verdict {
    Completed,
    Conflict,
    Retrying,
    Failed,
    Rejected,
}

/// Clears the in-flight flag when a pass ends, including on error.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncProcessor<T> {
    store: QueueStore,
    transport: T,
    connectivity: ConnectivityMonitor,
    in_flight: AtomicBool,
    rerun_requested: AtomicBool,
    trigger: Arc<Notify>,
}

impl<T: SyncTransport> SyncProcessor<T> {
    pub fn new(store: QueueStore, transport: T, connectivity: ConnectivityMonitor) -> Self {
        Self {
            store,
            transport,
            connectivity,
            in_flight: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            trigger: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            trigger: Arc::clone(&self.trigger),
        }
    }

    pub const fn store(&self) -> &QueueStore {
        &self.store
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Run one pass over a single batch.
    pub async fn drain_once(&self) -> Result<DrainOutcome> {
        let Some(_guard) = PassGuard::acquire(&self.in_flight) else {
            self.rerun_requested.store(true, Ordering::Release);
            tracing::debug!("Sync pass already running; follow-up requested");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.connectivity.is_online() {
            tracing::debug!("Offline; skipping sync pass");
            return Ok(DrainOutcome::Offline);
        }

        let report = self.drain_batch().await?;

        if self.rerun_requested.swap(false, Ordering::AcqRel) {
            self.trigger.notify_one();
        }
        Ok(DrainOutcome::Finished(report))
    }

    async fn drain_batch(&self) -> Result<DrainReport> {
        let batch = self
            .store
            .dequeue_batch(self.store.config().batch_size)
            .await?;
        let mut report = DrainReport {
            claimed: batch.len(),
            ..DrainReport::default()
        };
        let mut halted: HashSet<EntityKey> = HashSet::new();

        let mut batch = batch.into_iter();
        while let Some(op) = batch.next() {
            if let Err(error) = self.settle(&op, &mut halted, &mut report).await {
                let unsettled = std::iter::once(op.id).chain(batch.map(|op| op.id));
                self.release_unsettled(unsettled).await;
                return Err(error);
            }
        }

        report.remaining = self.store.pending_count().await?;
        if report.claimed > 0 {
            tracing::info!(
                "Sync pass: {} claimed, {} completed, {} conflicts, {} retrying, {} failed, {} released, {} remaining",
                report.claimed,
                report.completed,
                report.conflicts,
                report.retried,
                report.failed,
                report.released,
                report.remaining
            );
        }
        Ok(report)
    }

    async fn settle(
        &self,
        op: &SyncOperation,
        halted: &mut HashSet<EntityKey>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let key = op.entity_key();
        if halted.contains(&key) {
            self.store.release(op.id).await?;
            report.released += 1;
            return Ok(());
        }

        match self.submit(op).await? {
            Verdict::Completed => report.completed += 1,
            Verdict::Rejected => report.failed += 1,
            Verdict::Conflict => {
                report.conflicts += 1;
                halted.insert(key);
            }
            Verdict::Retrying => {
                report.retried += 1;
                halted.insert(key);
            }
            Verdict::Failed => {
                report.failed += 1;
                halted.insert(key);
            }
        }
        Ok(())
    }

    /// Hand claimed operations back to PENDING after a pass aborted.
    async fn release_unsettled(&self, ids: impl Iterator<Item = OperationId>) {
        for id in ids {
            match self.store.release(id).await {
                Ok(()) => tracing::debug!("Released operation {id} from aborted pass"),
                Err(error) => {
                    tracing::warn!("Could not release operation {id} from aborted pass: {error}");
                }
            }
        }
    }

    async fn submit(&self, op: &SyncOperation) -> Result<Verdict> {
        let response = match self.transport.send(&op.request()).await {
            Ok(response) => response,
            Err(error) if error.is_retryable() => {
                return self.retry_later(op, &error.to_string()).await;
            }
            Err(error) => {
                self.store.mark_rejected(op.id, &error.to_string()).await?;
                return Ok(Verdict::Rejected);
            }
        };

        match classify_response(&response) {
            ResponseClass::Success => {
                if response.body.is_object() {
                    self.store
                        .complete_with_server_state(op.id, &response.body)
                        .await?;
                } else {
                    self.store.complete(op.id).await?;
                }
                Ok(Verdict::Completed)
            }
            ResponseClass::Conflict => match detect_conflict(op, &response) {
                Ok(data) => {
                    self.store.mark_conflict(op.id, &data).await?;
                    Ok(Verdict::Conflict)
                }
                Err(error) => {
                    self.retry_later(op, &format!("unreadable conflict response: {error}"))
                        .await
                }
            },
            ResponseClass::Retryable(reason) => self.retry_later(op, &reason).await,
            ResponseClass::Rejected(reason) => {
                self.store.mark_rejected(op.id, &reason).await?;
                Ok(Verdict::Rejected)
            }
        }
    }

    async fn retry_later(&self, op: &SyncOperation, reason: &str) -> Result<Verdict> {
        match self.store.mark_failed(op.id, reason).await? {
            OperationStatus::Failed => Ok(Verdict::Failed),
            _ => Ok(Verdict::Retrying),
        }
    }

    /// Drain until `shutdown` resolves.
    ///
    /// Passes run at startup when online, when connectivity returns, on
    /// `SyncHandle::force_sync`, and after a pass that left work behind: at
    /// the next backoff deadline, or `retry_interval_ms` if that comes first.
    /// Shutdown never interrupts a pass already running.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut connectivity = self.connectivity.subscribe();
        let mut next_pass = self.connectivity.is_online().then(Instant::now);

        loop {
            let scheduled = async move {
                match next_pass {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("Sync loop stopped");
                    return Ok(());
                }
                () = self.trigger.notified() => {
                    tracing::debug!("Sync requested");
                }
                online = connectivity.went_online() => {
                    if !online {
                        next_pass = None;
                        continue;
                    }
                }
                () = scheduled => {}
            }

            next_pass = self.pass_and_schedule().await;
        }
    }

    async fn pass_and_schedule(&self) -> Option<Instant> {
        let retry_interval = self.store.config().retry_interval();
        let retry_at = Instant::now() + retry_interval;
        match self.drain_once().await {
            Ok(DrainOutcome::Finished(report)) if report.remaining > 0 => {
                let next_claimable = match self.store.next_deadline().await {
                    Ok(deadline) => deadline,
                    Err(error) => {
                        tracing::warn!("Could not read next backoff deadline: {error}");
                        None
                    }
                };
                let delay = next_pass_delay(next_claimable, unix_millis_now(), retry_interval);
                Some(Instant::now() + delay)
            }
            Ok(DrainOutcome::Finished(_) | DrainOutcome::Offline) => None,
            Ok(DrainOutcome::AlreadyRunning) => Some(retry_at),
            Err(error) => {
                tracing::error!("Sync pass failed: {error}");
                Some(retry_at)
            }
        }
    }
}

/// Wait until the earliest claimable deadline, capped at `retry_interval`.
///
/// With nothing claimable (all remaining work is held back by conflicts or
/// another drainer) the loop still looks again every `retry_interval`.
fn next_pass_delay(next_claimable_ms: Option<i64>, now_ms: i64, retry_interval: Duration) -> Duration {
    next_claimable_ms.map_or(retry_interval, |deadline| {
        let wait = u64::try_from(deadline.saturating_sub(now_ms)).unwrap_or_default();
        Duration::from_millis(wait).min(retry_interval)
    })
}

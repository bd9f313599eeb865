//! Reaper loop: reclaim stale processing events and purge expired locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::EventStatus;
use crate::error::LatchError;
use crate::lock::LockManager;
use crate::queue::EventQueue;

/// What one reaper pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Stale processing rows sent back to Pending.
    pub repended: usize,
    /// Stale processing rows with no attempts left, now Failed.
    pub exhausted: usize,
    /// Expired lock rows dropped.
    pub purged_locks: usize,
}

/// Periodic recovery chore. A crashed worker leaves its event in Processing
/// and possibly a lock row behind; this loop is what gets both back into
/// circulation.
pub struct Reaper {
    queue: Arc<EventQueue>,
    locks: Arc<LockManager>,
    interval: Duration,
}

impl Reaper {
    pub fn new(queue: Arc<EventQueue>, locks: Arc<LockManager>, interval: Duration) -> Self {
        Self {
            queue,
            locks,
            interval,
        }
    }

    /// One pass. Also callable directly, which is how tests and operational
    /// tooling drive it.
    pub async fn run_once(&self) -> Result<ReapReport, LatchError> {
        let reclaimed = self.queue.reclaim_stale().await?;
        let mut report = ReapReport {
            purged_locks: self.locks.purge_expired().await,
            ..ReapReport::default()
        };
        for row in &reclaimed {
            match row.status {
                EventStatus::Pending => report.repended += 1,
                EventStatus::Failed => report.exhausted += 1,
                _ => {}
            }
        }
        if report != ReapReport::default() {
            info!(
                repended = report.repended,
                exhausted = report.exhausted,
                purged_locks = report.purged_locks,
                "reaper pass reclaimed state"
            );
        }
        Ok(report)
    }

    /// Spawn the periodic loop.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                if let Err(err) = self.run_once().await {
                    // Next tick retries; the chore is idempotent.
                    debug!(error = %err, "reaper pass failed");
                }
            }
        });

        ReaperHandle { shutdown_tx, join }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

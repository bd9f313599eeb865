//! Worker loop: dequeue, apply inside a transaction, report the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::{EventId, EventRecord, EventStatus};
use crate::error::LatchError;
use crate::lock::LockManager;
use crate::queue::EventQueue;
use crate::txn::{TransactionCoordinator, TxnScope};

/// Applies one event's side effects.
///
/// `apply` runs inside the same transaction scope that marks the event done,
/// so the side effects and the Done transition land together or not at all:
/// never "applied but still pending" (duplicate application on redelivery)
/// and never "done but not applied".
pub trait EventApplier: Send + Sync {
    fn apply(&self, txn: &mut TxnScope<'_>, event: &EventRecord) -> Result<(), LatchError>;

    /// Name a lease to hold around the apply, for critical sections that
    /// span records. None (the default) applies lock-free under OCC.
    fn lock_key(&self, _event: &EventRecord) -> Option<String> {
        None
    }
}

/// What one processing pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing eligible.
    Idle,

    /// Applied and marked done.
    Done(EventId),

    /// Recoverable failure; a retry is scheduled.
    Retrying(EventId),

    /// Attempts exhausted; the event is terminal until an operator steps in.
    Exhausted(EventId),
}

/// Lease TTL used around an apply when the applier names a lock key. Long
/// enough for any sane apply; expiry covers us if a worker dies mid-apply.
const APPLY_LEASE_TTL: Duration = Duration::from_secs(30);

/// Glue between the queue, the lock manager, and the transaction
/// coordinator. Stateless: run as many of these concurrently as you like,
/// in as many processes as you like; all coordination goes through the
/// store.
pub struct Processor {
    queue: Arc<EventQueue>,
    txn: Arc<TransactionCoordinator>,
    locks: Arc<LockManager>,
    applier: Arc<dyn EventApplier>,
}

impl Processor {
    pub fn new(
        queue: Arc<EventQueue>,
        txn: Arc<TransactionCoordinator>,
        locks: Arc<LockManager>,
        applier: Arc<dyn EventApplier>,
    ) -> Self {
        Self {
            queue,
            txn,
            locks,
            applier,
        }
    }

    /// Process at most one event.
    ///
    /// Apply failures (including `LockConflict` on a guarded apply) are
    /// routed into the queue's retry/backoff path, not surfaced as errors;
    /// an `Err` from here means the pass itself could not run.
    pub async fn process_next(&self) -> Result<ProcessOutcome, LatchError> {
        let Some(event) = self.queue.dequeue_next().await? else {
            return Ok(ProcessOutcome::Idle);
        };

        match self.apply_guarded(&event).await {
            Ok(()) => {
                debug!(event = %event.id, attempts = event.attempts, "event applied");
                Ok(ProcessOutcome::Done(event.id))
            }
            Err(err) => {
                let failure = LatchError::EventProcessingFailed {
                    id: event.id.clone(),
                    reason: err.to_string(),
                };
                let row = self.queue.mark_failed(&event.id, &failure.to_string()).await?;
                if row.status == EventStatus::Failed {
                    Ok(ProcessOutcome::Exhausted(row.id))
                } else {
                    Ok(ProcessOutcome::Retrying(row.id))
                }
            }
        }
    }

    async fn apply_guarded(&self, event: &EventRecord) -> Result<(), LatchError> {
        // Lease first, transaction second: the lock serializes whole
        // apply attempts, the transaction makes each one atomic.
        let lease = match self.applier.lock_key(event) {
            Some(key) => Some(self.locks.acquire(&key, APPLY_LEASE_TTL).await?),
            None => None,
        };

        let result = self
            .txn
            .run(|txn| {
                self.applier.apply(txn, event)?;
                txn.mark_event_done(&event.id)?;
                Ok(())
            })
            .await;

        if let Some(lease) = lease {
            self.locks.release(&lease).await;
        }
        result
    }
}

/// Worker group handle.
/// - `request_shutdown` stops taking new events; in-flight applies finish
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers over one processor.
    pub fn spawn(n: usize, processor: Arc<Processor>, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let p = Arc::clone(&processor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, p, poll_interval, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers. Does not cancel an in-flight apply;
    /// it just stops new dequeues.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    processor: Arc<Processor>,
    poll_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match processor.process_next().await {
            Ok(ProcessOutcome::Idle) => {
                // 空のときは poll_interval だけ眠る（busy-spin しない）
                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Ok(ProcessOutcome::Done(_)) | Ok(ProcessOutcome::Retrying(_)) => {
                // Logged where it happened; go straight back for more work.
            }
            Ok(ProcessOutcome::Exhausted(id)) => {
                error!(worker = worker_id, event = %id, "event exhausted; operator attention needed");
            }
            Err(err) => {
                // Store 障害など。少し待ってから続行
                warn!(worker = worker_id, error = %err, "processing pass failed");
                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    debug!(worker = worker_id, "worker stopped");
}

//! Durable at-least-once inbox for inbound external events.
//!
//! Events arrive with a caller-supplied idempotency key, wait as Pending
//! rows, and are claimed exclusively by workers. The queue decides retry or
//! terminal failure; the worker just reports what happened.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::{EventId, EventRecord, EventStatus};
use crate::error::LatchError;
use crate::observability::EventCounts;
use crate::ports::{Clock, EventInbox, from_std};
use crate::store::MemoryStore;

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a row may sit in Processing before the reaper treats its
    /// worker as dead and reclaims it.
    pub stale_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
        }
    }
}

pub struct EventQueue {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    config: QueueConfig,
}

impl EventQueue {
    pub fn new(
        store: Arc<MemoryStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        config: QueueConfig,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            config,
        }
    }

    /// Idempotent enqueue: a reused id returns the existing row unchanged,
    /// whatever state it has reached. Callers always pass a stable key
    /// derived from the source event, so redelivery lands here harmlessly.
    pub async fn enqueue(
        &self,
        id: EventId,
        payload: Value,
        max_attempts: u32,
    ) -> Result<EventRecord, LatchError> {
        let now = self.clock.now();
        let (row, inserted) = self
            .store
            .insert_event_if_absent(id, payload, max_attempts, now)
            .await;
        if inserted {
            debug!(event = %row.id, "event enqueued");
        } else {
            debug!(event = %row.id, status = ?row.status, "duplicate enqueue ignored");
        }
        Ok(row)
    }

    /// Claim the oldest eligible Pending row (FIFO by creation order),
    /// moving it to Processing, stamping `processed_at`, and incrementing
    /// `attempts`. Exclusive: concurrent callers never receive the same row.
    ///
    /// Returns None when nothing is eligible; idle and poll, don't spin.
    pub async fn dequeue_next(&self) -> Result<Option<EventRecord>, LatchError> {
        let now = self.clock.now();
        Ok(self.store.claim_next_event(now).await)
    }

    /// Transition to Done. Idempotent if already done.
    pub async fn mark_done(&self, id: &EventId) -> Result<EventRecord, LatchError> {
        self.store.mark_event_done(id).await
    }

    /// Record a failed attempt. While attempts remain the row goes back to
    /// Pending with `next_retry_at = now + backoff(attempts)`; once they are
    /// spent it becomes Failed, which only an operator can undo.
    pub async fn mark_failed(
        &self,
        id: &EventId,
        error_message: &str,
    ) -> Result<EventRecord, LatchError> {
        let now = self.clock.now();
        let row = self
            .store
            .fail_event(id, error_message, |attempts| {
                now + from_std(self.retry.delay(attempts))
            })
            .await?;
        match row.status {
            EventStatus::Failed => {
                // Terminal: this must reach an operator, not scroll by.
                let exhausted = LatchError::EventExhausted {
                    id: row.id.clone(),
                    attempts: row.attempts,
                };
                error!(
                    error = %exhausted,
                    last_error = error_message,
                    "event reached terminal failure"
                );
            }
            EventStatus::Pending => {
                warn!(
                    event = %row.id,
                    attempts = row.attempts,
                    max_attempts = row.max_attempts,
                    next_retry_at = ?row.next_retry_at,
                    error = error_message,
                    "event apply failed, retry scheduled"
                );
            }
            _ => {}
        }
        Ok(row)
    }

    /// Reaper path: re-pend rows stuck in Processing past the stale window,
    /// so a crashed worker can't orphan work. Rows with no attempts left go
    /// to Failed instead. Redelivered rows hit the same idempotent-apply
    /// discipline as any retry.
    pub async fn reclaim_stale(&self) -> Result<Vec<EventRecord>, LatchError> {
        let now = self.clock.now();
        let cutoff = now - from_std(self.config.stale_after);
        let reclaimed = self.store.reclaim_stale_events(cutoff).await;
        for row in &reclaimed {
            match row.status {
                EventStatus::Pending => {
                    warn!(event = %row.id, "stale processing event reclaimed")
                }
                EventStatus::Failed => {
                    error!(event = %row.id, attempts = row.attempts, "stale event exhausted")
                }
                _ => {}
            }
        }
        Ok(reclaimed)
    }

    pub async fn get(&self, id: &EventId) -> Option<EventRecord> {
        self.store.get_event(id).await
    }

    pub async fn counts_by_state(&self) -> EventCounts {
        self.store.event_counts().await
    }

    // Thin operator surface; list/retry/purge tooling builds on these.

    pub async fn failed_events(&self) -> Vec<EventRecord> {
        self.store.failed_events().await
    }

    /// Re-arm a Failed row with a fresh attempt budget. No-op on rows in any
    /// other state.
    pub async fn retry_failed(&self, id: &EventId) -> Result<EventRecord, LatchError> {
        let row = self.store.rearm_event(id).await?;
        if row.status == EventStatus::Pending && row.attempts == 0 {
            info!(event = %row.id, "failed event re-armed by operator");
        }
        Ok(row)
    }

    pub async fn purge_failed(&self) -> usize {
        self.store.purge_failed_events().await
    }
}

#[async_trait]
impl EventInbox for EventQueue {
    async fn enqueue(
        &self,
        id: EventId,
        payload: Value,
        max_attempts: u32,
    ) -> Result<EventRecord, LatchError> {
        EventQueue::enqueue(self, id, payload, max_attempts).await
    }
}

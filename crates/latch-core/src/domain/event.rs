//! Queued event row and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;

/// Event state.
///
/// State transitions:
/// - Pending -> Processing -> Done
/// - Pending -> Processing -> Pending (retry with backoff, until max_attempts)
/// - Pending -> Processing -> Failed (attempts exhausted)
///
/// A Processing row stuck past the stale window is reclaimed by the reaper
/// (back to Pending, or Failed if its attempts are already spent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Waiting for a worker (immediately, or once `next_retry_at` passes).
    Pending,

    /// Claimed by exactly one worker.
    Processing,

    /// Applied successfully. Never reprocessed.
    Done,

    /// Attempts exhausted. Terminal until an operator re-arms it.
    Failed,
}

impl EventStatus {
    /// Is this a terminal state (no automatic transitions out)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Done | EventStatus::Failed)
    }
}

/// One inbound external event, durably queued for at-least-once apply.
///
/// The row is the single source of truth for the event's lifecycle; queue
/// selection looks only at `status`, `next_retry_at`, and `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Caller-supplied idempotency key.
    pub id: EventId,

    pub payload: serde_json::Value,
    pub status: EventStatus,

    /// Number of times a worker has claimed this event (including the current
    /// claim while Processing). Never exceeds `max_attempts`.
    pub attempts: u32,
    pub max_attempts: u32,

    /// When the next retry becomes eligible; None means immediately.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Last failure message, if any.
    pub error: Option<String>,

    /// When the most recent claim happened.
    pub processed_at: Option<DateTime<Utc>>,

    pub enqueued_at: DateTime<Utc>,

    /// Store-assigned creation order; dequeue picks the smallest eligible.
    pub seq: u64,
}

impl EventRecord {
    pub fn new(
        id: EventId,
        payload: serde_json::Value,
        max_attempts: u32,
        seq: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            status: EventStatus::Pending,
            attempts: 0,
            max_attempts,
            next_retry_at: None,
            error: None,
            processed_at: None,
            enqueued_at: now,
            seq,
        }
    }

    /// Eligible for dequeue right now?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// All attempts spent?
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Claim for processing (increments attempts).
    pub(crate) fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Processing;
        self.attempts += 1;
        self.processed_at = Some(now);
    }

    pub(crate) fn mark_done(&mut self) {
        self.status = EventStatus::Done;
        self.next_retry_at = None;
    }

    /// Recoverable failure: back to Pending with a scheduled retry.
    pub(crate) fn schedule_retry(&mut self, next_retry_at: DateTime<Utc>, error: String) {
        self.status = EventStatus::Pending;
        self.next_retry_at = Some(next_retry_at);
        self.error = Some(error);
    }

    /// Terminal failure.
    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = EventStatus::Failed;
        self.next_retry_at = None;
        self.error = Some(error);
    }

    /// Reaper path: Processing back to Pending, immediately eligible.
    pub(crate) fn requeue(&mut self) {
        self.status = EventStatus::Pending;
        self.next_retry_at = None;
    }

    /// Operator path: re-arm a Failed row with a fresh attempt budget.
    pub(crate) fn rearm(&mut self) {
        self.status = EventStatus::Pending;
        self.attempts = 0;
        self.next_retry_at = None;
        self.error = None;
    }
}

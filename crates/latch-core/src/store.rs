//! In-memory durable-store reference implementation.
//!
//! The store exclusively owns all persisted rows: lock leases, versioned
//! records, and queued events. Every public method takes the state mutex once
//! and performs its whole conditional read-check-write under that single
//! guard: the in-memory analogue of the one-statement conditional writes a
//! relational backend provides. Components never cache rows; they come back
//! here for every read.
//!
//! Swapping in a SQL backend later touches this module only: the method set
//! below is exactly the statement set such a backend would need
//! (`INSERT ... ON CONFLICT`, `UPDATE ... WHERE version = ?`, and so on).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::domain::{
    EntityId, EventId, EventRecord, EventStatus, Fields, HolderId, LockRow, VersionedRecord,
};
use crate::error::LatchError;
use crate::observability::EventCounts;

/// All persisted rows.
///
/// Cloneable so a transaction can stage writes against a working copy and
/// swap it in on commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) locks: HashMap<String, LockRow>,
    pub(crate) records: HashMap<EntityId, VersionedRecord>,
    pub(crate) events: HashMap<EventId, EventRecord>,

    /// Creation-order counter; dequeue serves the smallest eligible seq.
    next_seq: u64,
}

impl StoreState {
    fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn insert_record(&mut self, fields: Fields, now: DateTime<Utc>) -> VersionedRecord {
        let record = VersionedRecord::new(EntityId::generate(), fields, now);
        self.records.insert(record.id, record.clone());
        record
    }

    /// Compare-and-swap: mutate + version bump only if the stored version
    /// matches. A missing row is the same failure as a stale version: no row
    /// matched the (id, expected_version) pair.
    pub(crate) fn conditional_update(
        &mut self,
        id: &EntityId,
        expected_version: u64,
        mutate: impl FnOnce(&mut Fields),
        now: DateTime<Utc>,
    ) -> Result<VersionedRecord, LatchError> {
        match self.records.get_mut(id) {
            Some(record) if record.version == expected_version => {
                record.apply(mutate, now);
                Ok(record.clone())
            }
            _ => Err(LatchError::VersionConflict {
                id: *id,
                expected: expected_version,
            }),
        }
    }

    /// Idempotent insert keyed by the event id. Returns the row and whether
    /// this call created it.
    pub(crate) fn insert_event_if_absent(
        &mut self,
        id: EventId,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> (EventRecord, bool) {
        if let Some(existing) = self.events.get(&id) {
            return (existing.clone(), false);
        }
        let seq = self.allocate_seq();
        let record = EventRecord::new(id.clone(), payload, max_attempts, seq, now);
        self.events.insert(id, record.clone());
        (record, true)
    }

    /// Claim the oldest eligible pending event, transitioning it to
    /// Processing. One caller gets the row; everyone else sees it claimed.
    pub(crate) fn claim_next_event(&mut self, now: DateTime<Utc>) -> Option<EventRecord> {
        let id = self
            .events
            .values()
            .filter(|e| e.is_eligible(now))
            .min_by_key(|e| e.seq)
            .map(|e| e.id.clone())?;

        let row = self.events.get_mut(&id)?;
        row.start_attempt(now);
        Some(row.clone())
    }

    /// Transition to Done. Reachable from Processing and from Pending (a
    /// reaper may have re-pended the row while a slow worker was still
    /// mid-apply; the worker's commit must still record completion). No-op on
    /// terminal rows.
    pub(crate) fn mark_event_done(&mut self, id: &EventId) -> Result<EventRecord, LatchError> {
        let row = self
            .events
            .get_mut(id)
            .ok_or_else(|| LatchError::UnknownEvent(id.clone()))?;
        if !row.status.is_terminal() {
            row.mark_done();
        }
        Ok(row.clone())
    }

    pub(crate) fn event_counts(&self) -> EventCounts {
        let mut counts = EventCounts::default();
        for event in self.events.values() {
            match event.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::Processing => counts.processing += 1,
                EventStatus::Done => counts.done += 1,
                EventStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Shared handle to the store. Constructed once and passed explicitly into
/// each component; there is no process-wide singleton.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the whole state, for the transaction coordinator.
    pub(crate) async fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    // ---- lock rows ----

    /// Insert a lease for `key`, failing if a live one exists. A leftover
    /// expired row is purged first and the insert retried, which collapses
    /// to an overwrite under a single guard.
    pub(crate) async fn insert_lock(
        &self,
        key: &str,
        holder: HolderId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockRow, LatchError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.locks.get(key)
            && existing.is_live(now)
        {
            return Err(LatchError::LockConflict {
                key: key.to_string(),
            });
        }
        let row = LockRow {
            key: key.to_string(),
            holder,
            expires_at,
        };
        state.locks.insert(key.to_string(), row.clone());
        Ok(row)
    }

    /// Extend a lease's expiry, conditional on the caller still being the
    /// live holder.
    pub(crate) async fn renew_lock(
        &self,
        key: &str,
        holder: HolderId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LockRow, LatchError> {
        let mut state = self.state.lock().await;
        match state.locks.get_mut(key) {
            Some(row) if row.holder == holder && row.is_live(now) => {
                row.expires_at = expires_at;
                Ok(row.clone())
            }
            _ => Err(LatchError::LockConflict {
                key: key.to_string(),
            }),
        }
    }

    /// Delete the lease if the caller still holds it. Deleting a lock held by
    /// someone else (or nobody) is a no-op, never an error.
    pub(crate) async fn delete_lock(&self, key: &str, holder: HolderId) -> bool {
        let mut state = self.state.lock().await;
        let held = matches!(state.locks.get(key), Some(row) if row.holder == holder);
        if held {
            state.locks.remove(key);
        }
        held
    }

    pub(crate) async fn get_lock(&self, key: &str) -> Option<LockRow> {
        let state = self.state.lock().await;
        state.locks.get(key).cloned()
    }

    /// Drop rows whose expiry has passed. Liveness checks don't need this
    /// (expired rows already read as absent); it just keeps the table small.
    pub(crate) async fn purge_expired_locks(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.locks.len();
        state.locks.retain(|_, row| row.is_live(now));
        before - state.locks.len()
    }

    // ---- versioned records ----

    pub(crate) async fn insert_record(
        &self,
        fields: Fields,
        now: DateTime<Utc>,
    ) -> VersionedRecord {
        let mut state = self.state.lock().await;
        state.insert_record(fields, now)
    }

    pub(crate) async fn get_record(&self, id: &EntityId) -> Option<VersionedRecord> {
        let state = self.state.lock().await;
        state.records.get(id).cloned()
    }

    pub(crate) async fn conditional_update(
        &self,
        id: &EntityId,
        expected_version: u64,
        mutate: impl FnOnce(&mut Fields),
        now: DateTime<Utc>,
    ) -> Result<VersionedRecord, LatchError> {
        let mut state = self.state.lock().await;
        state.conditional_update(id, expected_version, mutate, now)
    }

    // ---- queued events ----

    pub(crate) async fn insert_event_if_absent(
        &self,
        id: EventId,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> (EventRecord, bool) {
        let mut state = self.state.lock().await;
        state.insert_event_if_absent(id, payload, max_attempts, now)
    }

    pub(crate) async fn get_event(&self, id: &EventId) -> Option<EventRecord> {
        let state = self.state.lock().await;
        state.events.get(id).cloned()
    }

    pub(crate) async fn claim_next_event(&self, now: DateTime<Utc>) -> Option<EventRecord> {
        let mut state = self.state.lock().await;
        state.claim_next_event(now)
    }

    pub(crate) async fn mark_event_done(&self, id: &EventId) -> Result<EventRecord, LatchError> {
        let mut state = self.state.lock().await;
        state.mark_event_done(id)
    }

    /// Record a failure for a Processing row. `next_retry_at` is computed by
    /// the caller from the row's persisted attempts counter, under this same
    /// guard, so the backoff input can't drift from the stored row.
    ///
    /// Attempts spent -> Failed (terminal); otherwise -> Pending with the
    /// retry window set. No-op if the row is not Processing.
    pub(crate) async fn fail_event(
        &self,
        id: &EventId,
        error: &str,
        next_retry_at: impl FnOnce(u32) -> DateTime<Utc>,
    ) -> Result<EventRecord, LatchError> {
        let mut state = self.state.lock().await;
        let row = state
            .events
            .get_mut(id)
            .ok_or_else(|| LatchError::UnknownEvent(id.clone()))?;
        if row.status != EventStatus::Processing {
            return Ok(row.clone());
        }
        if row.exhausted() {
            row.mark_failed(error.to_string());
        } else {
            let at = next_retry_at(row.attempts);
            row.schedule_retry(at, error.to_string());
        }
        Ok(row.clone())
    }

    /// Reaper path: rows stuck in Processing since before `cutoff` go back to
    /// Pending for redelivery, unless their attempts are already spent, in
    /// which case re-pending would let the next claim push `attempts` past
    /// `max_attempts`, so they go to Failed instead.
    pub(crate) async fn reclaim_stale_events(&self, cutoff: DateTime<Utc>) -> Vec<EventRecord> {
        let mut state = self.state.lock().await;
        let mut reclaimed = Vec::new();
        for row in state.events.values_mut() {
            let stale = row.status == EventStatus::Processing
                && row.processed_at.is_some_and(|at| at <= cutoff);
            if !stale {
                continue;
            }
            if row.exhausted() {
                row.mark_failed("processing timed out".to_string());
            } else {
                row.requeue();
            }
            reclaimed.push(row.clone());
        }
        reclaimed
    }

    pub(crate) async fn event_counts(&self) -> EventCounts {
        let state = self.state.lock().await;
        state.event_counts()
    }

    pub(crate) async fn failed_events(&self) -> Vec<EventRecord> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .events
            .values()
            .filter(|e| e.status == EventStatus::Failed)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.seq);
        rows
    }

    /// Operator path: re-arm a Failed row. No-op on rows in any other state.
    pub(crate) async fn rearm_event(&self, id: &EventId) -> Result<EventRecord, LatchError> {
        let mut state = self.state.lock().await;
        let row = state
            .events
            .get_mut(id)
            .ok_or_else(|| LatchError::UnknownEvent(id.clone()))?;
        if row.status == EventStatus::Failed {
            row.rearm();
        }
        Ok(row.clone())
    }

    pub(crate) async fn purge_failed_events(&self) -> usize {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|_, row| row.status != EventStatus::Failed);
        before - state.events.len()
    }
}

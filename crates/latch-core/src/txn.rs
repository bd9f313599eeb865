//! Transaction coordinator: all-or-nothing multi-write scopes.
//!
//! `run` hands the body a [`TxnScope`] staged on a working copy of the store
//! state, taken under the store mutex. Commit swaps the copy in; an error
//! discards it. Other callers queue on the mutex for the scope's duration, so
//! they never observe a staged write. Bodies are synchronous closures so the
//! guard never spans an await.
//!
//! Scopes are flat; there is no nesting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{EntityId, EventId, EventRecord, Fields, VersionedRecord};
use crate::error::LatchError;
use crate::ports::Clock;
use crate::store::{MemoryStore, StoreState};

/// Staging surface handed to a transaction body.
///
/// Writes land on the working copy immediately, so the body reads its own
/// writes and a conditional failure (say, a stale version) surfaces right
/// where it happens, aborting the whole scope.
pub struct TxnScope<'a> {
    state: &'a mut StoreState,
    now: DateTime<Utc>,
}

impl TxnScope<'_> {
    /// The instant this scope opened; every write in it shares one timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn create_record(&mut self, fields: Fields) -> VersionedRecord {
        self.state.insert_record(fields, self.now)
    }

    pub fn get_record(&self, id: &EntityId) -> Option<VersionedRecord> {
        self.state.records.get(id).cloned()
    }

    /// Compare-and-swap against the scope's view. Same contract as the
    /// direct path: `VersionConflict` when no row matches (id, expected).
    pub fn update_record(
        &mut self,
        id: &EntityId,
        expected_version: u64,
        mutate: impl FnOnce(&mut Fields),
    ) -> Result<VersionedRecord, LatchError> {
        self.state
            .conditional_update(id, expected_version, mutate, self.now)
    }

    /// Idempotent enqueue from inside a scope (an applier emitting a
    /// follow-up event commits it together with its other writes).
    pub fn enqueue_event(
        &mut self,
        id: EventId,
        payload: Value,
        max_attempts: u32,
    ) -> EventRecord {
        let (row, _inserted) = self
            .state
            .insert_event_if_absent(id, payload, max_attempts, self.now);
        row
    }

    pub fn mark_event_done(&mut self, id: &EventId) -> Result<EventRecord, LatchError> {
        self.state.mark_event_done(id)
    }
}

/// Runs multi-write bodies as one atomic unit against the store.
pub struct TransactionCoordinator {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Execute `body` atomically.
    ///
    /// On `Ok` every staged write becomes visible at once; on `Err` none of
    /// them ever existed, and the body's error comes back wrapped in
    /// [`LatchError::TransactionAborted`].
    pub async fn run<T>(
        &self,
        body: impl FnOnce(&mut TxnScope<'_>) -> Result<T, LatchError>,
    ) -> Result<T, LatchError> {
        let mut guard = self.store.state().await;
        let mut working = guard.clone();
        let mut scope = TxnScope {
            state: &mut working,
            now: self.clock.now(),
        };
        match body(&mut scope) {
            Ok(value) => {
                *guard = working;
                Ok(value)
            }
            Err(source) => Err(LatchError::TransactionAborted(Box::new(source))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;
    use crate::version::VersionController;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, TransactionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::from_system());
        let txn = TransactionCoordinator::new(Arc::clone(&store), clock.clone());
        (store, clock, txn)
    }

    #[tokio::test]
    async fn commit_makes_all_writes_visible() {
        let (store, clock, txn) = setup();
        let versions = VersionController::new(Arc::clone(&store), clock);
        let record = versions.create(Fields::new()).await;

        let updated = txn
            .run(|scope| {
                scope.update_record(&record.id, 0, |fields| {
                    fields.insert("plan".into(), "pro".into());
                })?;
                scope.enqueue_event(
                    EventId::new("evt_followup").unwrap(),
                    serde_json::json!({}),
                    3,
                );
                Ok(())
            })
            .await;
        updated.unwrap();

        let after = versions.get(&record.id).await.unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.fields["plan"], "pro");
        assert!(
            store
                .get_event(&EventId::new("evt_followup").unwrap())
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn abort_rolls_back_every_write() {
        let (store, clock, txn) = setup();
        let versions = VersionController::new(Arc::clone(&store), clock);
        let record = versions.create(Fields::new()).await;

        let result: Result<(), _> = txn
            .run(|scope| {
                scope.update_record(&record.id, 0, |fields| {
                    fields.insert("plan".into(), "pro".into());
                })?;
                scope.enqueue_event(
                    EventId::new("evt_orphan").unwrap(),
                    serde_json::json!({}),
                    3,
                );
                Err(LatchError::Other("applier blew up".into()))
            })
            .await;

        assert!(matches!(result, Err(LatchError::TransactionAborted(_))));

        // Version and fields are untouched, the enqueue never happened.
        let after = versions.get(&record.id).await.unwrap();
        assert_eq!(after.version, 0);
        assert!(after.fields.is_empty());
        assert!(
            store
                .get_event(&EventId::new("evt_orphan").unwrap())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn conflict_inside_body_aborts_the_scope() {
        let (store, clock, txn) = setup();
        let versions = VersionController::new(Arc::clone(&store), clock);
        let record = versions.create(Fields::new()).await;

        let result: Result<(), _> = txn
            .run(|scope| {
                scope.create_record(Fields::new());
                // Stale expectation: fails, taking the create with it.
                scope.update_record(&record.id, 7, |_| {})?;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        let LatchError::TransactionAborted(source) = err else {
            panic!("expected TransactionAborted, got {err}");
        };
        assert!(matches!(*source, LatchError::VersionConflict { .. }));

        // Only the pre-existing record remains.
        assert_eq!(store.state().await.records.len(), 1);
    }

    #[tokio::test]
    async fn scope_reads_its_own_writes() {
        let (_store, _clock, txn) = setup();

        txn.run(|scope| {
            let created = scope.create_record(Fields::new());
            let seen = scope.get_record(&created.id).expect("visible in-scope");
            assert_eq!(seen.version, 0);
            Ok(())
        })
        .await
        .unwrap();
    }
}

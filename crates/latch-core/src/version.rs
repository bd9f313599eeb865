//! Optimistic concurrency control over versioned records.

use std::sync::Arc;

use crate::domain::{EntityId, Fields, VersionedRecord};
use crate::error::LatchError;
use crate::ports::Clock;
use crate::store::MemoryStore;

/// Compare-and-swap record updates.
///
/// Of any set of concurrent updates expecting the same base version, exactly
/// one succeeds; the rest get [`LatchError::VersionConflict`] and must
/// re-read before trying again. This component never retries on a caller's
/// behalf.
pub struct VersionController {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl VersionController {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a record at version 0.
    pub async fn create(&self, fields: Fields) -> VersionedRecord {
        let now = self.clock.now();
        self.store.insert_record(fields, now).await
    }

    pub async fn get(&self, id: &EntityId) -> Option<VersionedRecord> {
        self.store.get_record(id).await
    }

    /// Apply `mutate` and set `version = expected_version + 1`, atomically,
    /// only if the stored version still matches. A missing row fails the
    /// same way a stale version does: no row matched the pair.
    pub async fn conditional_update(
        &self,
        id: &EntityId,
        expected_version: u64,
        mutate: impl FnOnce(&mut Fields),
    ) -> Result<VersionedRecord, LatchError> {
        let now = self.clock.now();
        self.store
            .conditional_update(id, expected_version, mutate, now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;

    fn setup() -> (Arc<MemoryStore>, Arc<VersionController>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::from_system());
        let versions = Arc::new(VersionController::new(Arc::clone(&store), clock));
        (store, versions)
    }

    #[tokio::test]
    async fn update_bumps_version_by_exactly_one() {
        let (_store, versions) = setup();
        let record = versions.create(Fields::new()).await;
        assert_eq!(record.version, 0);

        let updated = versions
            .conditional_update(&record.id, 0, |fields| {
                fields.insert("summaries_used".into(), 1.into());
            })
            .await
            .unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(updated.fields["summaries_used"], 1);
    }

    #[tokio::test]
    async fn stale_expectation_conflicts() {
        let (_store, versions) = setup();
        let record = versions.create(Fields::new()).await;

        versions
            .conditional_update(&record.id, 0, |_| {})
            .await
            .unwrap();

        // Replaying the same expected version now loses.
        let err = versions
            .conditional_update(&record.id, 0, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LatchError::VersionConflict { expected: 0, .. }
        ));
    }

    #[tokio::test]
    async fn missing_row_is_a_version_conflict() {
        let (_store, versions) = setup();
        let err = versions
            .conditional_update(&EntityId::generate(), 0, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LatchError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn concurrent_writers_from_same_base_elect_one_winner() {
        let (_store, versions) = setup();
        let record = versions.create(Fields::new()).await;

        let mut joins = Vec::new();
        for n in 0..2 {
            let versions = Arc::clone(&versions);
            let id = record.id;
            joins.push(tokio::spawn(async move {
                versions
                    .conditional_update(&id, 0, move |fields| {
                        fields.insert("writer".into(), n.into());
                    })
                    .await
            }));
        }

        let mut winners = Vec::new();
        for join in joins {
            if let Ok(updated) = join.await.unwrap() {
                winners.push(updated);
            }
        }
        assert_eq!(winners.len(), 1);

        // The record reflects only the winner's mutation.
        let after = versions.get(&record.id).await.unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.fields["writer"], winners[0].fields["writer"]);
    }
}

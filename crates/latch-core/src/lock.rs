//! TTL-bound mutual-exclusion leases keyed by arbitrary strings.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{HolderId, LockHandle};
use crate::error::LatchError;
use crate::ports::{Clock, from_std};
use crate::store::MemoryStore;

/// Named lease manager.
///
/// There is no wait queue: a racing acquirer gets [`LatchError::LockConflict`]
/// back immediately and decides for itself whether to retry or abandon. TTL
/// expiry is the only thing that frees a crashed holder's lock; callers with
/// long critical sections renew periodically instead of taking one long
/// lease.
pub struct LockManager {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Take the lease for `key` until now + ttl.
    ///
    /// Fails fast with `LockConflict` while another holder's lease is live;
    /// an expired leftover row does not block.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockHandle, LatchError> {
        let now = self.clock.now();
        let holder = HolderId::generate();
        let row = self
            .store
            .insert_lock(key, holder, now + from_std(ttl), now)
            .await?;
        debug!(key = %row.key, holder = %holder, "lock acquired");
        Ok(LockHandle {
            key: row.key,
            holder,
        })
    }

    /// Extend the lease. Conditional on the handle still being the live
    /// holder; after expiry the key may belong to someone else, so a lapsed
    /// handle gets `LockConflict`, not a resurrection.
    pub async fn renew(&self, handle: &LockHandle, ttl: Duration) -> Result<(), LatchError> {
        let now = self.clock.now();
        self.store
            .renew_lock(&handle.key, handle.holder, now + from_std(ttl), now)
            .await?;
        Ok(())
    }

    /// Give the lease back. Idempotent: releasing a lock that expired or was
    /// never ours is a no-op, never an error.
    pub async fn release(&self, handle: &LockHandle) {
        let deleted = self.store.delete_lock(&handle.key, handle.holder).await;
        if deleted {
            debug!(key = %handle.key, "lock released");
        }
    }

    /// Read-only liveness check, lazy-expiry rules included.
    pub async fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.store
            .get_lock(key)
            .await
            .is_some_and(|row| row.is_live(now))
    }

    /// Drop expired rows (the reaper calls this; correctness never depends
    /// on it).
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.store.purge_expired_locks(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;

    const TTL: Duration = Duration::from_secs(30);

    fn setup() -> (Arc<ManualClock>, LockManager) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::from_system());
        let locks = LockManager::new(store, clock.clone());
        (clock, locks)
    }

    #[tokio::test]
    async fn second_acquire_conflicts_until_expiry() {
        let (clock, locks) = setup();

        let handle = locks.acquire("billing:user:42", TTL).await.unwrap();
        assert!(locks.is_held("billing:user:42").await);

        let err = locks.acquire("billing:user:42", TTL).await.unwrap_err();
        assert!(matches!(err, LatchError::LockConflict { .. }));

        clock.advance(chrono::Duration::seconds(31));
        assert!(!locks.is_held("billing:user:42").await);
        let second = locks.acquire("billing:user:42", TTL).await.unwrap();
        assert_ne!(second.holder, handle.holder);
    }

    #[tokio::test]
    async fn concurrent_acquires_elect_exactly_one_holder() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::from_system());
        let locks = Arc::new(LockManager::new(store, clock));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            joins.push(tokio::spawn(async move {
                locks.acquire("summary:video:7", TTL).await
            }));
        }

        let mut winners = 0;
        for join in joins {
            match join.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LatchError::LockConflict { key }) => assert_eq!(key, "summary:video:7"),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_holder_conditional() {
        let (clock, locks) = setup();

        let stale = locks.acquire("k", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));
        let current = locks.acquire("k", TTL).await.unwrap();

        // The lapsed handle must not free the new holder's lease.
        locks.release(&stale).await;
        assert!(locks.is_held("k").await);

        locks.release(&current).await;
        assert!(!locks.is_held("k").await);

        // Releasing again is a quiet no-op.
        locks.release(&current).await;
    }

    #[tokio::test]
    async fn renew_extends_only_a_live_lease() {
        let (clock, locks) = setup();

        let handle = locks.acquire("k", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(20));
        locks.renew(&handle, TTL).await.unwrap();

        // 20s + renewed 30s: still held well past the original expiry.
        clock.advance(chrono::Duration::seconds(25));
        assert!(locks.is_held("k").await);

        clock.advance(chrono::Duration::seconds(31));
        let err = locks.renew(&handle, TTL).await.unwrap_err();
        assert!(matches!(err, LatchError::LockConflict { .. }));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_rows() {
        let (clock, locks) = setup();

        locks.acquire("old", TTL).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));
        locks.acquire("fresh", TTL).await.unwrap();

        assert_eq!(locks.purge_expired().await, 1);
        assert!(locks.is_held("fresh").await);
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use latch_core::app::{EventApplier, Processor, Reaper, WorkerGroup};
use latch_core::domain::{EntityId, EventRecord, Fields};
use latch_core::error::LatchError;
use latch_core::inbound::{InboundReceiver, SignatureVerifier};
use latch_core::lock::LockManager;
use latch_core::ports::{EventInbox, SystemClock};
use latch_core::queue::{EventQueue, QueueConfig, RetryPolicy};
use latch_core::store::MemoryStore;
use latch_core::txn::{TransactionCoordinator, TxnScope};
use latch_core::version::VersionController;

/// Demo verifier: a shared-secret comparison stands in for the provider's
/// real signature scheme.
struct SharedSecretVerifier {
    secret: &'static str,
}

impl SignatureVerifier for SharedSecretVerifier {
    fn verify(&self, _payload: &[u8], signature: &str) -> bool {
        signature == self.secret
    }
}

/// Credits one summary onto the account; fails the first `n` applies so the
/// retry/backoff path is visible in the log.
struct CreditApplier {
    account: EntityId,
    remaining_failures: AtomicU32,
}

impl CreditApplier {
    fn new(account: EntityId, n: u32) -> Self {
        Self {
            account,
            remaining_failures: AtomicU32::new(n),
        }
    }
}

impl EventApplier for CreditApplier {
    fn apply(&self, txn: &mut TxnScope<'_>, event: &EventRecord) -> Result<(), LatchError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(LatchError::Other(format!("intentional failure (left={left})")));
        }

        let record = txn
            .get_record(&self.account)
            .ok_or_else(|| LatchError::Other("account record missing".into()))?;
        txn.update_record(&self.account, record.version, |fields| {
            let used = fields
                .get("summaries_used")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            fields.insert("summaries_used".into(), (used + 1).into());
        })?;
        println!("applied {} (attempt {})", event.id, event.attempts);
        Ok(())
    }

    fn lock_key(&self, _event: &EventRecord) -> Option<String> {
        Some(format!("account:{}", self.account))
    }
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,latch_core=debug"));
    fmt().with_env_filter(filter).init();

    // (A) One store, one clock; everything else is stateless glue.
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    let queue = Arc::new(EventQueue::new(
        Arc::clone(&store),
        clock.clone(),
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(50),
        },
        QueueConfig::default(),
    ));
    let locks = Arc::new(LockManager::new(Arc::clone(&store), clock.clone()));
    let versions = VersionController::new(Arc::clone(&store), clock.clone());
    let txn = Arc::new(TransactionCoordinator::new(Arc::clone(&store), clock));

    // (B) The account record the webhook will credit.
    let mut fields = Fields::new();
    fields.insert("email".into(), "demo@example.com".into());
    let account = versions.create(fields).await;
    println!("created account {} at version {}", account.id, account.version);

    // (C) One worker (fails twice on purpose), plus the reaper chore.
    let processor = Arc::new(Processor::new(
        Arc::clone(&queue),
        txn,
        Arc::clone(&locks),
        Arc::new(CreditApplier::new(account.id, 2)),
    ));
    let workers = WorkerGroup::spawn(1, processor, Duration::from_millis(10));
    let reaper = Reaper::new(Arc::clone(&queue), locks, Duration::from_secs(30)).spawn();

    // (D) The provider delivers the same callback twice; the second one acks
    // without creating a second row.
    let receiver = InboundReceiver::new(
        "billing",
        Arc::new(SharedSecretVerifier { secret: "s3cr3t" }),
        Arc::clone(&queue) as Arc<dyn EventInbox>,
        5,
    );
    let payload = serde_json::json!({"type": "summary.purchased"}).to_string();
    let row = receiver.receive("evt_1001", payload.as_bytes(), "s3cr3t").await.unwrap();
    println!("acked {} (status {:?})", row.id, row.status);
    let dup = receiver.receive("evt_1001", payload.as_bytes(), "s3cr3t").await.unwrap();
    println!("acked redelivery of {} (still one row, seq {})", dup.id, dup.seq);

    // A forged callback never reaches the queue.
    let forged = receiver.receive("evt_6666", payload.as_bytes(), "wrong").await;
    println!("forged callback: {}", forged.unwrap_err());

    // (E) Wait for the event to reach a terminal state.
    loop {
        let current = queue.get(&row.id).await.expect("row exists");
        if current.status.is_terminal() {
            println!(
                "final status: {:?} after {} attempts (last error: {:?})",
                current.status, current.attempts, current.error
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let after = versions.get(&account.id).await.expect("account exists");
    println!(
        "account {} now at version {} with summaries_used={}",
        after.id, after.version, after.fields["summaries_used"]
    );
    println!("counts: {:?}", queue.counts_by_state().await);

    // (F) Graceful shutdown.
    workers.shutdown_and_join().await;
    reaper.shutdown_and_join().await;
}

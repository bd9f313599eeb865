use thiserror::Error;

use crate::domain::{EntityId, EventId};

/// Closed error set for the core.
///
/// `LockConflict` and `VersionConflict` are normal control flow under
/// contention: another writer won, and the caller decides whether to re-read
/// and retry or abandon. `Storage` is the infrastructure-fatal seam; callers
/// retry those with backoff instead of treating them as logic errors.
#[derive(Debug, Error)]
pub enum LatchError {
    #[error("lock conflict on key={key}")]
    LockConflict { key: String },

    #[error("version conflict on record={id} expected_version={expected}")]
    VersionConflict { id: EntityId, expected: u64 },

    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] Box<LatchError>),

    #[error("event {id} exhausted after {attempts} attempts")]
    EventExhausted { id: EventId, attempts: u32 },

    #[error("event {id} processing failed: {reason}")]
    EventProcessingFailed { id: EventId, reason: String },

    #[error("unknown event {0}")]
    UnknownEvent(EventId),

    #[error("invalid event id: {0}")]
    InvalidEventId(String),

    #[error("inbound signature rejected")]
    SignatureRejected,

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

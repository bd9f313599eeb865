//! Inbox port: the webhook boundary's view of the queue.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{EventId, EventRecord};
use crate::error::LatchError;

/// Write side of the durable event inbox.
///
/// The receiving boundary talks to this seam rather than to the concrete
/// queue, so the inbound surface can be exercised without standing up
/// workers.
#[async_trait]
pub trait EventInbox: Send + Sync {
    /// Idempotent enqueue: reusing an id returns the existing row unchanged.
    async fn enqueue(
        &self,
        id: EventId,
        payload: Value,
        max_attempts: u32,
    ) -> Result<EventRecord, LatchError>;
}

//! Inbound webhook boundary.
//!
//! The provider is acked as soon as the event sits durably in the inbox;
//! applying it happens later on the worker path. Redelivery is the
//! provider's prerogative and lands on the idempotent-enqueue path.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{EventId, EventRecord};
use crate::error::LatchError;
use crate::ports::EventInbox;

/// Authenticity check for inbound callbacks. The provider-specific crypto
/// lives with the integration that owns the signing secret, not here.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> bool;
}

/// Receiving boundary for one provider's callbacks.
pub struct InboundReceiver {
    provider: String,
    verifier: Arc<dyn SignatureVerifier>,
    inbox: Arc<dyn EventInbox>,
    max_attempts: u32,
}

impl InboundReceiver {
    pub fn new(
        provider: impl Into<String>,
        verifier: Arc<dyn SignatureVerifier>,
        inbox: Arc<dyn EventInbox>,
        max_attempts: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            verifier,
            inbox,
            max_attempts,
        }
    }

    /// Verify, enqueue under a provider-derived idempotency key, ack.
    ///
    /// A returned `Ok` is the ack: it means "durably queued", not
    /// "processed".
    pub async fn receive(
        &self,
        provider_event_id: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<EventRecord, LatchError> {
        if !self.verifier.verify(payload, signature) {
            warn!(
                provider = %self.provider,
                provider_event_id,
                "rejected callback with bad signature"
            );
            return Err(LatchError::SignatureRejected);
        }

        let id = EventId::new(format!("{}:{}", self.provider, provider_event_id))?;
        let payload: Value = serde_json::from_slice(payload)
            .map_err(|e| LatchError::Other(format!("callback payload decode: {e}")))?;

        let row = self.inbox.enqueue(id, payload, self.max_attempts).await?;
        debug!(provider = %self.provider, event = %row.id, "callback accepted");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;
    use crate::queue::{EventQueue, QueueConfig, RetryPolicy};
    use crate::store::MemoryStore;

    struct StaticVerifier;

    impl SignatureVerifier for StaticVerifier {
        fn verify(&self, _payload: &[u8], signature: &str) -> bool {
            signature == "valid"
        }
    }

    fn receiver() -> (Arc<EventQueue>, InboundReceiver) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::from_system());
        let queue = Arc::new(EventQueue::new(
            store,
            clock,
            RetryPolicy::default(),
            QueueConfig::default(),
        ));
        let receiver = InboundReceiver::new(
            "stripe",
            Arc::new(StaticVerifier),
            Arc::clone(&queue) as Arc<dyn EventInbox>,
            3,
        );
        (queue, receiver)
    }

    #[tokio::test]
    async fn valid_callback_is_queued_under_provider_key() {
        let (queue, receiver) = receiver();

        let row = receiver
            .receive("evt_42", br#"{"type":"invoice.paid"}"#, "valid")
            .await
            .unwrap();

        assert_eq!(row.id.as_str(), "stripe:evt_42");
        assert_eq!(row.payload["type"], "invoice.paid");
        assert_eq!(queue.counts_by_state().await.pending, 1);
    }

    #[tokio::test]
    async fn bad_signature_never_reaches_the_queue() {
        let (queue, receiver) = receiver();

        let err = receiver
            .receive("evt_42", br#"{}"#, "forged")
            .await
            .unwrap_err();

        assert!(matches!(err, LatchError::SignatureRejected));
        assert_eq!(queue.counts_by_state().await.pending, 0);
    }

    #[tokio::test]
    async fn redelivery_acks_without_duplicating() {
        let (queue, receiver) = receiver();

        receiver
            .receive("evt_42", br#"{"n":1}"#, "valid")
            .await
            .unwrap();
        let replay = receiver
            .receive("evt_42", br#"{"n":1}"#, "valid")
            .await
            .unwrap();

        assert_eq!(replay.id.as_str(), "stripe:evt_42");
        assert_eq!(queue.counts_by_state().await.pending, 1);
    }
}

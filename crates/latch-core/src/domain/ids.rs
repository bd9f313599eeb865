//! Strongly-typed identifiers.
//!
//! Internal ids are ULID-backed: sortable by creation time, generated without
//! coordination on any worker, and 128-bit. A generic `Id<T>` with a phantom
//! marker keeps the implementations shared while making `EntityId` and
//! `HolderId` distinct at compile time.
//!
//! `EventId` is different on purpose: it is the caller-supplied idempotency
//! key, so it is a validated string rather than something we generate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

use crate::error::LatchError;

/// Marker trait for each id type.
///
/// Provides the prefix used by Display ("rec-", "holder-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id type.
///
/// `T` is phantom: it costs nothing at runtime and stops an `EntityId` from
/// being passed where a `HolderId` is expected.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Mint a fresh id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for versioned records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {}

impl IdMarker for Entity {
    fn prefix() -> &'static str {
        "rec-"
    }
}

/// Marker for lock holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Holder {}

impl IdMarker for Holder {
    fn prefix() -> &'static str {
        "holder-"
    }
}

/// Identifier of a versioned record.
pub type EntityId = Id<Entity>;

/// Identifier of one lock acquire (proof of ownership, not the key).
pub type HolderId = Id<Holder>;

/// Caller-supplied idempotency key for a queued event.
///
/// Reusing the same key for the same logical event must never create a
/// duplicate row, so the key has to be stable across redeliveries: derive it
/// from the provider's own event identifier, never from a fresh random id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    const MAX_LENGTH: usize = 128;

    pub fn new(key: impl Into<String>) -> Result<Self, LatchError> {
        let key = key.into();
        if key.is_empty() {
            return Err(LatchError::InvalidEventId("empty key".into()));
        }
        if key.len() > Self::MAX_LENGTH {
            return Err(LatchError::InvalidEventId(format!(
                "key exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        {
            return Err(LatchError::InvalidEventId(format!(
                "key {key:?} contains characters outside a-z A-Z 0-9 - _ : ."
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let entity = EntityId::generate();
        let holder = HolderId::generate();

        assert!(entity.to_string().starts_with("rec-"));
        assert!(holder.to_string().starts_with("holder-"));

        // The whole point: you can't accidentally mix these types.
        // (Compile-time property, kept as a comment.)
        // let _: EntityId = holder; // <- does not compile
    }

    #[test]
    fn ulid_ids_sort_by_creation_order() {
        let a = EntityId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EntityId::generate();

        assert!(a < b);
    }

    #[test]
    fn ids_serde_roundtrip() {
        let id = EntityId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn event_id_accepts_provider_shaped_keys() {
        let id = EventId::new("stripe:evt_1LqOau2eZvKYlo2C").unwrap();
        assert_eq!(id.as_str(), "stripe:evt_1LqOau2eZvKYlo2C");
    }

    #[test]
    fn event_id_rejects_bad_keys() {
        assert!(matches!(
            EventId::new(""),
            Err(LatchError::InvalidEventId(_))
        ));
        assert!(matches!(
            EventId::new("a".repeat(200)),
            Err(LatchError::InvalidEventId(_))
        ));
        assert!(matches!(
            EventId::new("evt 1"),
            Err(LatchError::InvalidEventId(_))
        ));
    }
}

//! Versioned record row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EntityId;

/// Domain fields of a record, schema-free at this layer.
pub type Fields = Map<String, Value>;

/// A record protected by optimistic concurrency control.
///
/// `version` starts at 0 and moves by exactly +1 per successful write; it
/// never wraps, resets, or skips. Every mutation goes through the store's
/// conditional-write path; nothing else touches `fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub id: EntityId,
    pub fields: Fields,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionedRecord {
    pub fn new(id: EntityId, fields: Fields, now: DateTime<Utc>) -> Self {
        Self {
            id,
            fields,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a mutation and bump the version, as one step.
    pub(crate) fn apply(&mut self, mutate: impl FnOnce(&mut Fields), now: DateTime<Utc>) {
        mutate(&mut self.fields);
        self.version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_at_version_zero() {
        let now = Utc::now();
        let record = VersionedRecord::new(EntityId::generate(), Fields::new(), now);
        assert_eq!(record.version, 0);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn apply_bumps_version_by_one() {
        let now = Utc::now();
        let mut record = VersionedRecord::new(EntityId::generate(), Fields::new(), now);

        record.apply(
            |fields| {
                fields.insert("plan".into(), "pro".into());
            },
            now,
        );

        assert_eq!(record.version, 1);
        assert_eq!(record.fields["plan"], "pro");
    }
}

//! Lock rows and handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::HolderId;

/// A named mutual-exclusion lease row.
///
/// At most one live row exists per key. A row whose `expires_at` has passed
/// is treated as absent even if it physically remains (lazy reclamation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRow {
    /// The resource being protected. Keys are collision domains, not a
    /// hierarchy.
    pub key: String,
    pub holder: HolderId,
    pub expires_at: DateTime<Utc>,
}

impl LockRow {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Proof of ownership returned by a successful acquire.
///
/// Release and renew are conditional on the holder id, so a handle from an
/// earlier, expired lease can never release somebody else's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub holder: HolderId,
}

use serde::{Deserialize, Serialize};

/// Point-in-time event counts by state.
///
/// `failed` is the number an operator dashboard should alarm on; exhausted
/// events never retry on their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

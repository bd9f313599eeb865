//! Application loops gluing the queue, locks, and transactions together.

mod reaper;
mod worker;

pub use reaper::{ReapReport, Reaper, ReaperHandle};
pub use worker::{EventApplier, ProcessOutcome, Processor, WorkerGroup};

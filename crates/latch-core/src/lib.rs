//! latch-core
//!
//! Concurrency-safety core: protects shared mutable state (account records,
//! one-shot external events) from races caused by concurrent requests,
//! webhook redelivery, and retried operations. All coordination goes through
//! one durable store; every other component is stateless and horizontally
//! scalable.
//!
//! # Modules
//! - **domain**: rows, strongly-typed ids, state machines
//! - **ports**: swap seams (`Clock`, `EventInbox`)
//! - **store**: in-memory durable store exposing atomic conditional writes
//! - **lock**: TTL-bound mutual-exclusion leases keyed by string
//! - **version**: optimistic concurrency control for record updates
//! - **queue**: durable at-least-once event inbox with retry/backoff
//! - **txn**: all-or-nothing multi-write scopes
//! - **inbound**: webhook receiving boundary (verify, dedupe, ack)
//! - **app**: worker and reaper loops

pub mod app;
pub mod domain;
pub mod error;
pub mod inbound;
pub mod lock;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod store;
pub mod txn;
pub mod version;

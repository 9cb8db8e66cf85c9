//! Offline-first replication between a local cache and the authoritative
//! store.
//!
//! # Responsibility
//! - Define the replicable change set and its JSON wire contracts.
//! - Queue, push and replay local changes; reconcile authoritative
//!   snapshots back into the cache.
//!
//! # Invariants
//! - Queued changes replay in enqueue order and leave the queue only by
//!   acknowledged-prefix truncation.
//! - Reconciliation never duplicates a locally created record.

pub mod change;
pub mod client;
pub mod engine;
pub mod http_transport;
pub mod local_cache;
pub mod loopback;
pub mod reconciler;
pub mod sync_queue;
pub mod transport;
pub mod wire;

//! Family-scoped domain model shared by the authoritative store and the
//! device-local cache.
//!
//! # Responsibility
//! - Define canonical records for members, chores, assignments and point
//!   history.
//! - Keep payload validation rules next to the records they protect.
//!
//! # Invariants
//! - Every record is identified by a stable UUID and carries its family scope.
//! - `remote_id` is only set on local-cache rows linked to an authoritative
//!   record; it stays `None` inside the authoritative store.

pub mod assignment;
pub mod chore;
pub mod member;
pub mod points;
pub mod validation;

use uuid::Uuid;

/// Family scope identifier. Every repository call is bound to exactly one.
pub type FamilyId = Uuid;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//! Applied-change log used to make replays idempotent.
//!
//! # Invariants
//! - One row per `(family_id, change_id)`; a recorded result never changes.
//! - Rows only disappear through [`ChangeLogRepository::prune_applied_before`].

use crate::model::now_epoch_ms;
use crate::repo::{RepoResult, SqliteFamilyRepository};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

pub trait ChangeLogRepository {
    /// Serialized result recorded for `change_id`, if it was applied before.
    fn applied_result(&self, change_id: Uuid) -> RepoResult<Option<String>>;
    fn record_applied(&self, change_id: Uuid, kind: &str, result: &str) -> RepoResult<()>;
    /// Drops results applied before `cutoff_ms` and returns how many went.
    fn prune_applied_before(&self, cutoff_ms: i64) -> RepoResult<usize>;
}

impl ChangeLogRepository for SqliteFamilyRepository<'_> {
    fn applied_result(&self, change_id: Uuid) -> RepoResult<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT result FROM applied_changes
                 WHERE family_id = ?1 AND change_id = ?2;",
                params![self.family_key(), change_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    fn record_applied(&self, change_id: Uuid, kind: &str, result: &str) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO applied_changes (family_id, change_id, kind, result, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                self.family_key(),
                change_id.to_string(),
                kind,
                result,
                now_epoch_ms()
            ],
        )?;
        Ok(())
    }

    fn prune_applied_before(&self, cutoff_ms: i64) -> RepoResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM applied_changes WHERE family_id = ?1 AND applied_at < ?2;",
            params![self.family_key(), cutoff_ms],
        )?;
        Ok(removed)
    }
}

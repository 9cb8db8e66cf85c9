//! Correlation between local-cache rows and authoritative ids.
//!
//! # Responsibility
//! - Find local rows by the authoritative id they are linked to.
//! - Offer the fallback matches used before inserting a duplicate: name for
//!   members and chores, `(chore, date)` slot for assignments.
//!
//! # Invariants
//! - `remote_id` is unique per table; a row is linked at most once.
//! - Fallback matches only consider rows that are not linked yet.

use crate::model::chore::ChoreId;
use crate::repo::{format_date, parse_uuid, RepoError, RepoResult, SqliteFamilyRepository};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

/// Local table carrying a `remote_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatedTable {
    Members,
    Chores,
    Assignments,
}

impl CorrelatedTable {
    pub const ALL: [CorrelatedTable; 3] = [Self::Members, Self::Chores, Self::Assignments];

    fn table(self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Chores => "chores",
            Self::Assignments => "assignments",
        }
    }

    fn entity(self) -> &'static str {
        match self {
            Self::Members => "member",
            Self::Chores => "chore",
            Self::Assignments => "assignment",
        }
    }
}

pub trait CorrelationRepository {
    /// Local id of the row linked to `remote_id`.
    fn local_id_for(&self, table: CorrelatedTable, remote_id: Uuid) -> RepoResult<Option<Uuid>>;
    /// Authoritative id a local row is linked to.
    fn remote_id_for(&self, table: CorrelatedTable, local_id: Uuid) -> RepoResult<Option<Uuid>>;
    /// Oldest unlinked member or chore with the same name, ignoring case.
    fn unlinked_by_name(&self, table: CorrelatedTable, name: &str) -> RepoResult<Option<Uuid>>;
    /// Unlinked assignment occupying the `(chore, date)` slot.
    fn unlinked_in_slot(&self, chore_id: ChoreId, date: NaiveDate) -> RepoResult<Option<Uuid>>;
    fn link(&self, table: CorrelatedTable, local_id: Uuid, remote_id: Uuid) -> RepoResult<()>;
    /// Linked rows as `(local_id, remote_id)` pairs.
    fn linked_rows(&self, table: CorrelatedTable) -> RepoResult<Vec<(Uuid, Uuid)>>;
}

impl CorrelationRepository for SqliteFamilyRepository<'_> {
    fn local_id_for(&self, table: CorrelatedTable, remote_id: Uuid) -> RepoResult<Option<Uuid>> {
        let sql = format!(
            "SELECT id FROM {} WHERE remote_id = ?1 AND family_id = ?2;",
            table.table()
        );
        self.optional_id(&sql, params![remote_id.to_string(), self.family_key()], table)
    }

    fn remote_id_for(&self, table: CorrelatedTable, local_id: Uuid) -> RepoResult<Option<Uuid>> {
        let sql = format!(
            "SELECT remote_id FROM {} WHERE id = ?1 AND family_id = ?2 AND remote_id IS NOT NULL;",
            table.table()
        );
        self.optional_id(&sql, params![local_id.to_string(), self.family_key()], table)
    }

    fn unlinked_by_name(&self, table: CorrelatedTable, name: &str) -> RepoResult<Option<Uuid>> {
        if table == CorrelatedTable::Assignments {
            return Err(RepoError::InvalidData(
                "assignments have no name to correlate by".to_string(),
            ));
        }

        let sql = format!(
            "SELECT id FROM {}
             WHERE family_id = ?1
               AND remote_id IS NULL
               AND name = ?2 COLLATE NOCASE
             ORDER BY created_at ASC, id ASC
             LIMIT 1;",
            table.table()
        );
        self.optional_id(&sql, params![self.family_key(), name.trim()], table)
    }

    fn unlinked_in_slot(&self, chore_id: ChoreId, date: NaiveDate) -> RepoResult<Option<Uuid>> {
        self.optional_id(
            "SELECT id FROM assignments
             WHERE family_id = ?1
               AND chore_id = ?2
               AND due_date = ?3
               AND remote_id IS NULL;",
            params![self.family_key(), chore_id.to_string(), format_date(date)],
            CorrelatedTable::Assignments,
        )
    }

    fn link(&self, table: CorrelatedTable, local_id: Uuid, remote_id: Uuid) -> RepoResult<()> {
        let sql = format!(
            "UPDATE {}
             SET
                remote_id = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2 AND family_id = ?3;",
            table.table()
        );
        let changed = self.conn.execute(
            &sql,
            params![remote_id.to_string(), local_id.to_string(), self.family_key()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: table.entity(),
                id: local_id,
            });
        }

        Ok(())
    }

    fn linked_rows(&self, table: CorrelatedTable) -> RepoResult<Vec<(Uuid, Uuid)>> {
        let sql = format!(
            "SELECT id, remote_id FROM {}
             WHERE family_id = ?1 AND remote_id IS NOT NULL
             ORDER BY id ASC;",
            table.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([self.family_key()])?;
        let column = format!("{}.remote_id", table.table());

        let mut linked = Vec::new();
        while let Some(row) = rows.next()? {
            let local: String = row.get(0)?;
            let remote: String = row.get(1)?;
            linked.push((parse_uuid(&local, &column)?, parse_uuid(&remote, &column)?));
        }

        Ok(linked)
    }
}

impl SqliteFamilyRepository<'_> {
    fn optional_id(
        &self,
        sql: &str,
        bind: &[&dyn rusqlite::ToSql],
        table: CorrelatedTable,
    ) -> RepoResult<Option<Uuid>> {
        let text: Option<String> = self
            .conn
            .query_row(sql, bind, |row| row.get(0))
            .optional()?;

        text.map(|value| parse_uuid(&value, table.table())).transpose()
    }
}

//! Assignment repository contract and SQLite implementation.
//!
//! # Invariants
//! - `(chore_id, due_date)` is unique; `insert_assignment` reports an
//!   occupied slot instead of failing.
//! - Dates are stored as `YYYY-MM-DD` so text order equals date order.

use crate::model::assignment::{Assignment, AssignmentId, AssignmentStatus, DateRange};
use crate::model::chore::ChoreId;
use crate::repo::{
    format_date, parse_date, parse_optional_uuid, parse_uuid, RepoError, RepoResult,
    SqliteFamilyRepository,
};
use chrono::NaiveDate;
use rusqlite::{params, Row, ToSql};

const ASSIGNMENT_SELECT_SQL: &str = "SELECT
    id,
    family_id,
    chore_id,
    member_id,
    due_date,
    status,
    completed_at,
    points_awarded,
    remote_id
FROM assignments";

pub trait AssignmentRepository {
    /// Inserts an assignment. Returns `false` when its `(chore, date)` slot
    /// is already taken.
    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<bool>;
    /// Persists member, date, status and completion fields.
    fn update_assignment(&self, assignment: &Assignment) -> RepoResult<()>;
    fn get_assignment(&self, id: AssignmentId) -> RepoResult<Option<Assignment>>;
    /// Assignment occupying the `(chore, date)` slot.
    fn assignment_on(&self, chore_id: ChoreId, date: NaiveDate) -> RepoResult<Option<Assignment>>;
    /// Latest assignment of a chore due strictly before `before`.
    fn latest_assignment_before(
        &self,
        chore_id: ChoreId,
        before: NaiveDate,
    ) -> RepoResult<Option<Assignment>>;
    /// Assignments of one chore ordered by due date.
    fn list_assignments_for_chore(&self, chore_id: ChoreId) -> RepoResult<Vec<Assignment>>;
    /// Assignments due within the inclusive range, ordered by date then chore.
    fn list_assignments_between(&self, range: &DateRange) -> RepoResult<Vec<Assignment>>;
    fn list_assignments(&self) -> RepoResult<Vec<Assignment>>;
    /// Deletes pending assignments of a chore dated `from` or later.
    fn delete_pending_from(&self, chore_id: ChoreId, from: NaiveDate) -> RepoResult<usize>;
    fn delete_assignment(&self, id: AssignmentId) -> RepoResult<()>;
}

impl AssignmentRepository for SqliteFamilyRepository<'_> {
    fn insert_assignment(&self, assignment: &Assignment) -> RepoResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO assignments (
                id,
                family_id,
                chore_id,
                member_id,
                due_date,
                status,
                completed_at,
                points_awarded,
                remote_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (chore_id, due_date) DO NOTHING;",
            params![
                assignment.id.to_string(),
                self.family_key(),
                assignment.chore_id.to_string(),
                assignment.member_id.to_string(),
                format_date(assignment.due_date),
                assignment.status.as_str(),
                assignment.completed_at,
                assignment.points_awarded,
                assignment.remote_id.map(|id| id.to_string()),
            ],
        )?;

        Ok(inserted == 1)
    }

    fn update_assignment(&self, assignment: &Assignment) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE assignments
             SET
                member_id = ?1,
                due_date = ?2,
                status = ?3,
                completed_at = ?4,
                points_awarded = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?6 AND family_id = ?7;",
            params![
                assignment.member_id.to_string(),
                format_date(assignment.due_date),
                assignment.status.as_str(),
                assignment.completed_at,
                assignment.points_awarded,
                assignment.id.to_string(),
                self.family_key(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "assignment",
                id: assignment.id,
            });
        }

        Ok(())
    }

    fn get_assignment(&self, id: AssignmentId) -> RepoResult<Option<Assignment>> {
        self.query_assignment(
            &format!("{ASSIGNMENT_SELECT_SQL} WHERE id = ?1 AND family_id = ?2;"),
            params![id.to_string(), self.family_key()],
        )
    }

    fn assignment_on(&self, chore_id: ChoreId, date: NaiveDate) -> RepoResult<Option<Assignment>> {
        self.query_assignment(
            &format!(
                "{ASSIGNMENT_SELECT_SQL}
                 WHERE chore_id = ?1 AND due_date = ?2 AND family_id = ?3;"
            ),
            params![chore_id.to_string(), format_date(date), self.family_key()],
        )
    }

    fn latest_assignment_before(
        &self,
        chore_id: ChoreId,
        before: NaiveDate,
    ) -> RepoResult<Option<Assignment>> {
        self.query_assignment(
            &format!(
                "{ASSIGNMENT_SELECT_SQL}
                 WHERE chore_id = ?1 AND family_id = ?2 AND due_date < ?3
                 ORDER BY due_date DESC
                 LIMIT 1;"
            ),
            params![chore_id.to_string(), self.family_key(), format_date(before)],
        )
    }

    fn list_assignments_for_chore(&self, chore_id: ChoreId) -> RepoResult<Vec<Assignment>> {
        self.query_assignments(
            &format!(
                "{ASSIGNMENT_SELECT_SQL}
                 WHERE chore_id = ?1 AND family_id = ?2
                 ORDER BY due_date ASC;"
            ),
            params![chore_id.to_string(), self.family_key()],
        )
    }

    fn list_assignments_between(&self, range: &DateRange) -> RepoResult<Vec<Assignment>> {
        self.query_assignments(
            &format!(
                "{ASSIGNMENT_SELECT_SQL}
                 WHERE family_id = ?1 AND due_date BETWEEN ?2 AND ?3
                 ORDER BY due_date ASC, chore_id ASC;"
            ),
            params![
                self.family_key(),
                format_date(range.start),
                format_date(range.end),
            ],
        )
    }

    fn list_assignments(&self) -> RepoResult<Vec<Assignment>> {
        self.query_assignments(
            &format!(
                "{ASSIGNMENT_SELECT_SQL}
                 WHERE family_id = ?1
                 ORDER BY due_date ASC, chore_id ASC;"
            ),
            params![self.family_key()],
        )
    }

    fn delete_pending_from(&self, chore_id: ChoreId, from: NaiveDate) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM assignments
             WHERE chore_id = ?1
               AND family_id = ?2
               AND status = 'pending'
               AND due_date >= ?3;",
            params![chore_id.to_string(), self.family_key(), format_date(from)],
        )?;

        Ok(deleted)
    }

    fn delete_assignment(&self, id: AssignmentId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM assignments WHERE id = ?1 AND family_id = ?2;",
            params![id.to_string(), self.family_key()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "assignment",
                id,
            });
        }

        Ok(())
    }
}

impl SqliteFamilyRepository<'_> {
    fn query_assignment(
        &self,
        sql: &str,
        bind: &[&dyn ToSql],
    ) -> RepoResult<Option<Assignment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(bind)?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_assignment_row(row)?));
        }

        Ok(None)
    }

    fn query_assignments(
        &self,
        sql: &str,
        bind: &[&dyn ToSql],
    ) -> RepoResult<Vec<Assignment>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(bind)?;
        let mut assignments = Vec::new();
        while let Some(row) = rows.next()? {
            assignments.push(parse_assignment_row(row)?);
        }

        Ok(assignments)
    }
}

pub(crate) fn parse_assignment_row(row: &Row<'_>) -> RepoResult<Assignment> {
    let id_text: String = row.get("id")?;
    let family_text: String = row.get("family_id")?;
    let chore_text: String = row.get("chore_id")?;
    let member_text: String = row.get("member_id")?;
    let date_text: String = row.get("due_date")?;

    let status_text: String = row.get("status")?;
    let status = AssignmentStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid assignment status `{status_text}` in assignments.status"
        ))
    })?;

    Ok(Assignment {
        id: parse_uuid(&id_text, "assignments.id")?,
        family_id: parse_uuid(&family_text, "assignments.family_id")?,
        chore_id: parse_uuid(&chore_text, "assignments.chore_id")?,
        member_id: parse_uuid(&member_text, "assignments.member_id")?,
        due_date: parse_date(&date_text, "assignments.due_date")?,
        status,
        completed_at: row.get("completed_at")?,
        points_awarded: row.get("points_awarded")?,
        remote_id: parse_optional_uuid(row.get("remote_id")?, "assignments.remote_id")?,
    })
}

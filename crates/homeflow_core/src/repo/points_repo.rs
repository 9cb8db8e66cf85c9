//! Point history persistence and derived point totals.

use crate::model::member::MemberId;
use crate::model::points::{PointEntry, PointSource};
use crate::repo::{parse_optional_uuid, parse_uuid, RepoError, RepoResult, SqliteFamilyRepository};
use rusqlite::{params, Row};

pub trait PointsRepository {
    fn record_point_entry(&self, entry: &PointEntry) -> RepoResult<()>;
    /// Lists history ordered by creation time.
    fn list_point_history(&self) -> RepoResult<Vec<PointEntry>>;
    /// Replaces the family's whole point history. Returns rows written.
    fn replace_point_history(&self, entries: &[PointEntry]) -> RepoResult<usize>;
    /// Totals recomputed from completed assignments plus manual adjustments,
    /// one row per member ordered by id.
    fn derived_point_totals(&self) -> RepoResult<Vec<(MemberId, i64)>>;
}

impl PointsRepository for SqliteFamilyRepository<'_> {
    fn record_point_entry(&self, entry: &PointEntry) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO point_history (
                id,
                family_id,
                member_id,
                chore_id,
                assignment_id,
                points,
                source,
                reason,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                entry.id.to_string(),
                self.family_key(),
                entry.member_id.to_string(),
                entry.chore_id.map(|id| id.to_string()),
                entry.assignment_id.map(|id| id.to_string()),
                entry.points,
                entry.source.as_str(),
                entry.reason.as_deref(),
                entry.created_at,
            ],
        )?;

        Ok(())
    }

    fn list_point_history(&self) -> RepoResult<Vec<PointEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                id,
                family_id,
                member_id,
                chore_id,
                assignment_id,
                points,
                source,
                reason,
                created_at
             FROM point_history
             WHERE family_id = ?1
             ORDER BY created_at ASC, id ASC;",
        )?;

        let mut rows = stmt.query([self.family_key()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_point_row(row)?);
        }

        Ok(entries)
    }

    fn replace_point_history(&self, entries: &[PointEntry]) -> RepoResult<usize> {
        self.conn.execute(
            "DELETE FROM point_history WHERE family_id = ?1;",
            [self.family_key()],
        )?;

        for entry in entries {
            self.record_point_entry(entry)?;
        }

        Ok(entries.len())
    }

    fn derived_point_totals(&self) -> RepoResult<Vec<(MemberId, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                m.id,
                COALESCE((
                    SELECT SUM(a.points_awarded)
                    FROM assignments a
                    WHERE a.member_id = m.id AND a.status = 'completed'
                ), 0)
                + COALESCE((
                    SELECT SUM(p.points)
                    FROM point_history p
                    WHERE p.member_id = m.id AND p.source = 'adjustment'
                ), 0) AS derived_total
             FROM members m
             WHERE m.family_id = ?1
             ORDER BY m.id ASC;",
        )?;

        let mut rows = stmt.query([self.family_key()])?;
        let mut totals = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            totals.push((parse_uuid(&id_text, "members.id")?, row.get(1)?));
        }

        Ok(totals)
    }
}

fn parse_point_row(row: &Row<'_>) -> RepoResult<PointEntry> {
    let id_text: String = row.get("id")?;
    let family_text: String = row.get("family_id")?;
    let member_text: String = row.get("member_id")?;

    let source_text: String = row.get("source")?;
    let source = PointSource::parse(&source_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid point source `{source_text}` in point_history.source"
        ))
    })?;

    Ok(PointEntry {
        id: parse_uuid(&id_text, "point_history.id")?,
        family_id: parse_uuid(&family_text, "point_history.family_id")?,
        member_id: parse_uuid(&member_text, "point_history.member_id")?,
        chore_id: parse_optional_uuid(row.get("chore_id")?, "point_history.chore_id")?,
        assignment_id: parse_optional_uuid(
            row.get("assignment_id")?,
            "point_history.assignment_id",
        )?,
        points: row.get("points")?,
        source,
        reason: row.get("reason")?,
        created_at: row.get("created_at")?,
    })
}

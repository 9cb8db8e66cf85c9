//! Chore repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist chores together with their eligible-member links.
//!
//! # Invariants
//! - Eligibility links only reference members of the same family; a write
//!   naming any other member id fails with `NotFound` and writes nothing.
//! - The restricted flag outlives its links: deleting the last eligible
//!   member leaves a restricted chore with nobody eligible.
//! - Deleting a chore cascades to its assignments and eligibility links.

use crate::model::chore::{Chore, ChoreId, Recurrence, RecurrenceUnit};
use crate::model::member::MemberId;
use crate::model::validation::ValidationError;
use crate::repo::{
    bool_to_int, int_to_bool, parse_optional_uuid, parse_uuid, with_savepoint, RepoError,
    RepoResult, SqliteFamilyRepository,
};
use log::warn;
use rusqlite::{params, Row};

const CHORE_SELECT_SQL: &str = "SELECT
    id,
    family_id,
    name,
    difficulty,
    interval_count,
    interval_unit,
    auto_assign,
    eligibility_restricted,
    remote_id
FROM chores";

pub trait ChoreRepository {
    fn create_chore(&self, chore: &Chore) -> RepoResult<ChoreId>;
    /// Persists all chore fields and replaces the eligible set.
    fn update_chore(&self, chore: &Chore) -> RepoResult<()>;
    fn get_chore(&self, id: ChoreId) -> RepoResult<Option<Chore>>;
    /// Lists chores ordered by id ascending.
    fn list_chores(&self) -> RepoResult<Vec<Chore>>;
    fn delete_chore(&self, id: ChoreId) -> RepoResult<()>;
}

impl ChoreRepository for SqliteFamilyRepository<'_> {
    fn create_chore(&self, chore: &Chore) -> RepoResult<ChoreId> {
        let mut normalized = chore.clone();
        normalized.normalize()?;

        with_savepoint(self.conn, || -> RepoResult<ChoreId> {
            self.conn.execute(
                "INSERT INTO chores (
                    id,
                    family_id,
                    name,
                    difficulty,
                    interval_count,
                    interval_unit,
                    auto_assign,
                    eligibility_restricted,
                    remote_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    normalized.id.to_string(),
                    self.family_key(),
                    normalized.name.as_str(),
                    i64::from(normalized.difficulty),
                    i64::from(normalized.recurrence.interval),
                    normalized.recurrence.unit.as_str(),
                    bool_to_int(normalized.auto_assign),
                    bool_to_int(normalized.restricted),
                    normalized.remote_id.map(|id| id.to_string()),
                ],
            )?;
            self.write_eligible_members(normalized.id, &normalized.eligible_members)?;
            Ok(normalized.id)
        })
    }

    fn update_chore(&self, chore: &Chore) -> RepoResult<()> {
        let mut normalized = chore.clone();
        normalized.normalize()?;

        with_savepoint(self.conn, || -> RepoResult<()> {
            let changed = self.conn.execute(
                "UPDATE chores
                 SET
                    name = ?1,
                    difficulty = ?2,
                    interval_count = ?3,
                    interval_unit = ?4,
                    auto_assign = ?5,
                    eligibility_restricted = ?6,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?7 AND family_id = ?8;",
                params![
                    normalized.name.as_str(),
                    i64::from(normalized.difficulty),
                    i64::from(normalized.recurrence.interval),
                    normalized.recurrence.unit.as_str(),
                    bool_to_int(normalized.auto_assign),
                    bool_to_int(normalized.restricted),
                    normalized.id.to_string(),
                    self.family_key(),
                ],
            )?;

            if changed == 0 {
                return Err(RepoError::NotFound {
                    entity: "chore",
                    id: chore.id,
                });
            }

            self.conn.execute(
                "DELETE FROM chore_eligible_members WHERE chore_id = ?1;",
                [normalized.id.to_string()],
            )?;
            self.write_eligible_members(normalized.id, &normalized.eligible_members)
        })
    }

    fn get_chore(&self, id: ChoreId) -> RepoResult<Option<Chore>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CHORE_SELECT_SQL}
             WHERE id = ?1 AND family_id = ?2;"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), self.family_key()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut chore = parse_chore_row(row)?;
        chore.eligible_members = self.read_eligible_members(chore.id)?;
        Ok(Some(chore))
    }

    fn list_chores(&self) -> RepoResult<Vec<Chore>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CHORE_SELECT_SQL}
             WHERE family_id = ?1
             ORDER BY id ASC;"
        ))?;

        let mut rows = stmt.query([self.family_key()])?;
        let mut chores = Vec::new();
        while let Some(row) = rows.next()? {
            chores.push(parse_chore_row(row)?);
        }

        for chore in &mut chores {
            chore.eligible_members = self.read_eligible_members(chore.id)?;
        }

        Ok(chores)
    }

    fn delete_chore(&self, id: ChoreId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM chores WHERE id = ?1 AND family_id = ?2;",
            params![id.to_string(), self.family_key()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound { entity: "chore", id });
        }

        Ok(())
    }
}

impl SqliteFamilyRepository<'_> {
    fn write_eligible_members(&self, chore_id: ChoreId, members: &[MemberId]) -> RepoResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO chore_eligible_members (chore_id, member_id)
             SELECT ?1, id FROM members WHERE id = ?2 AND family_id = ?3;",
        )?;

        for member_id in members {
            let inserted = stmt.execute(params![
                chore_id.to_string(),
                member_id.to_string(),
                self.family_key(),
            ])?;
            if inserted == 0 {
                warn!(
                    "event=eligible_members_write module=repo status=error chore_id={} member_id={} reason=unknown_member",
                    chore_id, member_id
                );
                return Err(RepoError::NotFound {
                    entity: "member",
                    id: *member_id,
                });
            }
        }

        Ok(())
    }

    fn read_eligible_members(&self, chore_id: ChoreId) -> RepoResult<Vec<MemberId>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id
             FROM chore_eligible_members
             WHERE chore_id = ?1
             ORDER BY member_id ASC;",
        )?;

        let mut rows = stmt.query([chore_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            members.push(parse_uuid(&text, "chore_eligible_members.member_id")?);
        }

        Ok(members)
    }
}

fn parse_chore_row(row: &Row<'_>) -> RepoResult<Chore> {
    let id_text: String = row.get("id")?;
    let family_text: String = row.get("family_id")?;

    let difficulty_value: i64 = row.get("difficulty")?;
    let difficulty = u8::try_from(difficulty_value).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid difficulty `{difficulty_value}` in chores.difficulty"
        ))
    })?;

    let interval_value: i64 = row.get("interval_count")?;
    let interval = u32::try_from(interval_value).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid interval `{interval_value}` in chores.interval_count"
        ))
    })?;

    let unit_text: String = row.get("interval_unit")?;
    let unit = RecurrenceUnit::parse(&unit_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid recurrence unit `{unit_text}` in chores.interval_unit"
        ))
    })?;

    let recurrence = Recurrence::new(interval, unit).map_err(|err: ValidationError| {
        RepoError::InvalidData(format!("invalid persisted recurrence: {err}"))
    })?;

    Ok(Chore {
        id: parse_uuid(&id_text, "chores.id")?,
        family_id: parse_uuid(&family_text, "chores.family_id")?,
        name: row.get("name")?,
        difficulty,
        recurrence,
        auto_assign: int_to_bool(row.get("auto_assign")?, "chores.auto_assign")?,
        eligible_members: Vec::new(),
        restricted: int_to_bool(
            row.get("eligibility_restricted")?,
            "chores.eligibility_restricted",
        )?,
        remote_id: parse_optional_uuid(row.get("remote_id")?, "chores.remote_id")?,
    })
}

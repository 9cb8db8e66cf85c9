//! Member repository contract and SQLite implementation.
//!
//! # Invariants
//! - `total_points` only changes through `add_member_points` and
//!   `set_member_points`; `update_member` never touches it.

use crate::model::member::{Member, MemberId};
use crate::repo::{parse_optional_uuid, parse_uuid, RepoError, RepoResult, SqliteFamilyRepository};
use rusqlite::{params, OptionalExtension, Row};

const MEMBER_SELECT_SQL: &str = "SELECT
    id,
    family_id,
    name,
    avatar,
    total_points,
    remote_id
FROM members";

pub trait MemberRepository {
    fn create_member(&self, member: &Member) -> RepoResult<MemberId>;
    /// Persists name and avatar changes.
    fn update_member(&self, member: &Member) -> RepoResult<()>;
    fn get_member(&self, id: MemberId) -> RepoResult<Option<Member>>;
    /// Lists members ordered by id ascending.
    fn list_members(&self) -> RepoResult<Vec<Member>>;
    /// Deletes a member; assignments, eligibility links and point history
    /// cascade with it.
    fn delete_member(&self, id: MemberId) -> RepoResult<()>;
    /// Adds a signed delta and returns the new total.
    fn add_member_points(&self, id: MemberId, delta: i64) -> RepoResult<i64>;
    fn set_member_points(&self, id: MemberId, total: i64) -> RepoResult<()>;
}

impl MemberRepository for SqliteFamilyRepository<'_> {
    fn create_member(&self, member: &Member) -> RepoResult<MemberId> {
        let mut normalized = member.clone();
        normalized.normalize()?;

        self.conn.execute(
            "INSERT INTO members (
                id,
                family_id,
                name,
                avatar,
                total_points,
                remote_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                normalized.id.to_string(),
                self.family_key(),
                normalized.name.as_str(),
                normalized.avatar.as_deref(),
                normalized.total_points,
                normalized.remote_id.map(|id| id.to_string()),
            ],
        )?;

        Ok(normalized.id)
    }

    fn update_member(&self, member: &Member) -> RepoResult<()> {
        let mut normalized = member.clone();
        normalized.normalize()?;

        let changed = self.conn.execute(
            "UPDATE members
             SET
                name = ?1,
                avatar = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?3 AND family_id = ?4;",
            params![
                normalized.name.as_str(),
                normalized.avatar.as_deref(),
                normalized.id.to_string(),
                self.family_key(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "member",
                id: member.id,
            });
        }

        Ok(())
    }

    fn get_member(&self, id: MemberId) -> RepoResult<Option<Member>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBER_SELECT_SQL}
             WHERE id = ?1 AND family_id = ?2;"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), self.family_key()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_member_row(row)?));
        }

        Ok(None)
    }

    fn list_members(&self) -> RepoResult<Vec<Member>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBER_SELECT_SQL}
             WHERE family_id = ?1
             ORDER BY id ASC;"
        ))?;

        let mut rows = stmt.query([self.family_key()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_member_row(row)?);
        }

        Ok(members)
    }

    fn delete_member(&self, id: MemberId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM members WHERE id = ?1 AND family_id = ?2;",
            params![id.to_string(), self.family_key()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "member",
                id,
            });
        }

        Ok(())
    }

    fn add_member_points(&self, id: MemberId, delta: i64) -> RepoResult<i64> {
        let total: Option<i64> = self
            .conn
            .query_row(
                "UPDATE members
                 SET
                    total_points = total_points + ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?2 AND family_id = ?3
                 RETURNING total_points;",
                params![delta, id.to_string(), self.family_key()],
                |row| row.get(0),
            )
            .optional()?;

        total.ok_or(RepoError::NotFound {
            entity: "member",
            id,
        })
    }

    fn set_member_points(&self, id: MemberId, total: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE members
             SET
                total_points = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2 AND family_id = ?3;",
            params![total, id.to_string(), self.family_key()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "member",
                id,
            });
        }

        Ok(())
    }
}

fn parse_member_row(row: &Row<'_>) -> RepoResult<Member> {
    let id_text: String = row.get("id")?;
    let family_text: String = row.get("family_id")?;

    Ok(Member {
        id: parse_uuid(&id_text, "members.id")?,
        family_id: parse_uuid(&family_text, "members.family_id")?,
        name: row.get("name")?,
        avatar: row.get("avatar")?,
        total_points: row.get("total_points")?,
        remote_id: parse_optional_uuid(row.get("remote_id")?, "members.remote_id")?,
    })
}

//! Durable sync queue log, dead letters and sync state.
//!
//! # Responsibility
//! - Append pending changes with a strictly increasing sequence number.
//! - Truncate acknowledged prefixes and park permanently rejected entries.
//!
//! # Invariants
//! - `seq` comes from `AUTOINCREMENT` and is never reused, even after
//!   truncation.
//! - Entries are never reordered or rewritten in place.
//! - Prefix truncation and dead-lettering commit as one atomic unit.
//! - An alias is never pruned while a queued payload still mentions its
//!   local id.

use crate::model::now_epoch_ms;
use crate::repo::{parse_uuid, with_savepoint, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

/// Pending change as stored in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedChange {
    pub seq: i64,
    pub change_id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub enqueued_at: i64,
}

/// Queue entry the authoritative store rejected permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub seq: i64,
    pub change_id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub error_code: String,
    pub error_message: String,
    pub failed_at: i64,
}

pub trait SyncQueueRepository {
    /// Appends a change and returns its sequence number.
    fn append(&self, change_id: Uuid, kind: &str, payload: &Value) -> RepoResult<i64>;
    /// Oldest `limit` entries in sequence order.
    fn peek(&self, limit: usize) -> RepoResult<Vec<QueuedChange>>;
    fn len(&self) -> RepoResult<usize>;
    /// Removes every entry with `seq <= through_seq`, moving the listed
    /// `(seq, code, message)` rejections to the dead-letter table first.
    fn truncate_prefix(
        &self,
        through_seq: i64,
        rejected: &[(i64, String, String)],
    ) -> RepoResult<usize>;
    fn dead_letters(&self) -> RepoResult<Vec<DeadLetter>>;
    fn sync_state(&self, key: &str) -> RepoResult<Option<String>>;
    fn set_sync_state(&self, key: &str, value: &str) -> RepoResult<()>;
    /// Remembers the authoritative id a local id was created as, surviving
    /// deletion of the local row.
    fn record_alias(&self, local_id: Uuid, remote_id: Uuid) -> RepoResult<()>;
    fn alias_for(&self, local_id: Uuid) -> RepoResult<Option<Uuid>>;
    /// Drops aliases recorded before `cutoff_ms` that no queued change
    /// references any more.
    fn prune_aliases(&self, cutoff_ms: i64) -> RepoResult<usize>;
}

/// SQLite-backed queue repository over the local cache connection.
pub struct SqliteSyncQueueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSyncQueueRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SyncQueueRepository for SqliteSyncQueueRepository<'_> {
    fn append(&self, change_id: Uuid, kind: &str, payload: &Value) -> RepoResult<i64> {
        let payload_text = serde_json::to_string(payload)
            .map_err(|err| RepoError::InvalidData(format!("unserializable payload: {err}")))?;

        self.conn.execute(
            "INSERT INTO sync_queue (change_id, kind, payload, enqueued_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![change_id.to_string(), kind, payload_text, now_epoch_ms()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn peek(&self, limit: usize) -> RepoResult<Vec<QueuedChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, change_id, kind, payload, enqueued_at
             FROM sync_queue
             ORDER BY seq ASC
             LIMIT ?1;",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt.query([limit])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_queue_row(row)?);
        }

        Ok(entries)
    }

    fn len(&self) -> RepoResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue;", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn truncate_prefix(
        &self,
        through_seq: i64,
        rejected: &[(i64, String, String)],
    ) -> RepoResult<usize> {
        with_savepoint(self.conn, || -> RepoResult<usize> {
            let failed_at = now_epoch_ms();
            for (seq, code, message) in rejected {
                self.conn.execute(
                    "INSERT OR REPLACE INTO sync_dead_letters (
                        seq,
                        change_id,
                        kind,
                        payload,
                        error_code,
                        error_message,
                        failed_at
                    )
                    SELECT seq, change_id, kind, payload, ?2, ?3, ?4
                    FROM sync_queue
                    WHERE seq = ?1 AND seq <= ?5;",
                    params![seq, code, message, failed_at, through_seq],
                )?;
            }

            let removed = self
                .conn
                .execute("DELETE FROM sync_queue WHERE seq <= ?1;", [through_seq])?;
            Ok(removed)
        })
    }

    fn dead_letters(&self) -> RepoResult<Vec<DeadLetter>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, change_id, kind, payload, error_code, error_message, failed_at
             FROM sync_dead_letters
             ORDER BY seq ASC;",
        )?;

        let mut rows = stmt.query([])?;
        let mut letters = Vec::new();
        while let Some(row) = rows.next()? {
            let change_text: String = row.get("change_id")?;
            let payload_text: String = row.get("payload")?;
            letters.push(DeadLetter {
                seq: row.get("seq")?,
                change_id: parse_uuid(&change_text, "sync_dead_letters.change_id")?,
                kind: row.get("kind")?,
                payload: parse_payload(&payload_text, "sync_dead_letters.payload")?,
                error_code: row.get("error_code")?,
                error_message: row.get("error_message")?,
                failed_at: row.get("failed_at")?,
            });
        }

        Ok(letters)
    }

    fn sync_state(&self, key: &str) -> RepoResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM sync_state WHERE key = ?1;", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_sync_state(&self, key: &str, value: &str) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    fn record_alias(&self, local_id: Uuid, remote_id: Uuid) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO sync_aliases (local_id, remote_id, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (local_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                recorded_at = excluded.recorded_at;",
            params![local_id.to_string(), remote_id.to_string(), now_epoch_ms()],
        )?;
        Ok(())
    }

    fn alias_for(&self, local_id: Uuid) -> RepoResult<Option<Uuid>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT remote_id FROM sync_aliases WHERE local_id = ?1;",
                [local_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|text| parse_uuid(&text, "sync_aliases.remote_id"))
            .transpose()
    }

    fn prune_aliases(&self, cutoff_ms: i64) -> RepoResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_aliases
             WHERE recorded_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM sync_queue
                   WHERE instr(sync_queue.payload, sync_aliases.local_id) > 0
               );",
            [cutoff_ms],
        )?;
        Ok(removed)
    }
}

fn parse_queue_row(row: &Row<'_>) -> RepoResult<QueuedChange> {
    let change_text: String = row.get("change_id")?;
    let payload_text: String = row.get("payload")?;

    Ok(QueuedChange {
        seq: row.get("seq")?,
        change_id: parse_uuid(&change_text, "sync_queue.change_id")?,
        kind: row.get("kind")?,
        payload: parse_payload(&payload_text, "sync_queue.payload")?,
        enqueued_at: row.get("enqueued_at")?,
    })
}

fn parse_payload(text: &str, column: &str) -> RepoResult<Value> {
    serde_json::from_str(text)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

//! Device-local cache: family mirror plus the durable sync queue.
//!
//! # Responsibility
//! - Own the cache connection and hand out family-scoped repositories.
//!
//! # Invariants
//! - One connection per cache, serialized by a mutex; callers never hold
//!   repository borrows across calls.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::model::FamilyId;
use crate::repo::{SqliteFamilyRepository, SqliteSyncQueueRepository};
use crate::sync::sync_queue::SyncQueue;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Queue handle over the cache connection.
pub type CacheQueue<'conn> = SyncQueue<SqliteSyncQueueRepository<'conn>>;

pub struct LocalCache {
    conn: Mutex<Connection>,
    family_id: FamilyId,
}

impl LocalCache {
    pub fn open(path: impl AsRef<Path>, family_id: FamilyId) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?, family_id))
    }

    pub fn open_in_memory(family_id: FamilyId) -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?, family_id))
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection, family_id: FamilyId) -> Self {
        Self {
            conn: Mutex::new(conn),
            family_id,
        }
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn with_repo<T>(&self, f: impl FnOnce(&SqliteFamilyRepository<'_>) -> T) -> T {
        self.with_store(|repo, _| f(repo))
    }

    pub fn with_queue<T>(&self, f: impl FnOnce(&CacheQueue<'_>) -> T) -> T {
        self.with_store(|_, queue| f(queue))
    }

    /// Repository and queue over the same connection, for work that touches
    /// both under one lock.
    pub fn with_store<T>(
        &self,
        f: impl FnOnce(&SqliteFamilyRepository<'_>, &CacheQueue<'_>) -> T,
    ) -> T {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let repo = SqliteFamilyRepository::new(&conn, self.family_id);
        let queue = SyncQueue::new(SqliteSyncQueueRepository::new(&conn));
        f(&repo, &queue)
    }
}

//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define family-scoped data access contracts for members, chores,
//!   assignments, point history, correlation ids and the sync queue.
//! - Isolate SQLite query details from scheduling and merge orchestration.
//!
//! # Invariants
//! - Every query issued through [`SqliteFamilyRepository`] filters by its
//!   family scope; rows of other families are invisible (`NotFound`).
//! - Write paths normalize and validate records before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod assignment_repo;
pub mod change_log_repo;
pub mod chore_repo;
pub mod correlation_repo;
pub mod member_repo;
pub mod points_repo;
pub mod queue_repo;

use crate::db::DbError;
use crate::model::validation::ValidationError;
use crate::model::FamilyId;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub use assignment_repo::AssignmentRepository;
pub use change_log_repo::ChangeLogRepository;
pub use chore_repo::ChoreRepository;
pub use correlation_repo::{CorrelatedTable, CorrelationRepository};
pub use member_repo::MemberRepository;
pub use points_repo::PointsRepository;
pub use queue_repo::{DeadLetter, QueuedChange, SqliteSyncQueueRepository, SyncQueueRepository};

/// Storage format of calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const SAVEPOINT_NAME: &str = "homeflow_unit";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound { entity: &'static str, id: Uuid },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Full family-scoped store contract used by the scheduler, assignment
/// service and merge engine.
pub trait FamilyRepository:
    MemberRepository + ChoreRepository + AssignmentRepository + PointsRepository
{
    /// Family scope every query is bound to.
    fn family_id(&self) -> FamilyId;

    /// Runs `f` as one atomic unit: all of its writes commit or none do.
    ///
    /// Units may nest.
    fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>;
}

/// SQLite-backed repository bound to one family scope.
#[derive(Debug, Clone, Copy)]
pub struct SqliteFamilyRepository<'conn> {
    conn: &'conn Connection,
    family_id: FamilyId,
}

impl<'conn> SqliteFamilyRepository<'conn> {
    pub fn new(conn: &'conn Connection, family_id: FamilyId) -> Self {
        Self { conn, family_id }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    fn family_key(&self) -> String {
        self.family_id.to_string()
    }
}

impl FamilyRepository for SqliteFamilyRepository<'_> {
    fn family_id(&self) -> FamilyId {
        self.family_id
    }

    fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<RepoError>,
        F: FnOnce() -> Result<T, E>,
    {
        with_savepoint(self.conn, f)
    }
}

/// Runs `f` inside a SQLite savepoint, rolling back to it when `f` fails.
///
/// Savepoints nest, so this is safe both at top level and inside an outer
/// transaction.
pub fn with_savepoint<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    E: From<RepoError>,
    F: FnOnce() -> Result<T, E>,
{
    conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME};"))
        .map_err(|err| E::from(RepoError::from(err)))?;

    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {SAVEPOINT_NAME};"))
                .map_err(|err| E::from(RepoError::from(err)))?;
            Ok(value)
        }
        Err(err) => {
            // Rollback failure leaves the original error as the meaningful one.
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {SAVEPOINT_NAME}; RELEASE SAVEPOINT {SAVEPOINT_NAME};"
            ));
            Err(err)
        }
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(value: Option<String>, column: &str) -> RepoResult<Option<Uuid>> {
    value.map(|text| parse_uuid(&text, column)).transpose()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str, column: &str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid date value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

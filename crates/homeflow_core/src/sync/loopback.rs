//! In-process authoritative store behind the [`RemoteTransport`] contract.
//!
//! Wraps its own SQLite database and a [`MergeEngine`] so a client can sync
//! without a network. Connectivity and authorization are switchable, which
//! makes it the transport of choice for offline/online flows in tests.

use crate::config::CoreConfig;
use crate::db::{open_db_in_memory, DbResult};
use crate::model::assignment::{Assignment, DateRange};
use crate::model::FamilyId;
use crate::repo::{RepoError, SqliteFamilyRepository};
use crate::service::family_lock::FamilyLocks;
use crate::service::merge_engine::MergeEngine;
use crate::service::scheduler_service::{SchedulerError, SchedulerService};
use crate::service::ServiceError;
use crate::sync::transport::{RemoteTransport, TransportError, TransportResult};
use crate::sync::wire::{
    BatchPushRequest, BatchPushResponse, FailureCode, GenerateScheduleRequest,
    GenerateScheduleResponse, Snapshot, WireChange,
};
use log::info;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct LoopbackTransport {
    conn: Mutex<Connection>,
    family_id: FamilyId,
    locks: Arc<FamilyLocks>,
    config: CoreConfig,
    online: AtomicBool,
    authorized: AtomicBool,
}

impl LoopbackTransport {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection, family_id: FamilyId) -> Self {
        Self {
            conn: Mutex::new(conn),
            family_id,
            locks: Arc::new(FamilyLocks::new()),
            config: CoreConfig::default(),
            online: AtomicBool::new(true),
            authorized: AtomicBool::new(true),
        }
    }

    pub fn open_in_memory(family_id: FamilyId) -> DbResult<Self> {
        Ok(Self::new(open_db_in_memory()?, family_id))
    }

    /// Scheduler settings and change-log retention of the store.
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// When false every request fails as unauthorized, as an expired token
    /// would.
    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    /// Lock registry shared by every writer of the authoritative store.
    pub fn locks(&self) -> Arc<FamilyLocks> {
        Arc::clone(&self.locks)
    }

    /// Runs `f` against the authoritative repository directly.
    pub fn authoritative<T>(&self, f: impl FnOnce(&SqliteFamilyRepository<'_>) -> T) -> T {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let repo = SqliteFamilyRepository::new(&conn, self.family_id);
        f(&repo)
    }

    fn gate(&self) -> TransportResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Transient("store unreachable".to_string()));
        }
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(TransportError::Unauthorized("token rejected".to_string()));
        }
        Ok(())
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&MergeEngine<SqliteFamilyRepository<'_>>) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.gate()?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let engine = MergeEngine::new(
            SqliteFamilyRepository::new(&conn, self.family_id),
            Arc::clone(&self.locks),
        )
        .with_config(&self.config);
        f(&engine)
    }
}

impl RemoteTransport for LoopbackTransport {
    fn probe(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn push_change(&self, change: &WireChange) -> TransportResult<Value> {
        self.with_engine(|engine| engine.apply_single(change).map_err(rejection))
    }

    fn push_batch(&self, request: &BatchPushRequest) -> TransportResult<BatchPushResponse> {
        self.with_engine(|engine| Ok(engine.apply_batch(request)))
    }

    fn pull_snapshot(&self) -> TransportResult<Snapshot> {
        self.with_engine(|engine| engine.snapshot().map_err(store_failure))
    }

    fn fetch_assignments(&self, range: &DateRange) -> TransportResult<Vec<Assignment>> {
        self.with_engine(|engine| engine.assignments_between(range).map_err(store_failure))
    }

    fn generate_schedule(
        &self,
        request: &GenerateScheduleRequest,
    ) -> TransportResult<GenerateScheduleResponse> {
        self.gate()?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let scheduler = SchedulerService::new(
            SqliteFamilyRepository::new(&conn, self.family_id),
            self.config.scheduler,
            Arc::clone(&self.locks),
        );
        let assignments = scheduler
            .generate_assignments_today(request.days)
            .map_err(schedule_failure)?;
        info!(
            "event=schedule_generate module=loopback status=ok family_id={} created={}",
            self.family_id,
            assignments.len()
        );
        Ok(GenerateScheduleResponse {
            message: format!("generated {} assignments", assignments.len()),
            count: assignments.len(),
            assignments,
        })
    }
}

fn rejection(err: ServiceError) -> TransportError {
    match err.failure_code() {
        FailureCode::Internal => TransportError::Transient(err.to_string()),
        code => TransportError::Rejected {
            code,
            message: err.to_string(),
        },
    }
}

fn store_failure(err: RepoError) -> TransportError {
    TransportError::Transient(err.to_string())
}

fn schedule_failure(err: SchedulerError) -> TransportError {
    match err {
        SchedulerError::InvalidHorizon { .. } => TransportError::Rejected {
            code: FailureCode::Validation,
            message: err.to_string(),
        },
        SchedulerError::Repo(err) => store_failure(err),
    }
}

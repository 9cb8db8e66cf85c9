//! Core domain logic for HomeFlow: chore rotation scheduling and
//! offline-first family sync.
//! This crate is the single source of truth for business invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, CoreConfig, SchedulerConfig, DEFAULT_CHANGE_LOG_RETENTION_DAYS};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_with_config, logging_status};
pub use model::assignment::{Assignment, AssignmentId, AssignmentStatus, DateRange};
pub use model::chore::{Chore, ChoreId, Recurrence, RecurrenceUnit};
pub use model::member::{Member, MemberId};
pub use model::points::{PointEntry, PointSource};
pub use model::validation::ValidationError;
pub use model::FamilyId;
pub use repo::{FamilyRepository, RepoError, RepoResult, SqliteFamilyRepository};
pub use service::assignment_service::AssignmentService;
pub use service::family_lock::FamilyLocks;
pub use service::merge_engine::MergeEngine;
pub use service::scheduler_service::{GenerateRequest, SchedulerError, SchedulerService};
pub use service::{ServiceError, ServiceResult};
pub use sync::change::{Change, ChangeKind};
pub use sync::client::{FamilyClient, Mutation, Regeneration, ScheduleSource};
pub use sync::engine::{
    spawn_probe_loop, ProbeLoopHandle, QueueOutcome, SyncEngine, SyncError, SyncFailure,
    SyncReport,
};
pub use sync::http_transport::HttpTransport;
pub use sync::local_cache::LocalCache;
pub use sync::loopback::LoopbackTransport;
pub use sync::reconciler::{ReconcileSummary, Reconciler};
pub use sync::transport::{CredentialStore, MemoryCredentialStore, RemoteTransport};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

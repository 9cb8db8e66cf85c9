//! Push, replay and pull orchestration for one local cache.
//!
//! # Responsibility
//! - Push a change immediately when possible, queue it otherwise.
//! - Drain the queue in order, truncating the acknowledged prefix.
//! - Pull the authoritative snapshot and reconcile it locally.
//! - Drive the optional background connectivity probe.
//!
//! # Invariants
//! - A new change never overtakes a queued one: while the queue is non-empty
//!   every change is appended.
//! - Queued changes carry local ids; translation to authoritative ids happens
//!   at push time.
//! - `sync_now` is the single serialized drain path; a concurrent call
//!   reports `InProgress` without touching the queue.
//! - Network failures degrade to queuing or a failed report; they never
//!   panic the caller.

use crate::config::CoreConfig;
use crate::model::now_epoch_ms;
use crate::model::validation::ValidationError;
use crate::repo::{
    CorrelatedTable, CorrelationRepository, DeadLetter, FamilyRepository, RepoError, RepoResult,
    SyncQueueRepository,
};
use crate::service::ServiceError;
use crate::sync::change::{Change, ChorePatch, MemberPatch};
use crate::sync::local_cache::LocalCache;
use crate::sync::reconciler::{ReconcileSummary, Reconciler};
use crate::sync::sync_queue::AckSummary;
use crate::sync::transport::{CredentialStore, RemoteTransport, TransportError};
use crate::sync::wire::{AppliedRecord, BatchPushRequest, FailureCode, WireChange};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Sync-state key holding the epoch ms of the last completed pull.
pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";

const PROBE_THREAD_NAME: &str = "homeflow-sync-probe";

/// How long an id alias outlives the drain that stopped needing it.
pub const ALIAS_GRACE_MS: i64 = 60_000;

/// What happened to a change handed to [`SyncEngine::queue_change`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    /// Applied by the authoritative store right away.
    Immediate { record: AppliedRecord },
    /// Appended to the durable queue under this sequence number.
    Queued { seq: i64 },
    /// Refused permanently; nothing was queued.
    Rejected { code: FailureCode, message: String },
}

#[derive(Debug)]
pub enum SyncError {
    Validation(ValidationError),
    NotFound { entity: &'static str, id: Uuid },
    Storage(RepoError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Storage(err) => write!(f, "local storage failure: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Storage(other),
        }
    }
}

impl From<ServiceError> for SyncError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Validation(err) => Self::Validation(err),
            ServiceError::NotFound { entity, id } => Self::NotFound { entity, id },
            ServiceError::Repo(err) => Self::from(err),
            ServiceError::InconsistentState(message) => {
                Self::Storage(RepoError::InvalidData(message.to_string()))
            }
        }
    }
}

/// Why a sync run stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    NotAuthenticated,
    Offline,
    /// The store rejected the credential; it has been purged.
    Unauthorized,
    InProgress,
    Transient(String),
    Protocol(String),
    Storage(String),
}

impl SyncFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
            Self::InProgress => "in_progress",
            Self::Transient(_) => "transient",
            Self::Protocol(_) => "protocol",
            Self::Storage(_) => "storage",
        }
    }
}

/// Outcome of one [`SyncEngine::sync_now`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    /// Queue entries acknowledged, dead letters included.
    pub pushed: usize,
    pub dead_lettered: usize,
    /// Queue entries still waiting after the run.
    pub remaining: usize,
    pub reconciled: Option<ReconcileSummary>,
    pub last_sync_at: Option<i64>,
    pub failure: Option<SyncFailure>,
}

pub struct SyncEngine {
    cache: Arc<LocalCache>,
    transport: Arc<dyn RemoteTransport>,
    credentials: Arc<dyn CredentialStore>,
    config: CoreConfig,
    drain_lock: Mutex<()>,
    online: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        cache: Arc<LocalCache>,
        transport: Arc<dyn RemoteTransport>,
        credentials: Arc<dyn CredentialStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            cache,
            transport,
            credentials,
            config,
            drain_lock: Mutex::new(()),
            online: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn transport(&self) -> &dyn RemoteTransport {
        self.transport.as_ref()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Result of the most recent probe.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.bearer_token().is_some()
    }

    /// Probes the store and records the result.
    pub fn probe_now(&self) -> bool {
        let reachable = self.transport.probe();
        let was_online = self.online.swap(reachable, Ordering::SeqCst);
        if was_online != reachable {
            info!("event=sync_connectivity module=sync status=ok online={reachable}");
        }
        reachable
    }

    /// Pushes a locally applied change right away, or queues it.
    pub fn queue_change(&self, change: Change) -> Result<QueueOutcome, SyncError> {
        change.validate()?;
        let change_id = Uuid::new_v4();

        if !self.cache.with_queue(|queue| queue.is_empty())? {
            return self.enqueue(change_id, &change, "queue_not_empty");
        }
        if !self.has_credentials() {
            return self.enqueue(change_id, &change, "no_credentials");
        }
        if !self.probe_now() {
            return self.enqueue(change_id, &change, "offline");
        }

        let wire = self.cache.with_store(|repo, queue| {
            translate(repo, queue.repository(), change.clone(), change_id)
        })?;

        match self.transport.push_change(&wire) {
            Ok(data) => match serde_json::from_value::<AppliedRecord>(data) {
                Ok(record) => {
                    self.cache
                        .with_store(|repo, queue| adopt(repo, queue.repository(), &record))?;
                    info!(
                        "event=sync_push module=sync status=ok kind={} change_id={}",
                        wire.kind, change_id
                    );
                    Ok(QueueOutcome::Immediate { record })
                }
                Err(err) => {
                    warn!(
                        "event=sync_push module=sync status=error kind={} change_id={} error_code=bad_apply_result error={}",
                        wire.kind, change_id, err
                    );
                    self.enqueue(change_id, &change, "bad_apply_result")
                }
            },
            Err(TransportError::Unauthorized(message)) => {
                self.credentials.purge();
                warn!(
                    "event=sync_push module=sync status=error kind={} error_code=unauthorized error={} credential=purged",
                    wire.kind, message
                );
                self.enqueue(change_id, &change, "unauthorized")
            }
            Err(TransportError::Rejected { code, message }) => {
                warn!(
                    "event=sync_push module=sync status=error kind={} error_code={} error={}",
                    wire.kind,
                    code.as_str(),
                    message
                );
                Ok(QueueOutcome::Rejected { code, message })
            }
            Err(err) => {
                warn!(
                    "event=sync_push module=sync status=error kind={} error_code=transient error={}",
                    wire.kind, err
                );
                self.enqueue(change_id, &change, "transient")
            }
        }
    }

    /// Drains the queue, then pulls and reconciles the snapshot.
    pub fn sync_now(&self) -> SyncReport {
        let _guard = match self.drain_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                info!("event=sync_run module=sync status=skip reason=in_progress");
                return self.finish(SyncReport::default(), Some(SyncFailure::InProgress));
            }
        };

        let started_at = Instant::now();
        info!("event=sync_run module=sync status=start");
        let mut report = SyncReport::default();
        let failure = self.run(&mut report).err();
        let report = self.finish(report, failure);

        match &report.failure {
            None => info!(
                "event=sync_run module=sync status=ok pushed={} dead_lettered={} remaining={} duration_ms={}",
                report.pushed,
                report.dead_lettered,
                report.remaining,
                started_at.elapsed().as_millis()
            ),
            Some(failure) => warn!(
                "event=sync_run module=sync status=error error_code={} pushed={} remaining={} duration_ms={}",
                failure.as_str(),
                report.pushed,
                report.remaining,
                started_at.elapsed().as_millis()
            ),
        }
        report
    }

    /// One probe-loop step: syncs when connectivity came back or changes are
    /// waiting.
    pub fn probe_tick(&self) -> Option<SyncReport> {
        let was_online = self.is_online();
        if !self.probe_now() || !self.has_credentials() {
            return None;
        }

        let pending = match self.cache.with_queue(|queue| queue.len()) {
            Ok(pending) => pending,
            Err(err) => {
                warn!("event=sync_probe module=sync status=error error={err}");
                return None;
            }
        };
        if was_online && pending == 0 {
            debug!("event=sync_probe module=sync status=skip reason=nothing_pending");
            return None;
        }

        Some(self.sync_now())
    }

    /// Epoch ms of the last successful pull.
    pub fn last_sync_at(&self) -> Result<Option<i64>, SyncError> {
        let stored = self
            .cache
            .with_queue(|queue| queue.repository().sync_state(LAST_SYNC_AT_KEY))?;
        stored
            .map(|value| {
                value.parse::<i64>().map_err(|_| {
                    SyncError::Storage(RepoError::InvalidData(format!(
                        "invalid {LAST_SYNC_AT_KEY} value `{value}`"
                    )))
                })
            })
            .transpose()
    }

    pub fn pending_changes(&self) -> Result<usize, SyncError> {
        Ok(self.cache.with_queue(|queue| queue.len())?)
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, SyncError> {
        Ok(self.cache.with_queue(|queue| queue.dead_letters())?)
    }

    fn enqueue(
        &self,
        change_id: Uuid,
        change: &Change,
        reason: &str,
    ) -> Result<QueueOutcome, SyncError> {
        let seq = self
            .cache
            .with_queue(|queue| queue.enqueue(change_id, change))?;
        debug!("event=sync_defer module=sync status=ok seq={seq} reason={reason}");
        Ok(QueueOutcome::Queued { seq })
    }

    fn run(&self, report: &mut SyncReport) -> Result<(), SyncFailure> {
        if !self.has_credentials() {
            return Err(SyncFailure::NotAuthenticated);
        }
        if !self.probe_now() {
            return Err(SyncFailure::Offline);
        }

        self.drain(report)?;

        let snapshot = self
            .transport
            .pull_snapshot()
            .map_err(|err| self.transport_failure(err))?;
        let summary = self
            .cache
            .with_store(|repo, queue| -> RepoResult<ReconcileSummary> {
                let summary = Reconciler::new(repo).upsert_snapshot(&snapshot)?;
                let now = now_epoch_ms();
                let queue = queue.repository();
                queue.set_sync_state(LAST_SYNC_AT_KEY, &now.to_string())?;
                let pruned = queue.prune_aliases(now - ALIAS_GRACE_MS)?;
                if pruned > 0 {
                    debug!("event=alias_prune module=sync status=ok removed={pruned}");
                }
                Ok(summary)
            })
            .map_err(storage_failure)?;
        report.reconciled = Some(summary);
        Ok(())
    }

    /// Pushes queued batches until the queue is empty or a batch is only
    /// partly acknowledged.
    fn drain(&self, report: &mut SyncReport) -> Result<(), SyncFailure> {
        loop {
            let batch = self
                .cache
                .with_queue(|queue| queue.peek(self.config.push_batch_size))
                .map_err(storage_failure)?;
            if batch.is_empty() {
                return Ok(());
            }

            let request = self
                .cache
                .with_store(|repo, queue| -> RepoResult<BatchPushRequest> {
                    let changes = batch
                        .iter()
                        .map(|entry| {
                            let change = Change::from_wire(&entry.kind, entry.payload.clone())?;
                            translate(repo, queue.repository(), change, entry.change_id)
                        })
                        .collect::<RepoResult<Vec<WireChange>>>()?;
                    Ok(BatchPushRequest { changes })
                })
                .map_err(storage_failure)?;

            let response = self
                .transport
                .push_batch(&request)
                .map_err(|err| self.transport_failure(err))?;

            let ack = self
                .cache
                .with_store(|repo, queue| {
                    repo.atomically(|| -> RepoResult<AckSummary> {
                        for item in &response.applied {
                            match serde_json::from_value::<AppliedRecord>(item.data.clone()) {
                                Ok(record) => adopt(repo, queue.repository(), &record)?,
                                Err(err) => warn!(
                                    "event=sync_drain module=sync status=error index={} error_code=bad_apply_result error={}",
                                    item.index, err
                                ),
                            }
                        }
                        queue.acknowledge(&batch, &response)
                    })
                })
                .map_err(storage_failure)?;

            report.pushed += ack.acknowledged;
            report.dead_lettered += ack.dead_lettered;
            if ack.acknowledged < batch.len() {
                info!(
                    "event=sync_drain module=sync status=partial batch={} acknowledged={}",
                    batch.len(),
                    ack.acknowledged
                );
                return Ok(());
            }
        }
    }

    fn finish(&self, mut report: SyncReport, failure: Option<SyncFailure>) -> SyncReport {
        report.success = failure.is_none();
        report.failure = failure;
        report.remaining = self.pending_changes().unwrap_or_else(|err| {
            warn!("event=sync_run module=sync status=error error_code=queue_unreadable error={err}");
            0
        });
        report.last_sync_at = self.last_sync_at().unwrap_or_else(|err| {
            warn!("event=sync_run module=sync status=error error_code=state_unreadable error={err}");
            None
        });
        report
    }

    pub(crate) fn transport_failure(&self, err: TransportError) -> SyncFailure {
        match err {
            TransportError::Unauthorized(_) => {
                self.credentials.purge();
                warn!("event=sync_auth module=sync status=error credential=purged");
                SyncFailure::Unauthorized
            }
            TransportError::Transient(message) => SyncFailure::Transient(message),
            TransportError::Rejected { message, .. } | TransportError::Protocol(message) => {
                SyncFailure::Protocol(message)
            }
        }
    }
}

fn storage_failure(err: RepoError) -> SyncFailure {
    SyncFailure::Storage(err.to_string())
}

/// Authoritative id a local id is known under, or the id itself.
fn remote_id_of<R, Q>(repo: &R, queue: &Q, local_id: Uuid) -> RepoResult<Uuid>
where
    R: CorrelationRepository,
    Q: SyncQueueRepository,
{
    for table in CorrelatedTable::ALL {
        if let Some(remote_id) = repo.remote_id_for(table, local_id)? {
            return Ok(remote_id);
        }
    }
    Ok(queue.alias_for(local_id)?.unwrap_or(local_id))
}

/// Rewrites a queued change into authoritative id space.
///
/// A create whose local row got linked meanwhile becomes an update of the
/// linked record, so replay cannot duplicate it.
fn translate<R, Q>(repo: &R, queue: &Q, change: Change, change_id: Uuid) -> RepoResult<WireChange>
where
    R: CorrelationRepository,
    Q: SyncQueueRepository,
{
    let change = match change {
        Change::CreateMember(payload) => match payload.local_id {
            Some(local_id) if remote_id_of(repo, queue, local_id)? != local_id => {
                Change::UpdateMember(MemberPatch {
                    id: local_id,
                    name: Some(payload.name),
                    avatar: payload.avatar,
                })
            }
            _ => Change::CreateMember(payload),
        },
        Change::CreateChore(payload) => match payload.local_id {
            Some(local_id) if remote_id_of(repo, queue, local_id)? != local_id => {
                Change::UpdateChore(ChorePatch {
                    id: local_id,
                    name: Some(payload.name),
                    difficulty: Some(payload.difficulty),
                    recurrence: Some(payload.recurrence),
                    auto_assign: Some(payload.auto_assign),
                    eligible_members: Some(payload.eligible_members),
                })
            }
            _ => Change::CreateChore(payload),
        },
        other => other,
    };

    let failure: RefCell<Option<RepoError>> = RefCell::new(None);
    let change = change.remap_ids(|id| {
        remote_id_of(repo, queue, id).unwrap_or_else(|err| {
            let mut slot = failure.borrow_mut();
            if slot.is_none() {
                *slot = Some(err);
            }
            id
        })
    });
    if let Some(err) = failure.into_inner() {
        return Err(err);
    }

    Ok(WireChange::from_change(&change, Some(change_id))?)
}

/// Links the local row a create came from to its authoritative id.
fn adopt<R, Q>(repo: &R, queue: &Q, record: &AppliedRecord) -> RepoResult<()>
where
    R: FamilyRepository + CorrelationRepository,
    Q: SyncQueueRepository,
{
    let table = match record {
        AppliedRecord::Member { .. } => CorrelatedTable::Members,
        AppliedRecord::Chore { .. } => CorrelatedTable::Chores,
        AppliedRecord::Assignment { .. } | AppliedRecord::Deleted { .. } => return Ok(()),
    };
    let Some(local_id) = record.local_id() else {
        return Ok(());
    };
    let remote_id = record.authoritative_id();

    queue.record_alias(local_id, remote_id)?;
    if repo.local_id_for(table, remote_id)?.is_some() {
        return Ok(());
    }

    match repo.link(table, local_id, remote_id) {
        Ok(()) => {
            debug!(
                "event=sync_adopt module=sync status=ok local_id={} remote_id={}",
                local_id, remote_id
            );
            Ok(())
        }
        // Deleted locally before the create was acknowledged.
        Err(RepoError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Handle of the background probe thread; stops it on drop.
pub struct ProbeLoopHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ProbeLoopHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("event=sync_probe_loop module=sync status=error error_code=thread_panicked");
            }
        }
    }
}

impl Drop for ProbeLoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs [`SyncEngine::probe_tick`] every `interval` on a named thread.
pub fn spawn_probe_loop(
    engine: Arc<SyncEngine>,
    interval: Duration,
) -> std::io::Result<ProbeLoopHandle> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let join = thread::Builder::new()
        .name(PROBE_THREAD_NAME.to_owned())
        .spawn(move || {
            info!(
                "event=sync_probe_loop module=sync status=start interval_ms={}",
                interval.as_millis()
            );
            loop {
                if let Some(report) = engine.probe_tick() {
                    debug!(
                        "event=sync_probe_loop module=sync status=ok success={} remaining={}",
                        report.success, report.remaining
                    );
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("event=sync_probe_loop module=sync status=ok reason=stopped");
        })?;

    Ok(ProbeLoopHandle {
        stop_tx: Some(stop_tx),
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::{SyncError, SyncFailure};
    use crate::repo::RepoError;
    use crate::service::ServiceError;
    use uuid::Uuid;

    #[test]
    fn not_found_survives_error_conversion() {
        let id = Uuid::new_v4();
        let err = SyncError::from(ServiceError::Repo(RepoError::NotFound {
            entity: "chore",
            id,
        }));
        assert!(matches!(err, SyncError::NotFound { entity: "chore", id: found } if found == id));
    }

    #[test]
    fn failure_codes_are_stable() {
        assert_eq!(SyncFailure::InProgress.as_str(), "in_progress");
        assert_eq!(SyncFailure::Transient("x".to_string()).as_str(), "transient");
    }
}

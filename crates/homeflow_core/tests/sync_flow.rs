use chrono::{Local, NaiveDate};
use homeflow_core::repo::{AssignmentRepository, MemberRepository};
use homeflow_core::sync::change::{ChorePatch, MemberPatch, NewChore, NewMember};
use homeflow_core::sync::transport::{TransportError, TransportResult};
use homeflow_core::sync::wire::{
    AppliedItem, BatchPushRequest, BatchPushResponse, FailedItem, FailureCode,
    GenerateScheduleRequest, GenerateScheduleResponse, Snapshot, WireChange,
};
use homeflow_core::{
    spawn_probe_loop, Assignment, AssignmentStatus, CoreConfig, CredentialStore, DateRange,
    FamilyClient, GenerateRequest, LocalCache, LoopbackTransport, Member, MemoryCredentialStore,
    QueueOutcome, Recurrence, Reconciler, RemoteTransport, ScheduleSource, SchedulerConfig,
    SchedulerService, SyncEngine, SyncFailure,
};
use serde_json::{json, Value};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Harness {
    remote: Arc<LoopbackTransport>,
    credentials: Arc<MemoryCredentialStore>,
    engine: Arc<SyncEngine>,
    client: FamilyClient,
}

fn harness() -> Harness {
    let family = Uuid::new_v4();
    let remote = Arc::new(LoopbackTransport::open_in_memory(family).unwrap());
    let credentials = Arc::new(MemoryCredentialStore::with_token("token"));
    let engine = Arc::new(SyncEngine::new(
        Arc::new(LocalCache::open_in_memory(family).unwrap()),
        remote.clone(),
        credentials.clone(),
        CoreConfig::default(),
    ));
    Harness {
        remote,
        credentials,
        client: FamilyClient::new(Arc::clone(&engine)).with_scheduler_seed(3),
        engine,
    }
}

fn new_member(name: &str) -> NewMember {
    NewMember {
        local_id: None,
        name: name.to_string(),
        avatar: None,
    }
}

fn new_chore(name: &str, interval: u32) -> NewChore {
    NewChore {
        local_id: None,
        name: name.to_string(),
        difficulty: 1,
        recurrence: Recurrence::days(interval).unwrap(),
        auto_assign: true,
        eligible_members: Vec::new(),
    }
}

fn server_members(remote: &LoopbackTransport) -> Vec<Member> {
    remote.authoritative(|repo| repo.list_members().unwrap())
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
}

#[test]
fn online_create_is_pushed_immediately_and_linked() {
    let h = harness();

    let created = h.client.create_member(new_member("Alex")).unwrap();

    let QueueOutcome::Immediate { record } = &created.outcome else {
        panic!("expected immediate push, got {:?}", created.outcome);
    };
    assert_eq!(created.record.remote_id, Some(record.authoritative_id()));
    assert_ne!(created.record.id, record.authoritative_id());
    assert_eq!(server_members(&h.remote).len(), 1);
    assert_eq!(h.engine.pending_changes().unwrap(), 0);
}

#[test]
fn offline_changes_replay_in_order_once_back_online() {
    let h = harness();
    h.remote.set_online(false);

    let sam = h.client.create_member(new_member("Sam")).unwrap();
    assert!(matches!(sam.outcome, QueueOutcome::Queued { .. }));
    let adjusted = h.client.adjust_points(sam.record.id, 5, Some("chores")).unwrap();
    assert!(matches!(adjusted.outcome, QueueOutcome::Queued { .. }));
    assert_eq!(adjusted.record.total_points, 5);

    h.remote.set_online(true);
    let renamed = h
        .client
        .update_member(MemberPatch {
            id: sam.record.id,
            name: Some("Samuel".to_string()),
            avatar: None,
        })
        .unwrap();
    assert!(
        matches!(renamed.outcome, QueueOutcome::Queued { .. }),
        "a new change must not overtake queued ones"
    );

    let report = h.engine.sync_now();

    assert!(report.success, "sync failed: {:?}", report.failure);
    assert_eq!(report.pushed, 3);
    assert_eq!(report.remaining, 0);
    assert!(report.last_sync_at.is_some());

    let remote_members = server_members(&h.remote);
    assert_eq!(remote_members.len(), 1);
    assert_eq!(remote_members[0].name, "Samuel");
    assert_eq!(remote_members[0].total_points, 5);

    let local = h.client.list_members().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, sam.record.id);
    assert_eq!(local[0].remote_id, Some(remote_members[0].id));
    assert_eq!(local[0].total_points, 5);
}

#[test]
fn snapshot_member_with_same_name_links_the_local_row() {
    let family = Uuid::new_v4();
    let cache = LocalCache::open_in_memory(family).unwrap();
    let local_id = cache
        .with_repo(|repo| repo.create_member(&Member::new(family, "Sam")))
        .unwrap();
    let authoritative = Member::new(family, "Sam");

    let summary = cache
        .with_repo(|repo| {
            Reconciler::new(repo).upsert_snapshot(&Snapshot {
                members: vec![authoritative.clone()],
                ..Snapshot::default()
            })
        })
        .unwrap();

    assert_eq!(summary.members.linked, 1);
    assert_eq!(summary.members.inserted, 0);
    let members = cache.with_repo(|repo| repo.list_members()).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, local_id);
    assert_eq!(members[0].remote_id, Some(authoritative.id));
}

#[test]
fn repeated_sync_reconciles_without_duplicates() {
    let h = harness();
    h.client.create_member(new_member("Alex")).unwrap();
    h.client.create_chore(new_chore("Dishes", 1)).unwrap();

    let first = h.engine.sync_now();
    let second = h.engine.sync_now();

    assert!(first.success && second.success);
    let summary = second.reconciled.unwrap();
    assert_eq!(summary.members.updated, 1);
    assert_eq!(summary.members.inserted + summary.members.linked, 0);
    assert_eq!(summary.chores.updated, 1);
    assert_eq!(summary.chores.inserted + summary.chores.linked, 0);
    assert_eq!(h.client.list_members().unwrap().len(), 1);
    assert_eq!(h.client.list_chores().unwrap().len(), 1);
}

#[test]
fn records_created_elsewhere_arrive_with_the_next_pull() {
    let h = harness();
    let family = h.client.family_id();
    let remote_id = h
        .remote
        .authoritative(|repo| repo.create_member(&Member::new(family, "Jordan")))
        .unwrap();

    assert!(h.engine.sync_now().success);

    let local = h.client.list_members().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].name, "Jordan");
    assert_eq!(local[0].remote_id, Some(remote_id));

    h.remote
        .authoritative(|repo| repo.delete_member(remote_id))
        .unwrap();
    let report = h.engine.sync_now();
    assert_eq!(report.reconciled.unwrap().members.pruned, 1);
    assert!(h.client.list_members().unwrap().is_empty());
}

#[test]
fn deleting_a_linked_member_offline_deletes_it_remotely() {
    let h = harness();
    let alex = h.client.create_member(new_member("Alex")).unwrap();
    assert!(matches!(alex.outcome, QueueOutcome::Immediate { .. }));

    h.remote.set_online(false);
    let outcome = h.client.delete_member(alex.record.id).unwrap();
    assert!(matches!(outcome, QueueOutcome::Queued { .. }));
    assert!(h.client.list_members().unwrap().is_empty());

    h.remote.set_online(true);
    let report = h.engine.sync_now();

    assert!(report.success);
    assert_eq!(report.dead_lettered, 0);
    assert!(server_members(&h.remote).is_empty());
}

#[test]
fn create_then_delete_while_offline_leaves_nothing_behind() {
    let h = harness();
    h.remote.set_online(false);
    let temp = h.client.create_member(new_member("Temp")).unwrap();
    h.client.delete_member(temp.record.id).unwrap();

    h.remote.set_online(true);
    let report = h.engine.sync_now();

    assert!(report.success);
    assert_eq!(report.pushed, 2);
    assert_eq!(report.dead_lettered, 0);
    assert!(server_members(&h.remote).is_empty());
    assert!(h.client.list_members().unwrap().is_empty());
}

#[test]
fn unauthorized_push_purges_the_credential_and_queues() {
    let h = harness();
    h.remote.set_authorized(false);

    let created = h.client.create_member(new_member("Alex")).unwrap();

    assert!(matches!(created.outcome, QueueOutcome::Queued { .. }));
    assert!(!h.engine.has_credentials());
    let report = h.engine.sync_now();
    assert_eq!(report.failure, Some(SyncFailure::NotAuthenticated));
    assert_eq!(report.remaining, 1);

    h.remote.set_authorized(true);
    h.credentials.store("fresh".to_string());
    let report = h.engine.sync_now();
    assert!(report.success);
    assert_eq!(report.remaining, 0);
    assert_eq!(server_members(&h.remote).len(), 1);
}

#[test]
fn unauthorized_pull_reports_and_purges() {
    let h = harness();
    h.remote.set_authorized(false);

    let report = h.engine.sync_now();

    assert_eq!(report.failure, Some(SyncFailure::Unauthorized));
    assert!(!report.success);
    assert!(!h.engine.has_credentials());
}

#[test]
fn rejected_immediate_push_is_not_queued() {
    let h = harness();
    let alex = h.client.create_member(new_member("Alex")).unwrap();
    let remote_id = alex.record.remote_id.unwrap();
    h.remote
        .authoritative(|repo| repo.delete_member(remote_id))
        .unwrap();

    let renamed = h
        .client
        .update_member(MemberPatch {
            id: alex.record.id,
            name: Some("Alexis".to_string()),
            avatar: None,
        })
        .unwrap();

    assert!(matches!(
        renamed.outcome,
        QueueOutcome::Rejected {
            code: FailureCode::NotFound,
            ..
        }
    ));
    assert_eq!(h.engine.pending_changes().unwrap(), 0);
}

#[test]
fn schedule_reads_refresh_from_the_store_and_fall_back_to_the_cache() {
    let h = harness();
    let member = h.client.create_member(new_member("Alex")).unwrap().record;
    let chore = h.client.create_chore(new_chore("Dishes", 1)).unwrap().record;
    h.remote.authoritative(|repo| {
        SchedulerService::with_seed(*repo, SchedulerConfig::default(), h.remote.locks(), 1)
            .generate_assignments(&GenerateRequest {
                today: date(1),
                horizon_days: Some(3),
            })
            .unwrap()
    });
    let range = DateRange::new(date(1), date(7)).unwrap();

    let fetched = h.client.get_assignments(&range).unwrap();

    assert_eq!(fetched.len(), 3);
    assert!(fetched
        .iter()
        .all(|assignment| assignment.member_id == member.id && assignment.chore_id == chore.id));
    assert!(fetched.iter().all(|assignment| assignment.remote_id.is_some()));

    h.remote.set_online(false);
    let cached = h.client.get_assignments(&range).unwrap();
    assert_eq!(cached, fetched);
}

#[test]
fn offline_schedule_links_to_authoritative_slots_on_pull() {
    let h = harness();
    let member = h.client.create_member(new_member("Alex")).unwrap().record;
    h.client.create_chore(new_chore("Dishes", 1)).unwrap();

    h.remote.set_online(false);
    let offline: Vec<Assignment> = h
        .client
        .regenerate_offline_at(&GenerateRequest {
            today: date(1),
            horizon_days: Some(2),
        })
        .unwrap();
    assert_eq!(offline.len(), 2);
    assert!(offline.iter().all(|assignment| assignment.member_id == member.id));

    h.remote.set_online(true);
    h.remote.authoritative(|repo| {
        SchedulerService::with_seed(*repo, SchedulerConfig::default(), h.remote.locks(), 1)
            .generate_assignments(&GenerateRequest {
                today: date(1),
                horizon_days: Some(2),
            })
            .unwrap()
    });
    let report = h.engine.sync_now();

    assert_eq!(report.reconciled.unwrap().assignments.linked, 2);
    let local = h
        .client
        .get_assignments(&DateRange::new(date(1), date(2)).unwrap())
        .unwrap();
    let local_ids: Vec<Uuid> = local.iter().map(|assignment| assignment.id).collect();
    let offline_ids: Vec<Uuid> = offline.iter().map(|assignment| assignment.id).collect();
    assert_eq!(local_ids, offline_ids);
}

#[test]
fn regenerate_runs_on_the_store_and_links_its_rows() {
    let h = harness();
    let member = h.client.create_member(new_member("Alex")).unwrap().record;
    h.client.create_chore(new_chore("Dishes", 1)).unwrap();

    let regeneration = h.client.regenerate(Some(3)).unwrap();

    assert_eq!(regeneration.source, ScheduleSource::Authoritative);
    assert_eq!(regeneration.created.len(), 3);
    assert!(regeneration
        .created
        .iter()
        .all(|assignment| assignment.member_id == member.id && assignment.remote_id.is_some()));

    let first = &regeneration.created[0];
    let toggled = h.client.toggle_assignment(first.id, None).unwrap();
    assert!(matches!(toggled.outcome, QueueOutcome::Immediate { .. }));
    let remote_id = first.remote_id.unwrap();
    let remote = h
        .remote
        .authoritative(|repo| repo.get_assignment(remote_id).unwrap().unwrap());
    assert_eq!(remote.status, AssignmentStatus::Completed);
}

#[test]
fn regenerate_falls_back_to_the_cache_while_offline() {
    let h = harness();
    h.client.create_member(new_member("Alex")).unwrap();
    h.client.create_chore(new_chore("Dishes", 2)).unwrap();
    h.remote.set_online(false);

    let regeneration = h.client.regenerate(Some(4)).unwrap();

    assert_eq!(regeneration.source, ScheduleSource::Offline);
    assert_eq!(regeneration.created.len(), 2);
    assert!(regeneration
        .created
        .iter()
        .all(|assignment| assignment.remote_id.is_none()));
}

#[test]
fn narrowing_eligibility_reschedules_cache_and_store() {
    let h = harness();
    let alex = h.client.create_member(new_member("Alex")).unwrap().record;
    let bea = h.client.create_member(new_member("Bea")).unwrap().record;
    let chore = h.client.create_chore(new_chore("Dishes", 1)).unwrap().record;
    let today = Local::now().date_naive();

    h.client
        .update_chore(ChorePatch {
            id: chore.id,
            name: None,
            difficulty: None,
            recurrence: None,
            auto_assign: None,
            eligible_members: Some(vec![alex.id]),
        })
        .unwrap();

    let local = h
        .engine
        .cache()
        .with_repo(|repo| repo.list_assignments().unwrap());
    assert!(!local.is_empty());
    assert!(local
        .iter()
        .filter(|assignment| assignment.due_date >= today)
        .all(|assignment| assignment.member_id == alex.id));

    let bea_remote = bea.remote_id.unwrap();
    let remote = h.remote.authoritative(|repo| repo.list_assignments().unwrap());
    assert!(!remote.is_empty());
    assert!(remote
        .iter()
        .filter(|assignment| assignment.due_date >= today)
        .all(|assignment| assignment.member_id != bea_remote));
}

#[test]
fn probe_tick_syncs_when_connectivity_returns() {
    let h = harness();
    h.remote.set_online(false);
    h.client.create_member(new_member("Alex")).unwrap();
    assert!(h.engine.probe_tick().is_none());

    h.remote.set_online(true);
    let report = h.engine.probe_tick().unwrap();
    assert!(report.success);
    assert_eq!(report.remaining, 0);

    assert!(h.engine.probe_tick().is_none());
    assert!(h.engine.last_sync_at().unwrap().is_some());
}

#[test]
fn probe_loop_drains_the_queue_in_the_background() {
    let h = harness();
    h.remote.set_online(false);
    h.client.create_member(new_member("Alex")).unwrap();
    h.remote.set_online(true);

    let handle = spawn_probe_loop(Arc::clone(&h.engine), Duration::from_millis(10)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while h.engine.pending_changes().unwrap() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    handle.stop();

    assert_eq!(h.engine.pending_changes().unwrap(), 0);
    assert_eq!(server_members(&h.remote).len(), 1);
}

/// Serves a fixed batch response and an empty snapshot.
struct ScriptedTransport {
    response: BatchPushResponse,
    batches: Mutex<Vec<BatchPushRequest>>,
}

impl ScriptedTransport {
    fn new(response: BatchPushResponse) -> Self {
        Self {
            response,
            batches: Mutex::new(Vec::new()),
        }
    }
}

impl RemoteTransport for ScriptedTransport {
    fn probe(&self) -> bool {
        true
    }

    fn push_change(&self, _change: &WireChange) -> TransportResult<Value> {
        Err(TransportError::Transient("scripted".to_string()))
    }

    fn push_batch(&self, request: &BatchPushRequest) -> TransportResult<BatchPushResponse> {
        self.batches.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }

    fn pull_snapshot(&self) -> TransportResult<Snapshot> {
        Ok(Snapshot::default())
    }

    fn fetch_assignments(&self, _range: &DateRange) -> TransportResult<Vec<Assignment>> {
        Ok(Vec::new())
    }

    fn generate_schedule(
        &self,
        _request: &GenerateScheduleRequest,
    ) -> TransportResult<GenerateScheduleResponse> {
        Err(TransportError::Transient("scripted".to_string()))
    }
}

fn scripted_engine(
    response: BatchPushResponse,
) -> (Arc<ScriptedTransport>, Arc<SyncEngine>, FamilyClient) {
    let family = Uuid::new_v4();
    let transport = Arc::new(ScriptedTransport::new(response));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let engine = Arc::new(SyncEngine::new(
        Arc::new(LocalCache::open_in_memory(family).unwrap()),
        transport.clone(),
        credentials.clone(),
        CoreConfig::default(),
    ));
    let client = FamilyClient::new(Arc::clone(&engine));
    for name in ["A", "B", "C"] {
        let created = client.create_member(new_member(name)).unwrap();
        assert!(matches!(created.outcome, QueueOutcome::Queued { .. }));
    }
    credentials.store("token".to_string());
    (transport, engine, client)
}

fn applied(index: usize) -> AppliedItem {
    AppliedItem {
        index,
        data: json!({}),
    }
}

fn failed(index: usize, code: FailureCode) -> FailedItem {
    FailedItem {
        index,
        error: "scripted failure".to_string(),
        code,
    }
}

#[test]
fn retryable_failure_ends_the_acknowledged_prefix() {
    let (transport, engine, _client) = scripted_engine(BatchPushResponse {
        applied: vec![applied(0), applied(2)],
        failed: vec![failed(1, FailureCode::Internal)],
    });

    let report = engine.sync_now();

    assert!(report.success);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.remaining, 2);
    assert!(engine.dead_letters().unwrap().is_empty());
    let batches = transport.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].changes.len(), 3);
    assert!(batches[0].changes.iter().all(|change| change.change_id.is_some()));
}

#[test]
fn permanent_failure_is_dead_lettered_and_the_queue_moves_on() {
    let (_transport, engine, _client) = scripted_engine(BatchPushResponse {
        applied: vec![applied(0), applied(2)],
        failed: vec![failed(1, FailureCode::Validation)],
    });

    let report = engine.sync_now();

    assert!(report.success);
    assert_eq!(report.pushed, 3);
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.remaining, 0);
    let dead = engine.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].kind, "create_member");
    assert_eq!(dead[0].error_code, "validation");
}

/// Blocks inside `probe` until released, holding a sync run open.
struct GatedTransport {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl RemoteTransport for GatedTransport {
    fn probe(&self) -> bool {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        false
    }

    fn push_change(&self, _change: &WireChange) -> TransportResult<Value> {
        Err(TransportError::Transient("gated".to_string()))
    }

    fn push_batch(&self, _request: &BatchPushRequest) -> TransportResult<BatchPushResponse> {
        Err(TransportError::Transient("gated".to_string()))
    }

    fn pull_snapshot(&self) -> TransportResult<Snapshot> {
        Err(TransportError::Transient("gated".to_string()))
    }

    fn fetch_assignments(&self, _range: &DateRange) -> TransportResult<Vec<Assignment>> {
        Err(TransportError::Transient("gated".to_string()))
    }

    fn generate_schedule(
        &self,
        _request: &GenerateScheduleRequest,
    ) -> TransportResult<GenerateScheduleResponse> {
        Err(TransportError::Transient("gated".to_string()))
    }
}

#[test]
fn concurrent_sync_reports_in_progress() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let engine = Arc::new(SyncEngine::new(
        Arc::new(LocalCache::open_in_memory(Uuid::new_v4()).unwrap()),
        Arc::new(GatedTransport {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }),
        Arc::new(MemoryCredentialStore::with_token("token")),
        CoreConfig::default(),
    ));

    let running = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.sync_now())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let concurrent = engine.sync_now();
    release_tx.send(()).unwrap();
    let first = running.join().unwrap();

    assert_eq!(concurrent.failure, Some(SyncFailure::InProgress));
    assert_eq!(first.failure, Some(SyncFailure::Offline));
}

#[test]
fn validation_errors_surface_before_anything_is_written() {
    let h = harness();

    let err = h.client.create_chore(NewChore {
        difficulty: 42,
        ..new_chore("Dishes", 1)
    });

    assert!(err.is_err());
    assert!(h.client.list_chores().unwrap().is_empty());
    assert_eq!(h.engine.pending_changes().unwrap(), 0);
}

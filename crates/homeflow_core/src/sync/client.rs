//! Offline-first family facade for one device.
//!
//! Every mutation is applied to the local cache first and then handed to
//! the [`SyncEngine`], which pushes it or queues it. Reads come from the
//! cache, refreshed from the authoritative store when it is reachable.
//! Chore edits and member deletions regenerate the cached schedule of what
//! they touched, so no pending slot outlives its member's eligibility.

use crate::model::assignment::{Assignment, AssignmentId, DateRange};
use crate::model::chore::{Chore, ChoreId};
use crate::model::member::{Member, MemberId};
use crate::model::validation::validate_difficulty;
use crate::model::FamilyId;
use crate::repo::{
    AssignmentRepository, ChoreRepository, CorrelatedTable, CorrelationRepository,
    FamilyRepository, MemberRepository, RepoError, RepoResult, SqliteFamilyRepository,
    SyncQueueRepository,
};
use crate::service::assignment_service::{reverse_completion, AssignmentService};
use crate::service::family_lock::FamilyLocks;
use crate::service::scheduler_service::{GenerateRequest, SchedulerError, SchedulerService};
use crate::sync::change::{
    Change, ChorePatch, EntityRef, MemberPatch, NewChore, NewMember, PointAdjustment,
    ToggleRequest,
};
use crate::sync::engine::{QueueOutcome, SyncEngine, SyncError, SyncFailure};
use crate::sync::reconciler::Reconciler;
use crate::sync::wire::GenerateScheduleRequest;
use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Local result of a mutation plus what happened to its replication.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    pub record: T,
    pub outcome: QueueOutcome,
}

/// Where a regenerated schedule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSource {
    /// The store ran the pass; the cache holds its linked rows.
    Authoritative,
    /// The store was unavailable; rows stay local until a pull links them.
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Regeneration {
    pub source: ScheduleSource,
    /// Newly created assignments, as cached locally.
    pub created: Vec<Assignment>,
}

pub struct FamilyClient {
    engine: Arc<SyncEngine>,
    locks: Arc<FamilyLocks>,
    scheduler_seed: Option<u64>,
}

impl FamilyClient {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            locks: Arc::new(FamilyLocks::new()),
            scheduler_seed: None,
        }
    }

    /// Makes offline regeneration pick first members deterministically.
    pub fn with_scheduler_seed(mut self, seed: u64) -> Self {
        self.scheduler_seed = Some(seed);
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn family_id(&self) -> FamilyId {
        self.engine.cache().family_id()
    }

    pub fn list_members(&self) -> Result<Vec<Member>, SyncError> {
        Ok(self.with_repo(|repo| repo.list_members())?)
    }

    pub fn list_chores(&self) -> Result<Vec<Chore>, SyncError> {
        Ok(self.with_repo(|repo| repo.list_chores())?)
    }

    pub fn create_member(&self, draft: NewMember) -> Result<Mutation<Member>, SyncError> {
        let mut member = Member::new(self.family_id(), draft.name.as_str());
        member.avatar = draft.avatar.clone();
        let id = self.with_repo(|repo| repo.create_member(&member))?;
        let stored = self.read_member(id)?;

        let outcome = self.engine.queue_change(Change::CreateMember(NewMember {
            local_id: Some(id),
            name: stored.name,
            avatar: stored.avatar,
        }))?;
        Ok(Mutation {
            record: self.read_member(id)?,
            outcome,
        })
    }

    /// Applies a partial update; a blank avatar clears it.
    pub fn update_member(&self, patch: MemberPatch) -> Result<Mutation<Member>, SyncError> {
        Change::UpdateMember(patch.clone()).validate()?;
        self.with_repo(|repo| -> RepoResult<()> {
            let mut member = repo.get_member(patch.id)?.ok_or(RepoError::NotFound {
                entity: "member",
                id: patch.id,
            })?;
            if let Some(name) = &patch.name {
                member.name = name.clone();
            }
            if patch.avatar.is_some() {
                member.avatar = patch.avatar.clone();
            }
            repo.update_member(&member)
        })?;

        let outcome = self.engine.queue_change(Change::UpdateMember(patch.clone()))?;
        Ok(Mutation {
            record: self.read_member(patch.id)?,
            outcome,
        })
    }

    /// Deletes a member locally, cascading to its assignments.
    pub fn delete_member(&self, id: MemberId) -> Result<QueueOutcome, SyncError> {
        self.engine.cache().with_store(|repo, queue| -> RepoResult<()> {
            repo.atomically(|| {
                remember_remote_id(repo, queue.repository(), CorrelatedTable::Members, id)?;
                repo.delete_member(id)
            })
        })?;
        self.reschedule(None)?;
        self.engine
            .queue_change(Change::DeleteMember(EntityRef { id }))
    }

    pub fn create_chore(&self, draft: NewChore) -> Result<Mutation<Chore>, SyncError> {
        Change::CreateChore(draft.clone()).validate()?;
        let mut chore = Chore::new(self.family_id(), draft.name.as_str(), draft.recurrence);
        chore.difficulty = validate_difficulty(draft.difficulty)?;
        chore.auto_assign = draft.auto_assign;
        chore.set_eligible_members(draft.eligible_members.clone());
        let id = self.with_repo(|repo| repo.create_chore(&chore))?;
        self.reschedule(Some(std::slice::from_ref(&id)))?;
        let stored = self.read_chore(id)?;

        let outcome = self.engine.queue_change(Change::CreateChore(NewChore {
            local_id: Some(id),
            name: stored.name,
            difficulty: i64::from(stored.difficulty),
            recurrence: stored.recurrence,
            auto_assign: stored.auto_assign,
            eligible_members: stored.eligible_members,
        }))?;
        Ok(Mutation {
            record: self.read_chore(id)?,
            outcome,
        })
    }

    /// Applies a partial update; a present eligible set replaces the old one.
    pub fn update_chore(&self, patch: ChorePatch) -> Result<Mutation<Chore>, SyncError> {
        Change::UpdateChore(patch.clone()).validate()?;
        self.with_repo(|repo| -> RepoResult<()> {
            let mut chore = repo.get_chore(patch.id)?.ok_or(RepoError::NotFound {
                entity: "chore",
                id: patch.id,
            })?;
            if let Some(name) = &patch.name {
                chore.name = name.clone();
            }
            if let Some(difficulty) = patch.difficulty {
                chore.difficulty = validate_difficulty(difficulty)?;
            }
            if let Some(recurrence) = patch.recurrence {
                chore.recurrence = recurrence;
            }
            if let Some(auto_assign) = patch.auto_assign {
                chore.auto_assign = auto_assign;
            }
            if let Some(members) = &patch.eligible_members {
                chore.set_eligible_members(members.clone());
            }
            repo.update_chore(&chore)
        })?;
        self.reschedule(Some(std::slice::from_ref(&patch.id)))?;

        let outcome = self.engine.queue_change(Change::UpdateChore(patch.clone()))?;
        Ok(Mutation {
            record: self.read_chore(patch.id)?,
            outcome,
        })
    }

    /// Deletes a chore locally, reversing credit of its completed
    /// assignments.
    pub fn delete_chore(&self, id: ChoreId) -> Result<QueueOutcome, SyncError> {
        self.engine.cache().with_store(|repo, queue| -> RepoResult<()> {
            repo.atomically(|| {
                remember_remote_id(repo, queue.repository(), CorrelatedTable::Chores, id)?;
                for assignment in repo.list_assignments_for_chore(id)? {
                    reverse_completion(repo, &assignment)?;
                }
                repo.delete_chore(id)
            })
        })?;
        self.engine
            .queue_change(Change::DeleteChore(EntityRef { id }))
    }

    /// Toggles completion locally and replicates it.
    pub fn toggle_assignment(
        &self,
        id: AssignmentId,
        member_override: Option<MemberId>,
    ) -> Result<Mutation<Assignment>, SyncError> {
        let assignment = self.engine.cache().with_repo(|repo| {
            AssignmentService::new(*repo).toggle_assignment(id, member_override)
        })?;

        let outcome = self
            .engine
            .queue_change(Change::ToggleAssignment(ToggleRequest {
                assignment_id: id,
                member_override,
            }))?;
        Ok(Mutation {
            record: assignment,
            outcome,
        })
    }

    pub fn adjust_points(
        &self,
        member_id: MemberId,
        points: i64,
        reason: Option<&str>,
    ) -> Result<Mutation<Member>, SyncError> {
        let member = self.engine.cache().with_repo(|repo| {
            AssignmentService::new(*repo).adjust_points(member_id, points, reason)
        })?;

        let outcome = self
            .engine
            .queue_change(Change::AdjustPoints(PointAdjustment {
                member_id,
                points,
                reason: reason.map(str::to_string),
            }))?;
        Ok(Mutation {
            record: member,
            outcome,
        })
    }

    /// Assignments due within `range`.
    ///
    /// When the store is reachable its schedule is folded into the cache
    /// first; any transport failure falls back to the cached rows.
    pub fn get_assignments(&self, range: &DateRange) -> Result<Vec<Assignment>, SyncError> {
        if self.engine.has_credentials() && self.engine.probe_now() {
            match self.engine.transport().fetch_assignments(range) {
                Ok(remote) => {
                    self.with_repo(|repo| Reconciler::new(repo).upsert_assignments(&remote))?;
                }
                Err(err) => {
                    let failure = self.engine.transport_failure(err);
                    warn!(
                        "event=schedule_fetch module=sync status=error error_code={} fallback=cache",
                        failure.as_str()
                    );
                }
            }
        }

        Ok(self.with_repo(|repo| repo.list_assignments_between(range))?)
    }

    /// Regenerates the schedule, on the store when it is reachable.
    ///
    /// Queued changes are pushed first so the store schedules the chores
    /// this device knows about. Any failure on the way falls back to
    /// [`FamilyClient::regenerate_offline`].
    pub fn regenerate(&self, horizon_days: Option<u32>) -> Result<Regeneration, SchedulerError> {
        if self.engine.has_credentials() && self.engine.probe_now() {
            match self.regenerate_remote(horizon_days) {
                Ok(created) => {
                    info!(
                        "event=schedule_remote module=sync status=ok family_id={} created={}",
                        self.family_id(),
                        created.len()
                    );
                    return Ok(Regeneration {
                        source: ScheduleSource::Authoritative,
                        created,
                    });
                }
                Err(failure) => warn!(
                    "event=schedule_remote module=sync status=error error_code={} fallback=offline",
                    failure.as_str()
                ),
            }
        }

        Ok(Regeneration {
            source: ScheduleSource::Offline,
            created: self.regenerate_offline(horizon_days)?,
        })
    }

    /// Regenerates the cached schedule without the authoritative store.
    ///
    /// Generated assignments stay local; the store schedules its own and
    /// the next pull links them by slot.
    pub fn regenerate_offline(
        &self,
        horizon_days: Option<u32>,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        self.regenerate_offline_at(&GenerateRequest {
            today: Local::now().date_naive(),
            horizon_days,
        })
    }

    pub fn regenerate_offline_at(
        &self,
        request: &GenerateRequest,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        let created = self.with_repo(|repo| self.scheduler(*repo).generate_assignments(request))?;
        info!(
            "event=schedule_offline module=sync status=ok family_id={} created={}",
            self.family_id(),
            created.len()
        );
        Ok(created)
    }

    fn regenerate_remote(&self, horizon_days: Option<u32>) -> Result<Vec<Assignment>, SyncFailure> {
        let pushed = self.engine.sync_now();
        if let Some(failure) = pushed.failure {
            return Err(failure);
        }
        let response = self
            .engine
            .transport()
            .generate_schedule(&GenerateScheduleRequest { days: horizon_days })
            .map_err(|err| self.engine.transport_failure(err))?;

        // A full pull also drops rows the pass replaced.
        let pulled = self.engine.sync_now();
        self.with_repo(|repo| -> RepoResult<Vec<Assignment>> {
            if !pulled.success {
                Reconciler::new(repo).upsert_assignments(&response.assignments)?;
            }
            let mut created = Vec::with_capacity(response.assignments.len());
            for remote in &response.assignments {
                let Some(local_id) = repo.local_id_for(CorrelatedTable::Assignments, remote.id)?
                else {
                    continue;
                };
                if let Some(local) = repo.get_assignment(local_id)? {
                    created.push(local);
                }
            }
            Ok(created)
        })
        .map_err(|err| SyncFailure::Storage(err.to_string()))
    }

    /// Brings the cached schedule of `chore_ids`, or of every chore, in line
    /// with the current chores and members.
    fn reschedule(&self, chore_ids: Option<&[ChoreId]>) -> Result<(), SyncError> {
        let request = GenerateRequest {
            today: Local::now().date_naive(),
            horizon_days: None,
        };
        let result = self.with_repo(|repo| {
            let scheduler = self.scheduler(*repo);
            match chore_ids {
                Some(ids) => scheduler.regenerate_chores(ids, &request),
                None => scheduler.generate_assignments(&request),
            }
        });
        match result {
            Ok(created) => {
                debug!(
                    "event=schedule_local module=sync status=ok family_id={} created={}",
                    self.family_id(),
                    created.len()
                );
                Ok(())
            }
            Err(SchedulerError::Repo(err)) => Err(err.into()),
            Err(err @ SchedulerError::InvalidHorizon { .. }) => {
                Err(SyncError::Storage(RepoError::InvalidData(err.to_string())))
            }
        }
    }

    fn scheduler<'conn>(
        &self,
        repo: SqliteFamilyRepository<'conn>,
    ) -> SchedulerService<SqliteFamilyRepository<'conn>> {
        let config = self.engine.config().scheduler;
        match self.scheduler_seed {
            Some(seed) => SchedulerService::with_seed(repo, config, Arc::clone(&self.locks), seed),
            None => SchedulerService::new(repo, config, Arc::clone(&self.locks)),
        }
    }

    fn with_repo<T>(&self, f: impl FnOnce(&SqliteFamilyRepository<'_>) -> T) -> T {
        self.engine.cache().with_repo(f)
    }

    fn read_member(&self, id: MemberId) -> Result<Member, SyncError> {
        self.with_repo(|repo| repo.get_member(id))?
            .ok_or(SyncError::NotFound {
                entity: "member",
                id,
            })
    }

    fn read_chore(&self, id: ChoreId) -> Result<Chore, SyncError> {
        self.with_repo(|repo| repo.get_chore(id))?
            .ok_or(SyncError::NotFound { entity: "chore", id })
    }
}

/// Keeps a linked row's authoritative id reachable after the row is gone.
fn remember_remote_id<R, Q>(
    repo: &R,
    queue: &Q,
    table: CorrelatedTable,
    local_id: Uuid,
) -> RepoResult<()>
where
    R: CorrelationRepository,
    Q: SyncQueueRepository,
{
    if let Some(remote_id) = repo.remote_id_for(table, local_id)? {
        queue.record_alias(local_id, remote_id)?;
    }
    Ok(())
}

//! Authoritative-side application of pushed changes.
//!
//! # Responsibility
//! - Apply batches strictly in input order, each entry committed or failed
//!   on its own.
//! - Resolve client `local_id`s created earlier in the same batch.
//! - Regenerate the schedule of chores a change touched.
//! - Serve snapshots and date-range schedule reads.
//!
//! # Invariants
//! - Every lookup is scoped to the repository's family; foreign ids fail
//!   with `not_found`.
//! - A `changeId` already recorded for the family is never applied twice
//!   within the retention window; its stored result is returned instead.
//! - Updates are last-write-wins partial patches.
//! - Creating or updating a chore, or deleting a member, regenerates the
//!   affected schedule in the same atomic unit as the change itself.

use crate::config::{CoreConfig, SchedulerConfig, DEFAULT_CHANGE_LOG_RETENTION_DAYS};
use crate::model::assignment::{Assignment, DateRange};
use crate::model::chore::Chore;
use crate::model::member::Member;
use crate::model::now_epoch_ms;
use crate::model::validation::validate_difficulty;
use crate::repo::{ChangeLogRepository, FamilyRepository, RepoError, RepoResult};
use crate::service::assignment_service::{apply_adjustment, apply_toggle, reverse_completion};
use crate::service::family_lock::FamilyLocks;
use crate::service::scheduler_service::{regenerate_chores, GenerateRequest};
use crate::service::{ServiceError, ServiceResult};
use crate::sync::change::Change;
use crate::sync::wire::{
    AppliedItem, AppliedRecord, BatchPushRequest, BatchPushResponse, FailedItem, Snapshot,
    WireChange,
};
use chrono::Local;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use uuid::Uuid;

const MS_PER_DAY: i64 = 86_400_000;

pub struct MergeEngine<R: FamilyRepository + ChangeLogRepository> {
    repo: R,
    locks: Arc<FamilyLocks>,
    scheduler: SchedulerConfig,
    rng: Mutex<StdRng>,
    change_log_retention_days: u32,
}

impl<R: FamilyRepository + ChangeLogRepository> MergeEngine<R> {
    pub fn new(repo: R, locks: Arc<FamilyLocks>) -> Self {
        Self {
            repo,
            locks,
            scheduler: SchedulerConfig::default(),
            rng: Mutex::new(StdRng::from_entropy()),
            change_log_retention_days: DEFAULT_CHANGE_LOG_RETENTION_DAYS,
        }
    }

    /// Takes scheduler settings and change-log retention from `config`.
    pub fn with_config(mut self, config: &CoreConfig) -> Self {
        self.scheduler = config.scheduler;
        self.change_log_retention_days = config.change_log_retention_days;
        self
    }

    /// Applies a batch and reports per-entry success or failure.
    pub fn apply_batch(&self, request: &BatchPushRequest) -> BatchPushResponse {
        let family_id = self.repo.family_id();
        self.locks.with_family(family_id, || {
            let started_at = Instant::now();
            self.prune_change_log();
            let mut aliases: HashMap<Uuid, Uuid> = HashMap::new();
            let mut response = BatchPushResponse::default();

            for (index, wire) in request.changes.iter().enumerate() {
                match self.apply_entry(wire, &mut aliases) {
                    Ok(data) => response.applied.push(AppliedItem { index, data }),
                    Err(err) => {
                        warn!(
                            "event=merge_apply module=merge status=error family_id={} index={} kind={} error_code={} error={}",
                            family_id,
                            index,
                            wire.kind,
                            err.failure_code().as_str(),
                            err
                        );
                        response.failed.push(FailedItem {
                            index,
                            error: err.to_string(),
                            code: err.failure_code(),
                        });
                    }
                }
            }

            info!(
                "event=merge_batch module=merge status=ok family_id={} entries={} applied={} failed={} duration_ms={}",
                family_id,
                request.changes.len(),
                response.applied.len(),
                response.failed.len(),
                started_at.elapsed().as_millis()
            );
            response
        })
    }

    /// Applies one change outside of a batch.
    pub fn apply_single(&self, wire: &WireChange) -> ServiceResult<Value> {
        let family_id = self.repo.family_id();
        self.locks.with_family(family_id, || {
            self.prune_change_log();
            let mut aliases = HashMap::new();
            self.apply_entry(wire, &mut aliases)
        })
    }

    /// Full authoritative state of the family.
    pub fn snapshot(&self) -> RepoResult<Snapshot> {
        Ok(Snapshot {
            members: self.repo.list_members()?,
            chores: self.repo.list_chores()?,
            assignments: self.repo.list_assignments()?,
            point_history: self.repo.list_point_history()?,
            timestamp: now_epoch_ms(),
        })
    }

    pub fn assignments_between(&self, range: &DateRange) -> RepoResult<Vec<Assignment>> {
        self.repo.list_assignments_between(range)
    }

    fn apply_entry(
        &self,
        wire: &WireChange,
        aliases: &mut HashMap<Uuid, Uuid>,
    ) -> ServiceResult<Value> {
        if let Some(change_id) = wire.change_id {
            if let Some(stored) = self.repo.applied_result(change_id)? {
                info!(
                    "event=merge_apply module=merge status=skip change_id={} reason=already_applied",
                    change_id
                );
                let data = parse_stored(&stored)?;
                register_alias(&data, aliases);
                return Ok(data);
            }
        }

        let change = Change::from_wire(&wire.kind, wire.data.clone())?
            .remap_ids(|id| aliases.get(&id).copied().unwrap_or(id));

        let data = self.repo.atomically(|| -> ServiceResult<Value> {
            let record = self.apply_change(&change)?;
            self.reschedule_after(&change, &record)?;
            let data = serde_json::to_value(&record).map_err(|err| {
                RepoError::InvalidData(format!("unserializable apply result: {err}"))
            })?;
            if let Some(change_id) = wire.change_id {
                self.repo
                    .record_applied(change_id, change.kind().as_str(), &data.to_string())?;
            }
            Ok(data)
        })?;

        register_alias(&data, aliases);
        Ok(data)
    }

    fn apply_change(&self, change: &Change) -> ServiceResult<AppliedRecord> {
        let family_id = self.repo.family_id();
        match change {
            Change::CreateMember(payload) => {
                let mut member = Member::new(family_id, payload.name.as_str());
                member.avatar = payload.avatar.clone();
                let id = self.repo.create_member(&member)?;
                Ok(AppliedRecord::Member {
                    member: self.read_member(id)?,
                    local_id: payload.local_id,
                })
            }
            Change::UpdateMember(patch) => {
                let mut member = self.read_member(patch.id)?;
                if let Some(name) = &patch.name {
                    member.name = name.clone();
                }
                if patch.avatar.is_some() {
                    member.avatar = patch.avatar.clone();
                }
                self.repo.update_member(&member)?;
                Ok(AppliedRecord::Member {
                    member: self.read_member(patch.id)?,
                    local_id: None,
                })
            }
            Change::DeleteMember(target) => {
                self.read_member(target.id)?;
                self.repo.delete_member(target.id)?;
                Ok(AppliedRecord::Deleted { id: target.id })
            }
            Change::CreateChore(payload) => {
                let mut chore = Chore::new(family_id, payload.name.as_str(), payload.recurrence);
                chore.difficulty = validate_difficulty(payload.difficulty)?;
                chore.auto_assign = payload.auto_assign;
                chore.set_eligible_members(payload.eligible_members.clone());
                let id = self.repo.create_chore(&chore)?;
                Ok(AppliedRecord::Chore {
                    chore: self.read_chore(id)?,
                    local_id: payload.local_id,
                })
            }
            Change::UpdateChore(patch) => {
                let mut chore = self.read_chore(patch.id)?;
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
                self.repo.update_chore(&chore)?;
                Ok(AppliedRecord::Chore {
                    chore: self.read_chore(patch.id)?,
                    local_id: None,
                })
            }
            Change::DeleteChore(target) => {
                self.read_chore(target.id)?;
                for assignment in self.repo.list_assignments_for_chore(target.id)? {
                    reverse_completion(&self.repo, &assignment)?;
                }
                self.repo.delete_chore(target.id)?;
                Ok(AppliedRecord::Deleted { id: target.id })
            }
            Change::ToggleAssignment(request) => {
                let assignment =
                    apply_toggle(&self.repo, request.assignment_id, request.member_override)?;
                Ok(AppliedRecord::Assignment { assignment })
            }
            Change::AdjustPoints(adjustment) => {
                let member = apply_adjustment(
                    &self.repo,
                    adjustment.member_id,
                    adjustment.points,
                    adjustment.reason.as_deref(),
                )?;
                Ok(AppliedRecord::Member {
                    member,
                    local_id: None,
                })
            }
        }
    }

    /// Regenerates the chores whose schedule `change` may have invalidated.
    fn reschedule_after(&self, change: &Change, record: &AppliedRecord) -> ServiceResult<()> {
        let chores: Vec<Chore> = match (change, record) {
            (Change::CreateChore(_) | Change::UpdateChore(_), AppliedRecord::Chore { chore, .. }) => {
                vec![chore.clone()]
            }
            (Change::DeleteMember(_), _) => self.repo.list_chores()?,
            _ => return Ok(()),
        };
        if chores.is_empty() {
            return Ok(());
        }

        let request = GenerateRequest {
            today: Local::now().date_naive(),
            horizon_days: None,
        };
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let created = regenerate_chores(&self.repo, &self.scheduler, &mut *rng, &chores, &request)?;
        debug!(
            "event=merge_reschedule module=merge status=ok kind={} chores={} created={}",
            change.kind().as_str(),
            chores.len(),
            created.len()
        );
        Ok(())
    }

    /// Forgets applied-change results older than the retention window.
    fn prune_change_log(&self) {
        let cutoff = now_epoch_ms()
            .saturating_sub(i64::from(self.change_log_retention_days).saturating_mul(MS_PER_DAY));
        match self.repo.prune_applied_before(cutoff) {
            Ok(0) => {}
            Ok(pruned) => debug!(
                "event=change_log_prune module=merge status=ok family_id={} pruned={}",
                self.repo.family_id(),
                pruned
            ),
            Err(err) => warn!(
                "event=change_log_prune module=merge status=error family_id={} error={}",
                self.repo.family_id(),
                err
            ),
        }
    }

    fn read_member(&self, id: Uuid) -> ServiceResult<Member> {
        self.repo.get_member(id)?.ok_or(ServiceError::NotFound {
            entity: "member",
            id,
        })
    }

    fn read_chore(&self, id: Uuid) -> ServiceResult<Chore> {
        self.repo
            .get_chore(id)?
            .ok_or(ServiceError::NotFound { entity: "chore", id })
    }
}

fn parse_stored(stored: &str) -> ServiceResult<Value> {
    serde_json::from_str(stored).map_err(|err| {
        ServiceError::Repo(RepoError::InvalidData(format!(
            "invalid stored apply result: {err}"
        )))
    })
}

fn register_alias(data: &Value, aliases: &mut HashMap<Uuid, Uuid>) {
    let Ok(record) = serde_json::from_value::<AppliedRecord>(data.clone()) else {
        return;
    };
    if let Some(local_id) = record.local_id() {
        aliases.insert(local_id, record.authoritative_id());
    }
}

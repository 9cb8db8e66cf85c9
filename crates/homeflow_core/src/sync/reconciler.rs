//! Folds authoritative records back into the local cache.
//!
//! # Responsibility
//! - Update linked rows in place, adopt authoritative ids onto matching
//!   unlinked rows, insert the rest.
//! - Map authoritative references (chores, members, eligible sets) to local
//!   ids.
//! - Prune linked rows a full snapshot no longer contains.
//!
//! # Invariants
//! - Reconciling the same snapshot twice leaves row counts unchanged.
//! - Rows that were never linked are never deleted by a prune.
//! - A full snapshot is applied as one atomic unit.

use crate::model::assignment::Assignment;
use crate::model::chore::Chore;
use crate::model::member::Member;
use crate::model::points::PointEntry;
use crate::repo::{CorrelatedTable, CorrelationRepository, FamilyRepository, RepoError, RepoResult};
use crate::sync::wire::Snapshot;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Instant;
use uuid::Uuid;

/// Per-entity outcome of an upsert pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    /// Already linked rows refreshed in place.
    pub updated: usize,
    /// Unlinked rows that adopted an authoritative id.
    pub linked: usize,
    pub inserted: usize,
    pub pruned: usize,
    /// Records dropped for unresolved references or invalid fields.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub members: UpsertCounts,
    pub chores: UpsertCounts,
    pub assignments: UpsertCounts,
    pub point_entries: usize,
}

pub struct Reconciler<'r, R: FamilyRepository + CorrelationRepository> {
    repo: &'r R,
}

impl<'r, R: FamilyRepository + CorrelationRepository> Reconciler<'r, R> {
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Applies a full authoritative snapshot, pruning linked rows it omits.
    pub fn upsert_snapshot(&self, snapshot: &Snapshot) -> RepoResult<ReconcileSummary> {
        let started_at = Instant::now();
        let summary = self.repo.atomically(|| -> RepoResult<ReconcileSummary> {
            let mut summary = ReconcileSummary {
                members: self.upsert_members(&snapshot.members)?,
                chores: self.upsert_chores(&snapshot.chores)?,
                assignments: self.upsert_assignments(&snapshot.assignments)?,
                point_entries: 0,
            };

            summary.assignments.pruned = self.prune(
                CorrelatedTable::Assignments,
                snapshot.assignments.iter().map(|assignment| assignment.id).collect(),
            )?;
            summary.chores.pruned = self.prune(
                CorrelatedTable::Chores,
                snapshot.chores.iter().map(|chore| chore.id).collect(),
            )?;
            summary.members.pruned = self.prune(
                CorrelatedTable::Members,
                snapshot.members.iter().map(|member| member.id).collect(),
            )?;
            summary.point_entries = self.replace_point_history(&snapshot.point_history)?;
            Ok(summary)
        })?;

        info!(
            "event=reconcile_snapshot module=sync status=ok family_id={} members_inserted={} members_linked={} chores_inserted={} chores_linked={} assignments_inserted={} assignments_linked={} pruned={} skipped={} duration_ms={}",
            self.repo.family_id(),
            summary.members.inserted,
            summary.members.linked,
            summary.chores.inserted,
            summary.chores.linked,
            summary.assignments.inserted,
            summary.assignments.linked,
            summary.members.pruned + summary.chores.pruned + summary.assignments.pruned,
            summary.members.skipped + summary.chores.skipped + summary.assignments.skipped,
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    pub fn upsert_members(&self, members: &[Member]) -> RepoResult<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        for remote in members {
            let mut member = remote.clone();
            member.family_id = self.repo.family_id();
            member.remote_id = Some(remote.id);

            let outcome = match self.correlate_by_name(CorrelatedTable::Members, remote)? {
                Some((local_id, adopted)) => {
                    member.id = local_id;
                    self.repo
                        .update_member(&member)
                        .and_then(|()| self.repo.set_member_points(local_id, remote.total_points))
                        .map(|()| adopted)
                }
                None => self.repo.create_member(&member).map(|_| Adoption::Inserted),
            };
            tally(&mut counts, outcome, "member", remote.id)?;
        }
        Ok(counts)
    }

    pub fn upsert_chores(&self, chores: &[Chore]) -> RepoResult<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        for remote in chores {
            let mut chore = remote.clone();
            chore.family_id = self.repo.family_id();
            chore.remote_id = Some(remote.id);
            chore.restricted = remote.restricted || !remote.eligible_members.is_empty();
            chore.eligible_members = Vec::with_capacity(remote.eligible_members.len());
            for member_id in &remote.eligible_members {
                match self.repo.local_id_for(CorrelatedTable::Members, *member_id)? {
                    Some(local_id) => chore.eligible_members.push(local_id),
                    None => warn!(
                        "event=reconcile_chore module=sync status=skip chore_id={} member_id={} reason=unknown_eligible_member",
                        remote.id, member_id
                    ),
                }
            }

            let outcome = match self.correlate_by_name(CorrelatedTable::Chores, remote)? {
                Some((local_id, adopted)) => {
                    chore.id = local_id;
                    self.repo.update_chore(&chore).map(|()| adopted)
                }
                None => self.repo.create_chore(&chore).map(|_| Adoption::Inserted),
            };
            tally(&mut counts, outcome, "chore", remote.id)?;
        }
        Ok(counts)
    }

    /// Upserts assignments without pruning; also used for partial range
    /// refreshes.
    pub fn upsert_assignments(&self, assignments: &[Assignment]) -> RepoResult<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        for remote in assignments {
            let Some(chore_id) = self.repo.local_id_for(CorrelatedTable::Chores, remote.chore_id)?
            else {
                warn!(
                    "event=reconcile_assignment module=sync status=skip assignment_id={} reason=unknown_chore",
                    remote.id
                );
                counts.skipped += 1;
                continue;
            };
            let Some(member_id) =
                self.repo.local_id_for(CorrelatedTable::Members, remote.member_id)?
            else {
                warn!(
                    "event=reconcile_assignment module=sync status=skip assignment_id={} reason=unknown_member",
                    remote.id
                );
                counts.skipped += 1;
                continue;
            };

            let mut assignment = remote.clone();
            assignment.family_id = self.repo.family_id();
            assignment.chore_id = chore_id;
            assignment.member_id = member_id;
            assignment.remote_id = Some(remote.id);

            let existing = match self.repo.local_id_for(CorrelatedTable::Assignments, remote.id)? {
                Some(local_id) => Some((local_id, Adoption::Updated)),
                None => self
                    .repo
                    .unlinked_in_slot(chore_id, remote.due_date)?
                    .map(|local_id| (local_id, Adoption::Linked)),
            };

            match existing {
                Some((local_id, adoption)) => {
                    if adoption == Adoption::Linked {
                        self.repo
                            .link(CorrelatedTable::Assignments, local_id, remote.id)?;
                    }
                    assignment.id = local_id;
                    self.clear_slot(chore_id, remote.due_date, local_id)?;
                    self.repo.update_assignment(&assignment)?;
                    tally(&mut counts, Ok(adoption), "assignment", remote.id)?;
                }
                None => {
                    self.clear_slot(chore_id, remote.due_date, remote.id)?;
                    self.repo.insert_assignment(&assignment)?;
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Replaces the local point history with the authoritative one.
    pub fn replace_point_history(&self, entries: &[PointEntry]) -> RepoResult<usize> {
        let mut mapped = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(member_id) =
                self.repo.local_id_for(CorrelatedTable::Members, entry.member_id)?
            else {
                debug!(
                    "event=reconcile_points module=sync status=skip entry_id={} reason=unknown_member",
                    entry.id
                );
                continue;
            };

            let mut local = entry.clone();
            local.family_id = self.repo.family_id();
            local.member_id = member_id;
            if let Some(chore_id) = entry.chore_id {
                local.chore_id = Some(self.local_or_same(CorrelatedTable::Chores, chore_id)?);
            }
            if let Some(assignment_id) = entry.assignment_id {
                local.assignment_id =
                    Some(self.local_or_same(CorrelatedTable::Assignments, assignment_id)?);
            }
            mapped.push(local);
        }

        self.repo.replace_point_history(&mapped)
    }

    /// Local row for an authoritative member or chore: linked first, then an
    /// unlinked row with the same name, which gets linked here.
    fn correlate_by_name<T: Named>(
        &self,
        table: CorrelatedTable,
        remote: &T,
    ) -> RepoResult<Option<(Uuid, Adoption)>> {
        if let Some(local_id) = self.repo.local_id_for(table, remote.id())? {
            return Ok(Some((local_id, Adoption::Updated)));
        }
        let Some(local_id) = self.repo.unlinked_by_name(table, remote.name())? else {
            return Ok(None);
        };
        self.repo.link(table, local_id, remote.id())?;
        debug!(
            "event=reconcile_link module=sync status=ok local_id={} remote_id={}",
            local_id,
            remote.id()
        );
        Ok(Some((local_id, Adoption::Linked)))
    }

    /// Removes whatever other assignment holds the `(chore, date)` slot.
    fn clear_slot(&self, chore_id: Uuid, date: NaiveDate, keep: Uuid) -> RepoResult<()> {
        if let Some(occupant) = self.repo.assignment_on(chore_id, date)? {
            if occupant.id != keep {
                debug!(
                    "event=reconcile_assignment module=sync status=ok assignment_id={} reason=slot_taken_by_authoritative",
                    occupant.id
                );
                self.repo.delete_assignment(occupant.id)?;
            }
        }
        Ok(())
    }

    fn prune(&self, table: CorrelatedTable, present: HashSet<Uuid>) -> RepoResult<usize> {
        let mut pruned = 0usize;
        for (local_id, remote_id) in self.repo.linked_rows(table)? {
            if present.contains(&remote_id) {
                continue;
            }
            match table {
                CorrelatedTable::Members => self.repo.delete_member(local_id)?,
                CorrelatedTable::Chores => self.repo.delete_chore(local_id)?,
                CorrelatedTable::Assignments => self.repo.delete_assignment(local_id)?,
            }
            pruned += 1;
        }
        Ok(pruned)
    }

    fn local_or_same(&self, table: CorrelatedTable, remote_id: Uuid) -> RepoResult<Uuid> {
        Ok(self.repo.local_id_for(table, remote_id)?.unwrap_or(remote_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adoption {
    Updated,
    Linked,
    Inserted,
}

trait Named {
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
}

impl Named for Member {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for Chore {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Tallies one record; invalid authoritative fields skip the record, any
/// other failure aborts the pass.
fn tally(
    counts: &mut UpsertCounts,
    outcome: RepoResult<Adoption>,
    entity: &'static str,
    remote_id: Uuid,
) -> RepoResult<()> {
    match outcome {
        Ok(Adoption::Updated) => counts.updated += 1,
        Ok(Adoption::Linked) => counts.linked += 1,
        Ok(Adoption::Inserted) => counts.inserted += 1,
        Err(RepoError::Validation(err)) => {
            warn!(
                "event=reconcile_{} module=sync status=skip remote_id={} error={}",
                entity, remote_id, err
            );
            counts.skipped += 1;
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

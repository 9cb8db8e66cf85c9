//! Assignment completion and point bookkeeping.
//!
//! # Responsibility
//! - Toggle assignments between pending and completed.
//! - Keep member point totals and point history in step with completions.
//!
//! # Invariants
//! - Completing credits `difficulty × 10` and stores it in
//!   `points_awarded`; un-completing debits exactly the stored amount.
//! - Status is written before points, and both land in one atomic unit.
//! - A member's total equals the sum of `points_awarded` over completed
//!   assignments plus manual adjustments; `repair_points` restores it.

use crate::model::assignment::{Assignment, AssignmentId, AssignmentStatus};
use crate::model::member::{Member, MemberId};
use crate::model::now_epoch_ms;
use crate::model::points::{PointEntry, PointSource};
use crate::model::validation::normalize_reason;
use crate::repo::{FamilyRepository, RepoResult};
use crate::service::{ServiceError, ServiceResult};
use log::{info, warn};

/// Completion and points use cases over a family repository.
pub struct AssignmentService<R: FamilyRepository> {
    repo: R,
}

impl<R: FamilyRepository> AssignmentService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Flips an assignment between pending and completed.
    ///
    /// `member_override` reassigns the assignment before crediting and is
    /// only honoured when completing.
    pub fn toggle_assignment(
        &self,
        id: AssignmentId,
        member_override: Option<MemberId>,
    ) -> ServiceResult<Assignment> {
        self.repo
            .atomically(|| apply_toggle(&self.repo, id, member_override))
    }

    /// Adds a signed manual adjustment to a member's total.
    pub fn adjust_points(
        &self,
        member_id: MemberId,
        points: i64,
        reason: Option<&str>,
    ) -> ServiceResult<Member> {
        self.repo
            .atomically(|| apply_adjustment(&self.repo, member_id, points, reason))
    }

    /// Recomputes every member's total from completed assignments and
    /// adjustments. Returns how many totals were corrected.
    pub fn repair_points(&self) -> ServiceResult<usize> {
        let repaired = self.repo.atomically(|| -> ServiceResult<usize> {
            let members = self.repo.list_members()?;
            let mut repaired = 0usize;
            for (member_id, derived) in self.repo.derived_point_totals()? {
                let Some(member) = members.iter().find(|member| member.id == member_id) else {
                    continue;
                };
                if member.total_points != derived {
                    warn!(
                        "event=points_repair module=service status=drift member_id={} stored={} derived={}",
                        member_id, member.total_points, derived
                    );
                    self.repo.set_member_points(member_id, derived)?;
                    repaired += 1;
                }
            }
            Ok(repaired)
        })?;

        info!(
            "event=points_repair module=service status=ok family_id={} repaired={}",
            self.repo.family_id(),
            repaired
        );
        Ok(repaired)
    }
}

/// Toggle body shared with the merge engine. Callers provide atomicity.
pub(crate) fn apply_toggle<R: FamilyRepository>(
    repo: &R,
    id: AssignmentId,
    member_override: Option<MemberId>,
) -> ServiceResult<Assignment> {
    let mut assignment = repo.get_assignment(id)?.ok_or(ServiceError::NotFound {
        entity: "assignment",
        id,
    })?;

    match assignment.status {
        AssignmentStatus::Pending => {
            if let Some(member_id) = member_override {
                if repo.get_member(member_id)?.is_none() {
                    return Err(ServiceError::NotFound {
                        entity: "member",
                        id: member_id,
                    });
                }
                assignment.member_id = member_id;
            }

            let chore = repo
                .get_chore(assignment.chore_id)?
                .ok_or(ServiceError::NotFound {
                    entity: "chore",
                    id: assignment.chore_id,
                })?;
            let points = chore.points_value();

            assignment.status = AssignmentStatus::Completed;
            assignment.completed_at = Some(now_epoch_ms());
            assignment.points_awarded = Some(points);
            repo.update_assignment(&assignment)?;

            repo.add_member_points(assignment.member_id, points)?;
            repo.record_point_entry(
                &PointEntry::new(
                    repo.family_id(),
                    assignment.member_id,
                    points,
                    PointSource::Completion,
                )
                .for_assignment(chore.id, assignment.id),
            )?;
        }
        AssignmentStatus::Completed => {
            let credited = assignment.points_awarded.unwrap_or(0);

            assignment.status = AssignmentStatus::Pending;
            assignment.completed_at = None;
            assignment.points_awarded = None;
            repo.update_assignment(&assignment)?;

            debit_credit(repo, &assignment, credited)?;
        }
    }

    info!(
        "event=assignment_toggle module=service status=ok assignment_id={} new_status={}",
        assignment.id,
        assignment.status.as_str()
    );
    Ok(assignment)
}

pub(crate) fn apply_adjustment<R: FamilyRepository>(
    repo: &R,
    member_id: MemberId,
    points: i64,
    reason: Option<&str>,
) -> ServiceResult<Member> {
    let reason = normalize_reason(reason)?;
    repo.add_member_points(member_id, points)?;

    let mut entry = PointEntry::new(repo.family_id(), member_id, points, PointSource::Adjustment);
    entry.reason = reason;
    repo.record_point_entry(&entry)?;

    repo.get_member(member_id)?
        .ok_or(ServiceError::InconsistentState("adjusted member not found in read-back"))
}

/// Reverses the credit of a completed assignment that is about to be
/// deleted. Pending assignments carry no credit and are ignored.
pub(crate) fn reverse_completion<R: FamilyRepository>(
    repo: &R,
    assignment: &Assignment,
) -> RepoResult<()> {
    if !assignment.is_completed() {
        return Ok(());
    }
    debit_credit(repo, assignment, assignment.points_awarded.unwrap_or(0))
}

fn debit_credit<R: FamilyRepository>(
    repo: &R,
    assignment: &Assignment,
    credited: i64,
) -> RepoResult<()> {
    if credited == 0 {
        return Ok(());
    }

    repo.add_member_points(assignment.member_id, -credited)?;
    repo.record_point_entry(
        &PointEntry::new(
            repo.family_id(),
            assignment.member_id,
            -credited,
            PointSource::Reversal,
        )
        .for_assignment(assignment.chore_id, assignment.id),
    )
}

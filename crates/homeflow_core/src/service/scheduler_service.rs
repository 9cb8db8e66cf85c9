//! Recurring assignment scheduler.
//!
//! # Responsibility
//! - Regenerate future assignments of every auto-assigned chore over an
//!   adaptive horizon.
//! - Purge future assignments that violate a chore's eligible set, manual
//!   chores included.
//!
//! # Invariants
//! - Runs under the family's single-writer lock; each chore regenerates in
//!   its own atomic unit.
//! - Never creates a second assignment for an occupied `(chore, date)` slot.
//! - A missing eligible member skips that occurrence; the pass continues.
//! - Occurrences are generated for `today <= date < today + horizon`.
//! - A chore without past assignments never starts later than its earliest
//!   upcoming assignment, so rerunning cannot push its first occurrence out.

use crate::config::SchedulerConfig;
use crate::model::assignment::Assignment;
use crate::model::chore::{Chore, ChoreId};
use crate::model::member::Member;
use crate::repo::{FamilyRepository, RepoError};
use crate::service::assignment_service::reverse_completion;
use crate::service::family_lock::FamilyLocks;
use crate::service::rotation::select_member;
use chrono::{Days, Local, NaiveDate};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Intervals above this many days start half an interval after today.
const DELAYED_START_THRESHOLD_DAYS: u32 = 3;

/// Input of one generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateRequest {
    /// First schedulable day.
    pub today: NaiveDate,
    /// Explicit horizon in days; `None` uses the adaptive horizon per chore.
    pub horizon_days: Option<u32>,
}

#[derive(Debug)]
pub enum SchedulerError {
    InvalidHorizon { requested: u32, max: u32 },
    Repo(RepoError),
}

impl Display for SchedulerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHorizon { requested, max } => {
                write!(f, "horizon of {requested} days is outside 1..={max}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidHorizon { .. } => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for SchedulerError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

#[derive(Debug, Default)]
struct ChoreOutcome {
    created: Vec<Assignment>,
    removed_pending: usize,
    purged: usize,
    skipped: usize,
}

pub struct SchedulerService<R: FamilyRepository> {
    repo: R,
    config: SchedulerConfig,
    locks: Arc<FamilyLocks>,
    rng: Mutex<StdRng>,
}

impl<R: FamilyRepository> SchedulerService<R> {
    pub fn new(repo: R, config: SchedulerConfig, locks: Arc<FamilyLocks>) -> Self {
        Self::with_rng(repo, config, locks, StdRng::from_entropy())
    }

    /// Deterministic variant for reproducible first picks.
    pub fn with_seed(repo: R, config: SchedulerConfig, locks: Arc<FamilyLocks>, seed: u64) -> Self {
        Self::with_rng(repo, config, locks, StdRng::seed_from_u64(seed))
    }

    fn with_rng(repo: R, config: SchedulerConfig, locks: Arc<FamilyLocks>, rng: StdRng) -> Self {
        Self {
            repo,
            config,
            locks,
            rng: Mutex::new(rng),
        }
    }

    /// Generation pass anchored on the local calendar day.
    pub fn generate_assignments_today(
        &self,
        horizon_days: Option<u32>,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        self.generate_assignments(&GenerateRequest {
            today: Local::now().date_naive(),
            horizon_days,
        })
    }

    /// Regenerates future assignments for every chore and returns the newly
    /// created ones.
    pub fn generate_assignments(
        &self,
        request: &GenerateRequest,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        self.check_horizon(request)?;
        let family_id = self.repo.family_id();
        self.locks.with_family(family_id, || {
            let chores = self.repo.list_chores()?;
            self.run_locked(&chores, request)
        })
    }

    /// Regenerates only the listed chores; unknown ids are ignored.
    pub fn regenerate_chores(
        &self,
        chore_ids: &[ChoreId],
        request: &GenerateRequest,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        self.check_horizon(request)?;
        let family_id = self.repo.family_id();
        self.locks.with_family(family_id, || {
            let mut chores = Vec::with_capacity(chore_ids.len());
            for id in chore_ids {
                if let Some(chore) = self.repo.get_chore(*id)? {
                    chores.push(chore);
                }
            }
            self.run_locked(&chores, request)
        })
    }

    fn check_horizon(&self, request: &GenerateRequest) -> Result<(), SchedulerError> {
        match request.horizon_days {
            Some(requested) if requested == 0 || requested > self.config.max_horizon_days => {
                Err(SchedulerError::InvalidHorizon {
                    requested,
                    max: self.config.max_horizon_days,
                })
            }
            _ => Ok(()),
        }
    }

    fn run_locked(
        &self,
        chores: &[Chore],
        request: &GenerateRequest,
    ) -> Result<Vec<Assignment>, SchedulerError> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(regenerate_chores(
            &self.repo,
            &self.config,
            &mut *rng,
            chores,
            request,
        )?)
    }
}

/// One regeneration pass over `chores` for a caller that already holds the
/// family lock.
pub(crate) fn regenerate_chores<R: FamilyRepository>(
    repo: &R,
    config: &SchedulerConfig,
    rng: &mut StdRng,
    chores: &[Chore],
    request: &GenerateRequest,
) -> Result<Vec<Assignment>, RepoError> {
    let started_at = Instant::now();
    let family_id = repo.family_id();
    info!(
        "event=schedule_generate module=scheduler status=start family_id={} today={} chores={}",
        family_id,
        request.today,
        chores.len()
    );

    let members = repo.list_members()?;
    let mut created = Vec::new();

    for chore in chores {
        let horizon = request
            .horizon_days
            .unwrap_or_else(|| adaptive_horizon(config, chore));
        let outcome = repo.atomically(|| {
            regenerate_chore(repo, config, &mut *rng, chore, &members, request.today, horizon)
        })?;

        if outcome.skipped > 0 {
            warn!(
                "event=schedule_chore module=scheduler status=skip chore_id={} skipped={} reason=no_eligible_member",
                chore.id, outcome.skipped
            );
        }
        debug!(
            "event=schedule_chore module=scheduler status=ok chore_id={} horizon_days={} created={} removed_pending={} purged={}",
            chore.id,
            horizon,
            outcome.created.len(),
            outcome.removed_pending,
            outcome.purged
        );
        created.extend(outcome.created);
    }

    info!(
        "event=schedule_generate module=scheduler status=ok family_id={} chores={} created={} duration_ms={}",
        family_id,
        chores.len(),
        created.len(),
        started_at.elapsed().as_millis()
    );
    Ok(created)
}

/// `max(min_horizon_days, 2 × interval_days)`, capped at the maximum.
fn adaptive_horizon(config: &SchedulerConfig, chore: &Chore) -> u32 {
    chore
        .recurrence
        .interval_days()
        .saturating_mul(2)
        .max(config.min_horizon_days)
        .min(config.max_horizon_days)
}

fn regenerate_chore<R: FamilyRepository>(
    repo: &R,
    config: &SchedulerConfig,
    rng: &mut StdRng,
    chore: &Chore,
    members: &[Member],
    today: NaiveDate,
    horizon_days: u32,
) -> Result<ChoreOutcome, RepoError> {
    let upcoming: Vec<Assignment> = repo
        .list_assignments_for_chore(chore.id)?
        .into_iter()
        .filter(|assignment| assignment.due_date >= today)
        .collect();

    let mut outcome = ChoreOutcome::default();
    for stale in upcoming
        .iter()
        .filter(|assignment| !chore.is_eligible(assignment.member_id))
    {
        reverse_completion(repo, stale)?;
        repo.delete_assignment(stale.id)?;
        outcome.purged += 1;
    }

    if !chore.auto_assign {
        return Ok(outcome);
    }
    outcome.removed_pending = repo.delete_pending_from(chore.id, today)?;

    let pool: Vec<Member> = members
        .iter()
        .filter(|member| chore.is_eligible(member.id))
        .cloned()
        .collect();

    let Some(horizon_end) = today.checked_add_days(Days::new(u64::from(horizon_days))) else {
        return Ok(outcome);
    };

    let mut prior = repo.latest_assignment_before(chore.id, today)?;
    let start = match (&prior, upcoming.first()) {
        (Some(last), _) => chore
            .recurrence
            .next_after(last.due_date)
            .map(|date| date.max(today)),
        (None, Some(earliest)) => Some(
            first_occurrence(config, chore, today)
                .map_or(earliest.due_date, |date| date.min(earliest.due_date)),
        ),
        (None, None) => first_occurrence(config, chore, today),
    };
    let Some(mut next) = start else {
        return Ok(outcome);
    };

    while next < horizon_end {
        if let Some(existing) = repo.assignment_on(chore.id, next)? {
            prior = Some(existing);
        } else {
            match select_member(&pool, prior.as_ref(), &mut *rng) {
                Some(member) => {
                    let assignment =
                        Assignment::pending(repo.family_id(), chore.id, member.id, next);
                    if repo.insert_assignment(&assignment)? {
                        outcome.created.push(assignment.clone());
                    }
                    prior = Some(assignment);
                }
                None => {
                    debug!(
                        "event=schedule_occurrence module=scheduler status=skip chore_id={} due_date={} reason=no_eligible_member",
                        chore.id, next
                    );
                    outcome.skipped += 1;
                }
            }
        }

        next = match chore.recurrence.next_after(next) {
            Some(date) => date,
            None => break,
        };
    }

    Ok(outcome)
}

/// First date of a chore that has never been assigned.
fn first_occurrence(config: &SchedulerConfig, chore: &Chore, today: NaiveDate) -> Option<NaiveDate> {
    let interval_days = chore.recurrence.interval_days();
    let offset = if interval_days > DELAYED_START_THRESHOLD_DAYS {
        interval_days.div_ceil(2)
    } else {
        config.first_occurrence_offset_days
    };
    today.checked_add_days(Days::new(u64::from(offset)))
}

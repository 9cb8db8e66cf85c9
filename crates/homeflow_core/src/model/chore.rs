//! Chore record and recurrence rules.
//!
//! # Responsibility
//! - Describe how often a chore recurs and who may receive it.
//! - Convert difficulty into awarded points.
//!
//! # Invariants
//! - `difficulty` stays within `1..=10`.
//! - `recurrence.interval` is at least 1.
//! - An unrestricted chore is open to the entire family. A restricted chore
//!   only goes to its listed members, and to nobody once that list is empty.

use crate::model::member::MemberId;
use crate::model::validation::{normalize_name, validate_difficulty, ValidationError};
use crate::model::FamilyId;
use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable chore identifier.
pub type ChoreId = Uuid;

/// Points granted per difficulty level when an assignment is completed.
pub const POINTS_PER_DIFFICULTY: i64 = 10;

/// Calendar unit of a recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    #[serde(alias = "days")]
    Day,
    #[serde(alias = "weeks")]
    Week,
    #[serde(alias = "months")]
    Month,
}

impl RecurrenceUnit {
    /// Stable storage value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Parses storage or legacy plural values.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            "month" | "months" => Some(Self::Month),
            _ => None,
        }
    }

    /// Approximate day length used for horizon and start-delay math.
    pub fn approx_days(self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

/// Cadence of a recurring chore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval: u32,
    pub unit: RecurrenceUnit,
}

impl Recurrence {
    pub fn new(interval: u32, unit: RecurrenceUnit) -> Result<Self, ValidationError> {
        let recurrence = Self { interval, unit };
        recurrence.validate()?;
        Ok(recurrence)
    }

    pub fn days(interval: u32) -> Result<Self, ValidationError> {
        Self::new(interval, RecurrenceUnit::Day)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval == 0 {
            return Err(ValidationError::IntervalOutOfRange(0));
        }
        Ok(())
    }

    /// Interval expressed in days (months count as 30).
    pub fn interval_days(&self) -> u32 {
        self.interval.saturating_mul(self.unit.approx_days())
    }

    /// Next occurrence after `date`, or `None` past chrono's calendar range.
    ///
    /// Month steps keep the day of month, clamped to the target month's end.
    pub fn next_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.unit {
            RecurrenceUnit::Day => date.checked_add_days(Days::new(u64::from(self.interval))),
            RecurrenceUnit::Week => {
                date.checked_add_days(Days::new(u64::from(self.interval) * 7))
            }
            RecurrenceUnit::Month => date.checked_add_months(Months::new(self.interval)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chore {
    pub id: ChoreId,
    pub family_id: FamilyId,
    pub name: String,
    pub difficulty: u8,
    pub recurrence: Recurrence,
    pub auto_assign: bool,
    /// Members allowed to receive this chore.
    #[serde(default)]
    pub eligible_members: Vec<MemberId>,
    /// Whether `eligible_members` limits who receives the chore. Stays set
    /// when the listed members are deleted.
    #[serde(default)]
    pub restricted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Uuid>,
}

impl Chore {
    /// Creates an auto-assigned, unrestricted chore with difficulty 1.
    pub fn new(family_id: FamilyId, name: impl Into<String>, recurrence: Recurrence) -> Self {
        Self::with_id(Uuid::new_v4(), family_id, name, recurrence)
    }

    pub fn with_id(
        id: ChoreId,
        family_id: FamilyId,
        name: impl Into<String>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id,
            family_id,
            name: name.into(),
            difficulty: 1,
            recurrence,
            auto_assign: true,
            eligible_members: Vec::new(),
            restricted: false,
            remote_id: None,
        }
    }

    /// Points credited when one assignment of this chore is completed.
    pub fn points_value(&self) -> i64 {
        i64::from(self.difficulty) * POINTS_PER_DIFFICULTY
    }

    /// Whether `member_id` may receive this chore.
    pub fn is_eligible(&self, member_id: MemberId) -> bool {
        if self.restricted || !self.eligible_members.is_empty() {
            self.eligible_members.contains(&member_id)
        } else {
            true
        }
    }

    /// Replaces the eligible set; an empty set reopens the chore to everyone.
    pub fn set_eligible_members(&mut self, members: Vec<MemberId>) {
        self.restricted = !members.is_empty();
        self.eligible_members = members;
    }

    /// Checks field rules and normalizes name and eligible set in place.
    pub fn normalize(&mut self) -> Result<(), ValidationError> {
        self.name = normalize_name("chore", &self.name)?;
        validate_difficulty(i64::from(self.difficulty))?;
        self.recurrence.validate()?;
        self.eligible_members.sort();
        self.eligible_members.dedup();
        if !self.eligible_members.is_empty() {
            self.restricted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Chore, Recurrence, RecurrenceUnit};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn interval_days_scales_by_unit() {
        let weekly = Recurrence::new(2, RecurrenceUnit::Week).expect("valid recurrence");
        let monthly = Recurrence::new(1, RecurrenceUnit::Month).expect("valid recurrence");
        assert_eq!(weekly.interval_days(), 14);
        assert_eq!(monthly.interval_days(), 30);
    }

    #[test]
    fn month_step_clamps_to_month_end() {
        let monthly = Recurrence::new(1, RecurrenceUnit::Month).expect("valid recurrence");
        assert_eq!(monthly.next_after(date(2026, 1, 31)), Some(date(2026, 2, 28)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Recurrence::new(0, RecurrenceUnit::Day).is_err());
    }

    #[test]
    fn legacy_plural_units_parse() {
        assert_eq!(RecurrenceUnit::parse("weeks"), Some(RecurrenceUnit::Week));
        assert_eq!(RecurrenceUnit::parse("fortnight"), None);
    }

    #[test]
    fn empty_eligible_set_means_everyone() {
        let mut chore = Chore::new(
            Uuid::new_v4(),
            "Dishes",
            Recurrence::days(1).expect("valid recurrence"),
        );
        let member = Uuid::new_v4();
        assert!(chore.is_eligible(member));

        chore.eligible_members = vec![Uuid::new_v4()];
        assert!(!chore.is_eligible(member));
    }

    #[test]
    fn restricted_chore_without_members_has_nobody_eligible() {
        let mut chore = Chore::new(
            Uuid::new_v4(),
            "Mow lawn",
            Recurrence::days(7).expect("valid recurrence"),
        );
        chore.set_eligible_members(vec![Uuid::new_v4()]);
        assert!(chore.restricted);

        chore.eligible_members.clear();
        assert!(!chore.is_eligible(Uuid::new_v4()));

        chore.set_eligible_members(Vec::new());
        assert!(!chore.restricted);
        assert!(chore.is_eligible(Uuid::new_v4()));
    }

    #[test]
    fn points_value_scales_difficulty() {
        let mut chore = Chore::new(
            Uuid::new_v4(),
            "Vacuum",
            Recurrence::days(10).expect("valid recurrence"),
        );
        chore.difficulty = 3;
        assert_eq!(chore.points_value(), 30);
    }
}

//! Assignment record: one chore occurrence given to one member on one day.
//!
//! # Invariants
//! - At most one assignment exists per `(chore_id, due_date)`.
//! - `completed_at` and `points_awarded` are set only while completed.

use crate::model::chore::ChoreId;
use crate::model::member::MemberId;
use crate::model::validation::ValidationError;
use crate::model::FamilyId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable assignment identifier.
pub type AssignmentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub family_id: FamilyId,
    pub chore_id: ChoreId,
    pub member_id: MemberId,
    pub due_date: NaiveDate,
    pub status: AssignmentStatus,
    /// Epoch ms of completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Exact credit granted on completion; debited again on reversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Uuid>,
}

impl Assignment {
    /// Creates a pending assignment with a generated id.
    pub fn pending(
        family_id: FamilyId,
        chore_id: ChoreId,
        member_id: MemberId,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            family_id,
            chore_id,
            member_id,
            due_date,
            status: AssignmentStatus::Pending,
            completed_at: None,
            points_awarded: None,
            remote_id: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AssignmentStatus::Completed
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::{AssignmentStatus, DateRange};
    use chrono::NaiveDate;

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date");
        let end = NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date");
        assert!(DateRange::new(start, end).is_err());

        let range = DateRange::new(end, start).expect("ordered range");
        assert!(range.contains(start));
        assert!(range.contains(end));
    }

    #[test]
    fn status_roundtrips_through_storage_values() {
        for status in [AssignmentStatus::Pending, AssignmentStatus::Completed] {
            assert_eq!(AssignmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AssignmentStatus::parse("done"), None);
    }
}

//! Point history entries.

use crate::model::assignment::AssignmentId;
use crate::model::chore::ChoreId;
use crate::model::member::MemberId;
use crate::model::{now_epoch_ms, FamilyId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a member's point total changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    /// Credit for completing an assignment.
    Completion,
    /// Debit undoing an earlier completion credit.
    Reversal,
    /// Manual signed adjustment.
    Adjustment,
}

impl PointSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Reversal => "reversal",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completion" => Some(Self::Completion),
            "reversal" => Some(Self::Reversal),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEntry {
    pub id: Uuid,
    pub family_id: FamilyId,
    pub member_id: MemberId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chore_id: Option<ChoreId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    /// Signed delta applied to the member's total.
    pub points: i64,
    pub source: PointSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: i64,
}

impl PointEntry {
    pub fn new(family_id: FamilyId, member_id: MemberId, points: i64, source: PointSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            family_id,
            member_id,
            chore_id: None,
            assignment_id: None,
            points,
            source,
            reason: None,
            created_at: now_epoch_ms(),
        }
    }

    /// Attaches the chore/assignment an entry was caused by.
    pub fn for_assignment(mut self, chore_id: ChoreId, assignment_id: AssignmentId) -> Self {
        self.chore_id = Some(chore_id);
        self.assignment_id = Some(assignment_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

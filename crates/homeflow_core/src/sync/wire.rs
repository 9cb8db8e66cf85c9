//! JSON wire contracts shared by the transports and the merge engine.

use crate::model::assignment::Assignment;
use crate::model::chore::Chore;
use crate::model::member::Member;
use crate::model::points::PointEntry;
use crate::model::validation::ValidationError;
use crate::sync::change::Change;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One change as pushed to the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    pub kind: String,
    pub data: Value,
    /// Idempotency key; a replay with a known key returns the stored result.
    #[serde(rename = "changeId", default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<Uuid>,
}

impl WireChange {
    pub fn from_change(change: &Change, change_id: Option<Uuid>) -> Result<Self, ValidationError> {
        Ok(Self {
            kind: change.kind().as_str().to_string(),
            data: change.to_payload()?,
            change_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPushRequest {
    pub changes: Vec<WireChange>,
}

/// Ordered apply/fail report for a batch. Indexes refer to request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPushResponse {
    #[serde(default)]
    pub applied: Vec<AppliedItem>,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

impl BatchPushResponse {
    pub fn applied_at(&self, index: usize) -> Option<&AppliedItem> {
        self.applied.iter().find(|item| item.index == index)
    }

    pub fn failed_at(&self, index: usize) -> Option<&FailedItem> {
        self.failed.iter().find(|item| item.index == index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedItem {
    pub index: usize,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub index: usize,
    pub error: String,
    pub code: FailureCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Validation,
    NotFound,
    Internal,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }

    /// Whether replaying the same change later may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Internal)
    }
}

/// Authoritative result of one applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum AppliedRecord {
    Member {
        member: Member,
        #[serde(rename = "localId", default, skip_serializing_if = "Option::is_none")]
        local_id: Option<Uuid>,
    },
    Chore {
        chore: Chore,
        #[serde(rename = "localId", default, skip_serializing_if = "Option::is_none")]
        local_id: Option<Uuid>,
    },
    Assignment {
        assignment: Assignment,
    },
    Deleted {
        id: Uuid,
    },
}

impl AppliedRecord {
    /// Authoritative id of the affected entity.
    pub fn authoritative_id(&self) -> Uuid {
        match self {
            Self::Member { member, .. } => member.id,
            Self::Chore { chore, .. } => chore.id,
            Self::Assignment { assignment } => assignment.id,
            Self::Deleted { id } => *id,
        }
    }

    /// Client id echoed back by a create.
    pub fn local_id(&self) -> Option<Uuid> {
        match self {
            Self::Member { local_id, .. } | Self::Chore { local_id, .. } => *local_id,
            Self::Assignment { .. } | Self::Deleted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglePushResponse {
    pub data: Value,
}

/// Body of `POST /schedule/generate`; no horizon means the store default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateScheduleRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateScheduleResponse {
    #[serde(default)]
    pub message: String,
    pub count: usize,
    /// Assignments the pass created, with authoritative ids.
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

/// Full authoritative state of one family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub chores: Vec<Chore>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(rename = "pointHistory", default)]
    pub point_history: Vec<PointEntry>,
    /// Epoch ms at which the snapshot was taken.
    #[serde(default)]
    pub timestamp: i64,
}

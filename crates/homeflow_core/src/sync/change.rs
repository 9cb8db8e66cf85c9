//! Closed set of replicable mutations.
//!
//! # Responsibility
//! - Parse `{kind, data}` wire pairs into a typed [`Change`].
//! - Validate payloads before a change is queued, pushed or applied.
//! - Rewrite entity references when ids move between local and
//!   authoritative space.
//!
//! # Invariants
//! - A `Change` returned by [`Change::from_wire`] has passed
//!   [`Change::validate`].
//! - `remap_ids` only touches references, never a create's `local_id`.

use crate::model::chore::Recurrence;
use crate::model::validation::{
    normalize_avatar, normalize_name, normalize_reason, validate_difficulty, ValidationError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    CreateMember,
    UpdateMember,
    DeleteMember,
    CreateChore,
    UpdateChore,
    DeleteChore,
    ToggleAssignment,
    AdjustPoints,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateMember => "create_member",
            Self::UpdateMember => "update_member",
            Self::DeleteMember => "delete_member",
            Self::CreateChore => "create_chore",
            Self::UpdateChore => "update_chore",
            Self::DeleteChore => "delete_chore",
            Self::ToggleAssignment => "toggle_assignment",
            Self::AdjustPoints => "adjust_points",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create_member" => Some(Self::CreateMember),
            "update_member" => Some(Self::UpdateMember),
            "delete_member" => Some(Self::DeleteMember),
            "create_chore" => Some(Self::CreateChore),
            "update_chore" => Some(Self::UpdateChore),
            "delete_chore" => Some(Self::DeleteChore),
            "toggle_assignment" => Some(Self::ToggleAssignment),
            "adjust_points" => Some(Self::AdjustPoints),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    /// Client-side id echoed back so the caller can link its local row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Partial member update. Absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPatch {
    #[serde(alias = "_id")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A blank value clears the avatar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(alias = "_id")]
    pub id: Uuid,
}

fn default_auto_assign() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,
    pub name: String,
    pub difficulty: i64,
    pub recurrence: Recurrence,
    #[serde(default = "default_auto_assign")]
    pub auto_assign: bool,
    #[serde(default)]
    pub eligible_members: Vec<Uuid>,
}

/// Partial chore update. Absent fields are left unchanged; a present
/// `eligible_members` replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChorePatch {
    #[serde(alias = "_id")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_assign: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eligible_members: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub assignment_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_override: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointAdjustment {
    pub member_id: Uuid,
    pub points: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One replicable mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    CreateMember(NewMember),
    UpdateMember(MemberPatch),
    DeleteMember(EntityRef),
    CreateChore(NewChore),
    UpdateChore(ChorePatch),
    DeleteChore(EntityRef),
    ToggleAssignment(ToggleRequest),
    AdjustPoints(PointAdjustment),
}

impl Change {
    /// Parses and validates a wire `{kind, data}` pair.
    pub fn from_wire(kind: &str, data: Value) -> Result<Self, ValidationError> {
        let kind = ChangeKind::parse(kind)
            .ok_or_else(|| ValidationError::UnknownChangeKind(kind.to_string()))?;

        let change = match kind {
            ChangeKind::CreateMember => Self::CreateMember(decode(kind, data)?),
            ChangeKind::UpdateMember => Self::UpdateMember(decode(kind, data)?),
            ChangeKind::DeleteMember => Self::DeleteMember(decode(kind, data)?),
            ChangeKind::CreateChore => Self::CreateChore(decode(kind, data)?),
            ChangeKind::UpdateChore => Self::UpdateChore(decode(kind, data)?),
            ChangeKind::DeleteChore => Self::DeleteChore(decode(kind, data)?),
            ChangeKind::ToggleAssignment => Self::ToggleAssignment(decode(kind, data)?),
            ChangeKind::AdjustPoints => Self::AdjustPoints(decode(kind, data)?),
        };

        change.validate()?;
        Ok(change)
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::CreateMember(_) => ChangeKind::CreateMember,
            Self::UpdateMember(_) => ChangeKind::UpdateMember,
            Self::DeleteMember(_) => ChangeKind::DeleteMember,
            Self::CreateChore(_) => ChangeKind::CreateChore,
            Self::UpdateChore(_) => ChangeKind::UpdateChore,
            Self::DeleteChore(_) => ChangeKind::DeleteChore,
            Self::ToggleAssignment(_) => ChangeKind::ToggleAssignment,
            Self::AdjustPoints(_) => ChangeKind::AdjustPoints,
        }
    }

    /// Serializes the kind-specific payload (`data` on the wire).
    pub fn to_payload(&self) -> Result<Value, ValidationError> {
        let encoded = match self {
            Self::CreateMember(payload) => serde_json::to_value(payload),
            Self::UpdateMember(payload) => serde_json::to_value(payload),
            Self::DeleteMember(payload) | Self::DeleteChore(payload) => {
                serde_json::to_value(payload)
            }
            Self::CreateChore(payload) => serde_json::to_value(payload),
            Self::UpdateChore(payload) => serde_json::to_value(payload),
            Self::ToggleAssignment(payload) => serde_json::to_value(payload),
            Self::AdjustPoints(payload) => serde_json::to_value(payload),
        };

        encoded.map_err(|err| ValidationError::MalformedPayload {
            kind: self.kind().as_str(),
            message: err.to_string(),
        })
    }

    /// Checks every field rule of the payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::CreateMember(payload) => {
                normalize_name("member", &payload.name)?;
                normalize_avatar(payload.avatar.as_deref())?;
            }
            Self::UpdateMember(payload) => {
                if let Some(name) = &payload.name {
                    normalize_name("member", name)?;
                }
                normalize_avatar(payload.avatar.as_deref())?;
            }
            Self::CreateChore(payload) => {
                normalize_name("chore", &payload.name)?;
                validate_difficulty(payload.difficulty)?;
                payload.recurrence.validate()?;
            }
            Self::UpdateChore(payload) => {
                if let Some(name) = &payload.name {
                    normalize_name("chore", name)?;
                }
                if let Some(difficulty) = payload.difficulty {
                    validate_difficulty(difficulty)?;
                }
                if let Some(recurrence) = &payload.recurrence {
                    recurrence.validate()?;
                }
            }
            Self::AdjustPoints(payload) => {
                normalize_reason(payload.reason.as_deref())?;
            }
            Self::DeleteMember(_) | Self::DeleteChore(_) | Self::ToggleAssignment(_) => {}
        }
        Ok(())
    }

    /// Rewrites every entity reference through `map`.
    pub fn remap_ids(self, map: impl Fn(Uuid) -> Uuid) -> Self {
        match self {
            Self::CreateMember(payload) => Self::CreateMember(payload),
            Self::UpdateMember(mut payload) => {
                payload.id = map(payload.id);
                Self::UpdateMember(payload)
            }
            Self::DeleteMember(payload) => Self::DeleteMember(EntityRef {
                id: map(payload.id),
            }),
            Self::CreateChore(mut payload) => {
                payload.eligible_members = payload.eligible_members.into_iter().map(&map).collect();
                Self::CreateChore(payload)
            }
            Self::UpdateChore(mut payload) => {
                payload.id = map(payload.id);
                payload.eligible_members = payload
                    .eligible_members
                    .map(|members| members.into_iter().map(&map).collect());
                Self::UpdateChore(payload)
            }
            Self::DeleteChore(payload) => Self::DeleteChore(EntityRef {
                id: map(payload.id),
            }),
            Self::ToggleAssignment(mut payload) => {
                payload.assignment_id = map(payload.assignment_id);
                payload.member_override = payload.member_override.map(&map);
                Self::ToggleAssignment(payload)
            }
            Self::AdjustPoints(mut payload) => {
                payload.member_id = map(payload.member_id);
                Self::AdjustPoints(payload)
            }
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ChangeKind, data: Value) -> Result<T, ValidationError> {
    serde_json::from_value(data).map_err(|err| ValidationError::MalformedPayload {
        kind: kind.as_str(),
        message: err.to_string(),
    })
}

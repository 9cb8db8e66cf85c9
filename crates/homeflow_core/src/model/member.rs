//! Family member record.
//!
//! # Invariants
//! - `total_points` is derived; only completion toggles, point adjustments and
//!   the repair pass mutate it.
//! - `name` is stored trimmed.

use crate::model::validation::{normalize_avatar, normalize_name, ValidationError};
use crate::model::FamilyId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable member identifier.
pub type MemberId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub family_id: FamilyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub total_points: i64,
    /// Authoritative id this local row is linked to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<Uuid>,
}

impl Member {
    /// Creates a member with a generated id and zero points.
    pub fn new(family_id: FamilyId, name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), family_id, name)
    }

    /// Creates a member with a caller-provided id.
    ///
    /// Used by sync paths where identity already exists elsewhere.
    pub fn with_id(id: MemberId, family_id: FamilyId, name: impl Into<String>) -> Self {
        Self {
            id,
            family_id,
            name: name.into(),
            avatar: None,
            total_points: 0,
            remote_id: None,
        }
    }

    /// Checks name/avatar rules and normalizes them in place.
    pub fn normalize(&mut self) -> Result<(), ValidationError> {
        self.name = normalize_name("member", &self.name)?;
        self.avatar = normalize_avatar(self.avatar.as_deref())?;
        Ok(())
    }

    /// Whether this row is correlated with an authoritative record.
    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some()
    }
}

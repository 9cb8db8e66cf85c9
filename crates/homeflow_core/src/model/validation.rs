//! Payload validation rules and the shared validation error.

use chrono::NaiveDate;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Maximum characters for member and chore names.
pub const NAME_MAX_CHARS: usize = 100;
/// Maximum characters for avatar references.
pub const AVATAR_MAX_CHARS: usize = 200;
/// Maximum characters for point adjustment reasons.
pub const REASON_MAX_CHARS: usize = 200;

/// Malformed input rejected before it is queued, applied or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BlankName {
        entity: &'static str,
    },
    NameTooLong {
        entity: &'static str,
        max_chars: usize,
    },
    AvatarTooLong {
        max_chars: usize,
    },
    ReasonTooLong {
        max_chars: usize,
    },
    DifficultyOutOfRange(i64),
    IntervalOutOfRange(i64),
    UnknownRecurrenceUnit(String),
    InvalidDateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    UnknownChangeKind(String),
    MalformedPayload {
        kind: &'static str,
        message: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName { entity } => write!(f, "{entity} name must not be blank"),
            Self::NameTooLong { entity, max_chars } => {
                write!(f, "{entity} name exceeds {max_chars} characters")
            }
            Self::AvatarTooLong { max_chars } => {
                write!(f, "avatar reference exceeds {max_chars} characters")
            }
            Self::ReasonTooLong { max_chars } => {
                write!(f, "reason exceeds {max_chars} characters")
            }
            Self::DifficultyOutOfRange(value) => {
                write!(f, "difficulty {value} is outside 1..=10")
            }
            Self::IntervalOutOfRange(value) => {
                write!(f, "recurrence interval {value} must be at least 1")
            }
            Self::UnknownRecurrenceUnit(value) => {
                write!(f, "unknown recurrence unit `{value}`")
            }
            Self::InvalidDateRange { start, end } => {
                write!(f, "date range start {start} is after end {end}")
            }
            Self::UnknownChangeKind(value) => write!(f, "unknown change kind `{value}`"),
            Self::MalformedPayload { kind, message } => {
                write!(f, "malformed `{kind}` payload: {message}")
            }
        }
    }
}

impl Error for ValidationError {}

/// Trims a display name and enforces the non-blank and length rules.
pub fn normalize_name(entity: &'static str, name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankName { entity });
    }
    if trimmed.chars().count() > NAME_MAX_CHARS {
        return Err(ValidationError::NameTooLong {
            entity,
            max_chars: NAME_MAX_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Normalizes an optional avatar: blank becomes `None`.
pub fn normalize_avatar(avatar: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(value) = avatar.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > AVATAR_MAX_CHARS {
        return Err(ValidationError::AvatarTooLong {
            max_chars: AVATAR_MAX_CHARS,
        });
    }
    Ok(Some(value.to_string()))
}

/// Normalizes an optional adjustment reason: blank becomes `None`.
pub fn normalize_reason(reason: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(value) = reason.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > REASON_MAX_CHARS {
        return Err(ValidationError::ReasonTooLong {
            max_chars: REASON_MAX_CHARS,
        });
    }
    Ok(Some(value.to_string()))
}

/// Validates chore difficulty and narrows it to storage width.
pub fn validate_difficulty(value: i64) -> Result<u8, ValidationError> {
    if (1..=10).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ValidationError::DifficultyOutOfRange(value))
    }
}

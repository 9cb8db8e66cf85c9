//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into scheduling, completion and merge
//!   use cases.
//! - Keep transport and client layers decoupled from storage details.
//!
//! # Invariants
//! - Services mutating a family run under that family's single-writer lock
//!   or inside one repository atomic unit.

pub mod assignment_service;
pub mod family_lock;
pub mod merge_engine;
pub mod rotation;
pub mod scheduler_service;

use crate::model::validation::ValidationError;
use crate::repo::RepoError;
use crate::sync::wire::FailureCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for apply and toggle use cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Payload failed validation.
    Validation(ValidationError),
    /// Target does not exist in the caller's family scope.
    NotFound { entity: &'static str, id: Uuid },
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl ServiceError {
    /// Wire code reported for this failure.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            Self::Validation(_) => FailureCode::Validation,
            Self::NotFound { .. } => FailureCode::NotFound,
            Self::Repo(_) | Self::InconsistentState(_) => FailureCode::Internal,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent state: {details}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

//! Remote transport and credential contracts.
//!
//! # Responsibility
//! - Describe the authoritative-store operations the sync engine consumes.
//! - Classify failures so callers know whether to queue, purge or give up.
//!
//! # Invariants
//! - Implementations never panic on network failure; every failure maps to
//!   a [`TransportError`].

use crate::model::assignment::{Assignment, DateRange};
use crate::sync::wire::{
    BatchPushRequest, BatchPushResponse, FailureCode, GenerateScheduleRequest,
    GenerateScheduleResponse, Snapshot, WireChange,
};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Credential missing, expired or rejected.
    Unauthorized(String),
    /// Connectivity or server-side failure worth retrying later.
    Transient(String),
    /// The store processed the request and refused it permanently.
    Rejected { code: FailureCode, message: String },
    /// Response could not be understood.
    Protocol(String),
}

impl TransportError {
    /// Whether the request may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized(message) => write!(f, "unauthorized: {message}"),
            Self::Transient(message) => write!(f, "transient transport failure: {message}"),
            Self::Rejected { code, message } => {
                write!(f, "rejected ({}): {message}", code.as_str())
            }
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
        }
    }
}

impl Error for TransportError {}

/// Authoritative store as seen from a client.
pub trait RemoteTransport: Send + Sync {
    /// Cheap reachability check with a bounded timeout.
    fn probe(&self) -> bool;
    /// Immediate single-change push. Returns the applied record.
    fn push_change(&self, change: &WireChange) -> TransportResult<Value>;
    fn push_batch(&self, request: &BatchPushRequest) -> TransportResult<BatchPushResponse>;
    fn pull_snapshot(&self) -> TransportResult<Snapshot>;
    /// Authoritative assignments due within the inclusive range.
    fn fetch_assignments(&self, range: &DateRange) -> TransportResult<Vec<Assignment>>;
    /// Asks the store to run a generation pass over every chore.
    fn generate_schedule(
        &self,
        request: &GenerateScheduleRequest,
    ) -> TransportResult<GenerateScheduleResponse>;
}

/// Holder of the opaque bearer token.
pub trait CredentialStore: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
    fn store(&self, token: String);
    /// Forgets the token after the store rejected it.
    fn purge(&self);
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn bearer_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, token: String) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn purge(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

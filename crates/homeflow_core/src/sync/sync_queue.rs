//! Ordered durable log of locally-originated changes.
//!
//! # Responsibility
//! - Append validated changes in arrival order.
//! - Turn a batch push response into an acknowledged-prefix truncation.
//!
//! # Invariants
//! - Entries leave the queue only through prefix truncation.
//! - The acknowledged prefix stops at the first entry that was not applied
//!   and did not fail permanently.

use crate::repo::{DeadLetter, QueuedChange, RepoError, RepoResult, SyncQueueRepository};
use crate::sync::change::Change;
use crate::sync::wire::BatchPushResponse;
use log::{info, warn};
use uuid::Uuid;

/// Outcome of acknowledging one pushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckSummary {
    /// Entries removed from the queue, dead letters included.
    pub acknowledged: usize,
    /// Entries removed because the store rejected them permanently.
    pub dead_lettered: usize,
}

/// Number of leading batch entries the response settles for good.
///
/// An entry is settled when it was applied or failed with a non-retryable
/// code. The first entry missing from the response or failed with a
/// retryable code ends the prefix.
pub fn acknowledged_prefix(batch_len: usize, response: &BatchPushResponse) -> usize {
    (0..batch_len)
        .take_while(|index| {
            response.applied_at(*index).is_some()
                || response
                    .failed_at(*index)
                    .is_some_and(|failed| !failed.code.is_retryable())
        })
        .count()
}

pub struct SyncQueue<Q: SyncQueueRepository> {
    repo: Q,
}

impl<Q: SyncQueueRepository> SyncQueue<Q> {
    pub fn new(repo: Q) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Q {
        &self.repo
    }

    /// Appends a change under its idempotency key; returns its sequence
    /// number.
    pub fn enqueue(&self, change_id: Uuid, change: &Change) -> RepoResult<i64> {
        let payload = change.to_payload().map_err(RepoError::Validation)?;
        let seq = self.repo.append(change_id, change.kind().as_str(), &payload)?;
        info!(
            "event=queue_append module=sync status=ok seq={} kind={} change_id={}",
            seq,
            change.kind().as_str(),
            change_id
        );
        Ok(seq)
    }

    pub fn peek(&self, limit: usize) -> RepoResult<Vec<QueuedChange>> {
        self.repo.peek(limit)
    }

    pub fn len(&self) -> RepoResult<usize> {
        self.repo.len()
    }

    pub fn is_empty(&self) -> RepoResult<bool> {
        Ok(self.repo.len()? == 0)
    }

    /// Truncates the acknowledged prefix of `batch`, moving permanently
    /// rejected entries to the dead-letter table.
    pub fn acknowledge(
        &self,
        batch: &[QueuedChange],
        response: &BatchPushResponse,
    ) -> RepoResult<AckSummary> {
        let prefix = acknowledged_prefix(batch.len(), response);
        let Some(last) = prefix.checked_sub(1).and_then(|index| batch.get(index)) else {
            return Ok(AckSummary::default());
        };

        let rejected: Vec<(i64, String, String)> = batch[..prefix]
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                response.failed_at(index).map(|failed| {
                    warn!(
                        "event=queue_dead_letter module=sync status=error seq={} kind={} error_code={}",
                        entry.seq,
                        entry.kind,
                        failed.code.as_str()
                    );
                    (
                        entry.seq,
                        failed.code.as_str().to_string(),
                        failed.error.clone(),
                    )
                })
            })
            .collect();

        let acknowledged = self.repo.truncate_prefix(last.seq, &rejected)?;
        info!(
            "event=queue_ack module=sync status=ok through_seq={} acknowledged={} dead_lettered={}",
            last.seq,
            acknowledged,
            rejected.len()
        );

        Ok(AckSummary {
            acknowledged,
            dead_lettered: rejected.len(),
        })
    }

    pub fn dead_letters(&self) -> RepoResult<Vec<DeadLetter>> {
        self.repo.dead_letters()
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gasflow_core::ItemId;
use gasflow_transfers::TransferStatus;

/// A line that could not be applied to the ledger, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFailure {
    pub item_id: ItemId,
    pub reason: String,
}

impl LineFailure {
    pub fn new(item_id: ItemId, reason: impl Into<String>) -> Self {
        Self {
            item_id,
            reason: reason.into(),
        }
    }
}

/// Storage operation error.
///
/// These are **infrastructure errors** (persistence, guarded writes that lost
/// a race) as opposed to domain errors (validation, invariants).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The guarded status no longer matches (another request got there first).
    #[error("status changed concurrently: expected {expected}, found {actual}")]
    StatusChanged {
        expected: TransferStatus,
        actual: TransferStatus,
    },

    #[error("optimistic concurrency check failed: {0}")]
    VersionConflict(String),

    /// One or more conditional ledger writes matched no row; nothing was applied.
    #[error("insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<LineFailure>),

    /// The backend aborted the transaction (deadlock, serialization
    /// failure); nothing was applied and the request may be retried.
    #[error("transaction aborted, retry: {0}")]
    Retryable(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),
}

//! Transfer persistence port.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use gasflow_core::{ExpectedVersion, LocationId, TransferId};
use gasflow_inventory::Location;
use gasflow_transfers::{Transfer, TransferStatus};

use crate::error::StoreError;

/// Ledger side effect that must commit together with a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Hold every line's full units at the source.
    Reserve { source: Location },
    /// Give back a hold taken by `Reserve`.
    Release { source: Location },
    /// Debit the source and credit the destination for every line.
    Execute {
        source: Location,
        destination: Location,
        consume_reservation: bool,
    },
}

/// A status change ready to be committed.
///
/// `transfer` is the record *after* the transition. The write only applies
/// when the stored row is still at `expected_status` and `expected_version`,
/// and only together with `effect`; otherwise nothing changes.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub transfer: Transfer,
    pub expected_status: TransferStatus,
    pub expected_version: ExpectedVersion,
    pub effect: StockEffect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    pub status: Option<TransferStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl TransferFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.source_location_id.is_none_or(|id| transfer.source_location_id == id)
            && self
                .destination_location_id
                .is_none_or(|id| transfer.destination_location_id == id)
            && self.status.is_none_or(|s| transfer.status == s)
            && self.date_from.is_none_or(|d| transfer.transfer_date >= d)
            && self.date_to.is_none_or(|d| transfer.transfer_date <= d)
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn insert(&self, transfer: &Transfer) -> Result<(), StoreError>;

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError>;

    /// Transfers at `source` on `date` in `pending`, `approved` or `in_transit`.
    async fn open_at_source(&self, source: LocationId, date: NaiveDate) -> Result<Vec<Transfer>, StoreError>;

    /// Persist replaced lines and recomputed totals under a version check.
    async fn save_lines(&self, transfer: &Transfer, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Atomically apply a status change and its stock effect.
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<(), StoreError>;
}

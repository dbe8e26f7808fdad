//! Stock ledger port.
//!
//! Reads are open to everyone; the only writes are stock receipts, and the
//! reservation and move effects applied inside
//! `TransferRepository::commit_transition` through the executor.

pub mod executor;

use async_trait::async_trait;
use serde::Serialize;

use gasflow_core::ItemId;
use gasflow_inventory::{StockBalance, StockFilter, StockLocation};

use crate::error::StoreError;

pub use executor::{MoveOutcome, StockMove};

/// Result of a single-statement availability read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityCheck {
    /// The balance row as read, if the item has a record at the location.
    pub balance: Option<StockBalance>,
    /// Whether the row covered the requested full and empty quantities at the
    /// instant it was read.
    pub sufficient: bool,
}

#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn balance(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
    ) -> Result<Option<StockBalance>, StoreError>;

    async fn balances(
        &self,
        location: &dyn StockLocation,
        filter: &StockFilter,
    ) -> Result<Vec<StockBalance>, StoreError>;

    /// Read one balance and compare it against the request as one indivisible
    /// read.
    async fn check_availability(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<AvailabilityCheck, StoreError>;

    /// Credit a location (goods receipt).
    async fn receive_stock(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<StockBalance, StoreError>;
}

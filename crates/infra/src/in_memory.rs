//! In-memory adapter for tests/dev.
//!
//! One lock guards catalog, ledgers and transfers together, which is what
//! makes a status change and its stock effect indivisible here. Warehouse and
//! vehicle balances live in separate collections, selected through the
//! `StockLocation` of the side being written.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use gasflow_core::{ExpectedVersion, ItemId, LocationId, TransferId};
use gasflow_inventory::{ItemSpec, Location, LocationKind, StockBalance, StockFilter, StockLocation};
use gasflow_transfers::{Transfer, TransferStatus};

use crate::catalog::Catalog;
use crate::error::StoreError;
use crate::ledger::executor::{MoveTarget, StockMove, apply_effect};
use crate::ledger::{AvailabilityCheck, StockLedger};
use crate::transfer_store::{TransferFilter, TransferRepository, TransitionCommit};

type Ledger = HashMap<(LocationId, ItemId), StockBalance>;

#[derive(Debug, Default)]
struct State {
    locations: HashMap<LocationId, Location>,
    items: HashMap<ItemId, ItemSpec>,
    warehouse_stock: Ledger,
    vehicle_stock: Ledger,
    transfers: HashMap<TransferId, Transfer>,
}

impl State {
    fn ledger(&self, kind: LocationKind) -> &Ledger {
        match kind {
            LocationKind::Warehouse => &self.warehouse_stock,
            LocationKind::Vehicle => &self.vehicle_stock,
        }
    }

    fn ledger_mut(&mut self, kind: LocationKind) -> &mut Ledger {
        match kind {
            LocationKind::Warehouse => &mut self.warehouse_stock,
            LocationKind::Vehicle => &mut self.vehicle_stock,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register (or replace) a location record.
    pub async fn upsert_location(&self, location: impl Into<Location>) {
        let location = location.into();
        self.state.write().await.locations.insert(location.id(), location);
    }

    /// Register (or replace) an item record.
    pub async fn upsert_item(&self, item: ItemSpec) {
        self.state.write().await.items.insert(item.id, item);
    }
}

/// Copy-on-write view of the ledgers used while applying one batch.
///
/// Nothing reaches `State` unless the whole batch succeeds.
struct StagedLedger<'a> {
    state: &'a State,
    staged: HashMap<(LocationKind, LocationId, ItemId), StockBalance>,
    at: DateTime<Utc>,
}

impl<'a> StagedLedger<'a> {
    fn new(state: &'a State, at: DateTime<Utc>) -> Self {
        Self {
            state,
            staged: HashMap::new(),
            at,
        }
    }

    fn current(&self, location: &dyn StockLocation, item_id: ItemId) -> Option<StockBalance> {
        let key = (location.kind(), location.id(), item_id);
        self.staged
            .get(&key)
            .or_else(|| self.state.ledger(location.kind()).get(&(location.id(), item_id)))
            .cloned()
    }

    fn stage(&mut self, location: &dyn StockLocation, mut balance: StockBalance) {
        balance.updated_at = Some(self.at);
        self.staged
            .insert((location.kind(), location.id(), balance.item_id), balance);
    }

    fn into_staged(self) -> HashMap<(LocationKind, LocationId, ItemId), StockBalance> {
        self.staged
    }
}

#[async_trait]
impl MoveTarget for StagedLedger<'_> {
    async fn debit_if_available(
        &mut self,
        source: &dyn StockLocation,
        mv: &StockMove,
        consume_reservation: bool,
    ) -> Result<bool, StoreError> {
        let Some(balance) = self.current(source, mv.item_id) else {
            return Ok(false);
        };
        match balance.debit(mv.quantity_full, mv.quantity_empty, consume_reservation) {
            Ok(next) => {
                self.stage(source, next);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn credit(&mut self, destination: &dyn StockLocation, mv: &StockMove) -> Result<(), StoreError> {
        let balance = self
            .current(destination, mv.item_id)
            .unwrap_or_else(|| StockBalance::empty(destination.id(), mv.item_id));
        let next = balance
            .credit(mv.quantity_full, mv.quantity_empty)
            .map_err(|e| StoreError::Database(format!("rejected credit: {e}")))?;
        self.stage(destination, next);
        Ok(())
    }

    async fn reserve_if_available(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError> {
        let Some(balance) = self.current(source, item_id) else {
            return Ok(false);
        };
        match balance.reserve(quantity) {
            Ok(next) => {
                self.stage(source, next);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn release_if_held(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError> {
        let Some(balance) = self.current(source, item_id) else {
            return Ok(false);
        };
        match balance.release(quantity) {
            Ok(next) => {
                self.stage(source, next);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        Ok(self.state.read().await.locations.get(&id).cloned())
    }

    async fn item(&self, id: ItemId) -> Result<Option<ItemSpec>, StoreError> {
        Ok(self.state.read().await.items.get(&id).cloned())
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn balance(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
    ) -> Result<Option<StockBalance>, StoreError> {
        let state = self.state.read().await;
        Ok(state.ledger(location.kind()).get(&(location.id(), item_id)).cloned())
    }

    async fn balances(
        &self,
        location: &dyn StockLocation,
        filter: &StockFilter,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .ledger(location.kind())
            .iter()
            .filter(|((loc, _), _)| *loc == location.id())
            .map(|(_, b)| b.clone());
        Ok(filter.apply(rows))
    }

    async fn check_availability(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<AvailabilityCheck, StoreError> {
        let state = self.state.read().await;
        let balance = state.ledger(location.kind()).get(&(location.id(), item_id)).cloned();
        let sufficient = balance.as_ref().is_some_and(|b| {
            b.available_for_transfer() >= quantity_full && b.quantity_empty >= quantity_empty
        });
        Ok(AvailabilityCheck { balance, sufficient })
    }

    async fn receive_stock(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<StockBalance, StoreError> {
        let mut state = self.state.write().await;
        let ledger = state.ledger_mut(location.kind());
        let current = ledger
            .get(&(location.id(), item_id))
            .cloned()
            .unwrap_or_else(|| StockBalance::empty(location.id(), item_id));
        let mut next = current
            .credit(quantity_full, quantity_empty)
            .map_err(|e| StoreError::Database(format!("rejected stock receipt: {e}")))?;
        next.updated_at = Some(Utc::now());
        ledger.insert((location.id(), item_id), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl TransferRepository for InMemoryStore {
    async fn insert(&self, transfer: &Transfer) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.transfers.contains_key(&transfer.id) {
            return Err(StoreError::Duplicate(format!("transfer {}", transfer.id)));
        }
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(self.state.read().await.transfers.get(&id).cloned())
    }

    async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<Transfer> = state
            .transfers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn open_at_source(&self, source: LocationId, date: NaiveDate) -> Result<Vec<Transfer>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .filter(|t| t.source_location_id == source && t.transfer_date == date && t.status.is_open())
            .cloned()
            .collect())
    }

    async fn save_lines(&self, transfer: &Transfer, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .transfers
            .get_mut(&transfer.id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {}", transfer.id)))?;
        if !expected.matches(stored.version) {
            return Err(StoreError::VersionConflict(format!(
                "transfer {} is at version {}, expected {:?}",
                transfer.id, stored.version, expected
            )));
        }
        if !matches!(stored.status, TransferStatus::Draft | TransferStatus::Pending) {
            return Err(StoreError::StatusChanged {
                expected: transfer.status,
                actual: stored.status,
            });
        }
        *stored = transfer.clone();
        Ok(())
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let id = commit.transfer.id;

        let stored = state
            .transfers
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;
        if stored.status != commit.expected_status {
            return Err(StoreError::StatusChanged {
                expected: commit.expected_status,
                actual: stored.status,
            });
        }
        if !commit.expected_version.matches(stored.version) {
            return Err(StoreError::VersionConflict(format!(
                "transfer {id} is at version {}, expected {:?}",
                stored.version, commit.expected_version
            )));
        }

        let staged = {
            let mut staging = StagedLedger::new(&state, commit.transfer.updated_at);
            apply_effect(&mut staging, &commit.transfer, &commit.effect).await?;
            staging.into_staged()
        };

        for ((kind, location_id, item_id), balance) in staged {
            state.ledger_mut(kind).insert((location_id, item_id), balance);
        }
        state.transfers.insert(id, commit.transfer.clone());
        Ok(())
    }
}

//! Atomic stock-move executor.
//!
//! Every ledger write the transfer engine makes goes through here. Each write
//! is a guarded, conditional mutation (`debit only if available >= n`) that
//! reports success as "a row matched", never a read followed by a write.
//! Backends supply the guarded primitives through [`MoveTarget`] and run the
//! whole batch inside their own transaction; any failed line aborts the batch.
//!
//! Before any guarded write, every balance row the batch touches is locked in
//! one global order (location kind, location id, item id). Two batches moving
//! stock in opposite directions between the same locations therefore queue on
//! their first shared row instead of deadlocking.

use async_trait::async_trait;
use serde::Serialize;

use gasflow_core::{ItemId, LocationId};
use gasflow_inventory::{LocationKind, StockLocation};
use gasflow_transfers::Transfer;

use crate::error::{LineFailure, StoreError};
use crate::transfer_store::StockEffect;

/// Quantities one transfer line moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockMove {
    pub item_id: ItemId,
    pub quantity_full: i64,
    pub quantity_empty: i64,
}

impl StockMove {
    pub fn new(item_id: ItemId, quantity_full: i64, quantity_empty: i64) -> Self {
        Self {
            item_id,
            quantity_full,
            quantity_empty,
        }
    }
}

/// Per-line result of [`execute_move`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub item_id: ItemId,
    pub success: bool,
    pub error: Option<String>,
}

impl MoveOutcome {
    fn succeeded(item_id: ItemId) -> Self {
        Self {
            item_id,
            success: true,
            error: None,
        }
    }

    fn failed(item_id: ItemId, error: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Identity of one balance row; its ordering is the global lock order.
pub type LedgerRow = (LocationKind, LocationId, ItemId);

/// Guarded ledger primitives, executed inside the caller's transaction.
///
/// Each `*_if_*` method returns `Ok(false)` when its guard does not hold and
/// must leave the ledger untouched in that case.
#[async_trait]
pub trait MoveTarget: Send {
    /// Lock (creating when missing) the given rows, in the order given.
    ///
    /// Backends that serialize whole batches some other way keep the default.
    async fn lock_rows(&mut self, _rows: &[LedgerRow]) -> Result<(), StoreError> {
        Ok(())
    }

    /// Remove full and empty units from `source`.
    ///
    /// With `consume_reservation`, full units come out of the reservation
    /// (`quantity_reserved >= full`); otherwise they must be unreserved
    /// (`quantity_full - quantity_reserved >= full`).
    async fn debit_if_available(
        &mut self,
        source: &dyn StockLocation,
        mv: &StockMove,
        consume_reservation: bool,
    ) -> Result<bool, StoreError>;

    /// Add units to `destination`, creating the balance row if needed.
    async fn credit(&mut self, destination: &dyn StockLocation, mv: &StockMove) -> Result<(), StoreError>;

    async fn reserve_if_available(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError>;

    async fn release_if_held(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError>;
}

/// Moves for every line of `transfer`, ordered by item id.
///
/// This only fixes the order of writes within one location; the lock order
/// across locations comes from [`rows_for`].
pub fn moves_for(transfer: &Transfer) -> Vec<StockMove> {
    let mut moves: Vec<StockMove> = transfer
        .lines
        .iter()
        .map(|l| StockMove::new(l.item_id, l.quantity_full, l.quantity_empty))
        .collect();
    moves.sort_by_key(|m| m.item_id);
    moves
}

/// Every balance row `effect` will write, sorted and deduplicated.
pub fn rows_for(transfer: &Transfer, effect: &StockEffect) -> Vec<LedgerRow> {
    fn row(location: &dyn StockLocation, item_id: ItemId) -> LedgerRow {
        (location.kind(), location.id(), item_id)
    }

    let mut rows: Vec<LedgerRow> = match effect {
        StockEffect::None => Vec::new(),
        StockEffect::Reserve { source } | StockEffect::Release { source } => transfer
            .lines
            .iter()
            .filter(|l| l.quantity_full > 0)
            .map(|l| row(source, l.item_id))
            .collect(),
        StockEffect::Execute {
            source, destination, ..
        } => transfer
            .lines
            .iter()
            .flat_map(|l| [row(source, l.item_id), row(destination, l.item_id)])
            .collect(),
    };
    rows.sort();
    rows.dedup();
    rows
}

/// Debit `source` and credit `destination` for one line.
///
/// The credit only happens after the guarded debit matched, so a failed
/// debit never leaves a partial credit behind.
pub async fn execute_move<T: MoveTarget + ?Sized>(
    target: &mut T,
    source: &dyn StockLocation,
    destination: &dyn StockLocation,
    mv: &StockMove,
    consume_reservation: bool,
) -> Result<MoveOutcome, StoreError> {
    if !target.debit_if_available(source, mv, consume_reservation).await? {
        return Ok(MoveOutcome::failed(
            mv.item_id,
            format!(
                "insufficient stock at {} when executing: needed {} full / {} empty",
                source.code(),
                mv.quantity_full,
                mv.quantity_empty
            ),
        ));
    }
    target.credit(destination, mv).await?;
    Ok(MoveOutcome::succeeded(mv.item_id))
}

/// Apply the stock side of a status transition.
///
/// Every line is attempted so the caller learns about all failing items; on
/// any failure the result is `InsufficientStock` and the caller must roll
/// back its transaction.
pub async fn apply_effect<T: MoveTarget + ?Sized>(
    target: &mut T,
    transfer: &Transfer,
    effect: &StockEffect,
) -> Result<(), StoreError> {
    let rows = rows_for(transfer, effect);
    if !rows.is_empty() {
        target.lock_rows(&rows).await?;
    }

    let moves = moves_for(transfer);
    let mut failures = Vec::new();

    match effect {
        StockEffect::None => {}
        StockEffect::Reserve { source } => {
            for mv in moves.iter().filter(|m| m.quantity_full > 0) {
                if !target.reserve_if_available(source, mv.item_id, mv.quantity_full).await? {
                    failures.push(LineFailure::new(
                        mv.item_id,
                        format!("cannot reserve {} full units at {}", mv.quantity_full, source.code()),
                    ));
                }
            }
        }
        StockEffect::Release { source } => {
            for mv in moves.iter().filter(|m| m.quantity_full > 0) {
                if !target.release_if_held(source, mv.item_id, mv.quantity_full).await? {
                    failures.push(LineFailure::new(
                        mv.item_id,
                        format!("reservation of {} full units not held at {}", mv.quantity_full, source.code()),
                    ));
                }
            }
        }
        StockEffect::Execute {
            source,
            destination,
            consume_reservation,
        } => {
            for mv in &moves {
                let outcome = execute_move(target, source, destination, mv, *consume_reservation).await?;
                if let Some(error) = outcome.error {
                    failures.push(LineFailure::new(outcome.item_id, error));
                }
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StoreError::InsufficientStock(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use gasflow_core::{TransferId, UserId};
    use gasflow_inventory::{Location, Warehouse};
    use gasflow_transfers::{LineItem, TransferDraft, TransferLine, TransferPriority, TransferStatus};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Write {
        Lock(Vec<LedgerRow>),
        Debit(LedgerRow),
        Credit(LedgerRow),
    }

    #[derive(Default)]
    struct Recorder {
        writes: Vec<Write>,
        short: Option<ItemId>,
    }

    #[async_trait]
    impl MoveTarget for Recorder {
        async fn lock_rows(&mut self, rows: &[LedgerRow]) -> Result<(), StoreError> {
            self.writes.push(Write::Lock(rows.to_vec()));
            Ok(())
        }

        async fn debit_if_available(
            &mut self,
            source: &dyn StockLocation,
            mv: &StockMove,
            _consume_reservation: bool,
        ) -> Result<bool, StoreError> {
            if self.short == Some(mv.item_id) {
                return Ok(false);
            }
            self.writes.push(Write::Debit((source.kind(), source.id(), mv.item_id)));
            Ok(true)
        }

        async fn credit(&mut self, destination: &dyn StockLocation, mv: &StockMove) -> Result<(), StoreError> {
            self.writes.push(Write::Credit((destination.kind(), destination.id(), mv.item_id)));
            Ok(())
        }

        async fn reserve_if_available(
            &mut self,
            _source: &dyn StockLocation,
            _item_id: ItemId,
            _quantity: i64,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn release_if_held(
            &mut self,
            _source: &dyn StockLocation,
            _item_id: ItemId,
            _quantity: i64,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }
    }

    fn depot(code: &str) -> Location {
        Location::Warehouse(Warehouse {
            id: LocationId::new(),
            code: code.to_string(),
            name: code.to_string(),
            capacity: None,
            active: true,
        })
    }

    fn transfer(source: &Location, destination: &Location, lines: &[(ItemId, i64, i64)]) -> Transfer {
        Transfer::new(TransferDraft {
            id: TransferId::new(),
            reference_code: "TRF-A-B-20261016-AAAA".to_string(),
            source_location_id: source.id(),
            destination_location_id: destination.id(),
            destination_kind: destination.kind(),
            transfer_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            scheduled_date: None,
            priority: TransferPriority::Normal,
            reason: None,
            notes: None,
            lines: lines
                .iter()
                .map(|(item, full, empty)| TransferLine::priced(&LineItem::new(*item, *full, *empty), None))
                .collect(),
            status: TransferStatus::Pending,
            created_by: UserId::new(),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn execute(source: &Location, destination: &Location) -> StockEffect {
        StockEffect::Execute {
            source: source.clone(),
            destination: destination.clone(),
            consume_reservation: false,
        }
    }

    #[tokio::test]
    async fn opposite_transfers_lock_rows_in_the_same_order() {
        let (a, b) = (depot("WH01"), depot("WH02"));
        let (gas, oxygen) = (ItemId::new(), ItemId::new());
        let outbound = transfer(&a, &b, &[(oxygen, 5, 0), (gas, 3, 1)]);
        let inbound = transfer(&b, &a, &[(gas, 2, 0), (oxygen, 1, 0)]);

        let forward = rows_for(&outbound, &execute(&a, &b));
        let backward = rows_for(&inbound, &execute(&b, &a));
        assert_eq!(forward.len(), 4);
        assert_eq!(forward, backward);
        assert!(forward.windows(2).all(|w| w[0] < w[1]));

        let mut recorder = Recorder::default();
        apply_effect(&mut recorder, &outbound, &execute(&a, &b)).await.unwrap();
        assert_eq!(recorder.writes[0], Write::Lock(forward));
        assert_eq!(recorder.writes.len(), 5);
    }

    #[tokio::test]
    async fn failed_debit_reports_the_line_and_skips_its_credit() {
        let (a, b) = (depot("WH01"), depot("WH02"));
        let (gas, oxygen) = (ItemId::new(), ItemId::new());
        let t = transfer(&a, &b, &[(gas, 3, 0), (oxygen, 5, 0)]);

        let mut recorder = Recorder {
            short: Some(oxygen),
            ..Recorder::default()
        };
        let err = apply_effect(&mut recorder, &t, &execute(&a, &b)).await.unwrap_err();

        match err {
            StoreError::InsufficientStock(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].item_id, oxygen);
            }
            other => panic!("expected insufficient stock, got {other}"),
        }
        assert!(!recorder.writes.contains(&Write::Credit((b.kind(), b.id(), oxygen))));
        assert!(recorder.writes.contains(&Write::Credit((b.kind(), b.id(), gas))));
    }

    #[test]
    fn reservations_lock_only_source_rows_with_full_units() {
        let (a, b) = (depot("WH01"), depot("WH02"));
        let (gas, empties) = (ItemId::new(), ItemId::new());
        let t = transfer(&a, &b, &[(gas, 4, 0), (empties, 0, 6)]);

        let rows = rows_for(&t, &StockEffect::Reserve { source: a.clone() });
        assert_eq!(rows, vec![(a.kind(), a.id(), gas)]);
        assert!(rows_for(&t, &StockEffect::None).is_empty());
    }
}

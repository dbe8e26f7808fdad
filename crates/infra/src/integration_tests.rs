//! Integration tests for the transfer service over the in-memory store.
//!
//! Tests: request → validation → storage → status change → stock ledger
//!
//! Verifies:
//! - Stock moves happen exactly once and only on completion
//! - Multi-line execution is all-or-nothing
//! - Reservations are taken on approval and given back on cancel
//! - Concurrent requests never overdraw a source

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, Utc};

    use gasflow_core::{ItemId, LocationId, UserId};
    use gasflow_inventory::{ItemSpec, StockBalance, StockFilter, Vehicle, Warehouse};
    use gasflow_transfers::{
        ConflictMode, LineItem, NewTransfer, Transfer, TransferPriority, TransferRequest, TransferStatus,
    };

    use crate::config::EngineSettings;
    use crate::in_memory::InMemoryStore;
    use crate::ledger::StockLedger;
    use crate::service::{TransferService, TransferServiceError};
    use crate::transfer_store::TransferFilter;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 15).unwrap()
    }

    fn now() -> DateTime<Utc> {
        today().and_hms_opt(8, 0, 0).unwrap().and_utc()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: TransferService,
        source: Warehouse,
        destination: Warehouse,
        actor: UserId,
    }

    fn warehouse(code: &str) -> Warehouse {
        Warehouse {
            id: LocationId::new(),
            code: code.to_string(),
            name: format!("{code} depot"),
            capacity: None,
            active: true,
        }
    }

    async fn setup(settings: EngineSettings) -> Fixture {
        let store = InMemoryStore::arc();
        let source = warehouse("WH01");
        let destination = warehouse("WH02");
        store.upsert_location(source.clone()).await;
        store.upsert_location(destination.clone()).await;

        let service = TransferService::new(store.clone(), settings).with_clock(now);
        Fixture {
            store,
            service,
            source,
            destination,
            actor: UserId::new(),
        }
    }

    fn no_reservation() -> EngineSettings {
        EngineSettings {
            reserve_on_approval: false,
            ..EngineSettings::default()
        }
    }

    impl Fixture {
        async fn stocked_item(&self, sku: &str, full: i64, empty: i64) -> ItemId {
            let item = ItemSpec::new(ItemId::new(), sku, "LPG cylinder")
                .with_variant("14.2kg")
                .with_weights(14.2, 15.3)
                .with_unit_cost(950);
            let id = item.id;
            self.store.upsert_item(item).await;
            self.service.receive_stock(self.source.id, id, full, empty).await.unwrap();
            id
        }

        fn new_transfer(&self, lines: Vec<LineItem>, submit: bool) -> NewTransfer {
            NewTransfer {
                source_location_id: Some(self.source.id),
                destination_location_id: Some(self.destination.id),
                transfer_date: today(),
                scheduled_date: None,
                priority: TransferPriority::Normal,
                reason: Some("restock".to_string()),
                notes: None,
                lines,
                submit,
            }
        }

        async fn create(&self, lines: Vec<LineItem>) -> Transfer {
            self.service
                .create_transfer(self.new_transfer(lines, true), self.actor)
                .await
                .unwrap()
                .transfer
        }

        async fn advance(&self, transfer: &Transfer, to: &[TransferStatus]) -> Transfer {
            let mut current = transfer.clone();
            for status in to {
                current = self
                    .service
                    .update_transfer_status(current.id, *status, self.actor, None)
                    .await
                    .unwrap();
            }
            current
        }

        async fn source_balance(&self, item: ItemId) -> StockBalance {
            self.store.balance(&self.source, item).await.unwrap().unwrap()
        }

        async fn destination_balance(&self, item: ItemId) -> Option<StockBalance> {
            self.store.balance(&self.destination, item).await.unwrap()
        }
    }

    const TO_IN_TRANSIT: [TransferStatus; 2] = [TransferStatus::Approved, TransferStatus::InTransit];

    #[tokio::test]
    async fn full_lifecycle_moves_stock_once_and_consumes_reservation() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 20).await;

        let transfer = fx.create(vec![LineItem::new(item, 30, 5)]).await;
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert!(transfer.reference_code.starts_with("TRF-WH01-WH02-20300115-"));
        assert_eq!(transfer.summary.total_quantity, 35);

        let approved = fx.advance(&transfer, &[TransferStatus::Approved]).await;
        assert!(approved.stock_reserved);
        assert_eq!(approved.approved_by, Some(fx.actor));
        let held = fx.source_balance(item).await;
        assert_eq!((held.quantity_full, held.quantity_reserved), (100, 30));

        let done = fx
            .advance(&approved, &[TransferStatus::InTransit, TransferStatus::Completed])
            .await;
        assert_eq!(done.status, TransferStatus::Completed);
        assert!(!done.stock_reserved);
        assert!(done.completed_at.is_some());

        let source = fx.source_balance(item).await;
        assert_eq!(
            (source.quantity_full, source.quantity_empty, source.quantity_reserved),
            (70, 15, 0)
        );
        let destination = fx.destination_balance(item).await.unwrap();
        assert_eq!((destination.quantity_full, destination.quantity_empty), (30, 5));
    }

    #[tokio::test]
    async fn second_completion_is_rejected_without_moving_stock() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let transfer = fx.create(vec![LineItem::new(item, 40, 0)]).await;
        let in_transit = fx.advance(&transfer, &TO_IN_TRANSIT).await;
        fx.advance(&in_transit, &[TransferStatus::Completed]).await;

        let err = fx
            .service
            .update_transfer_status(transfer.id, TransferStatus::Completed, fx.actor, None)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferServiceError::AlreadyCompleted(id) if id == transfer.id));
        assert_eq!(fx.source_balance(item).await.quantity_full, 60);
        assert_eq!(fx.destination_balance(item).await.unwrap().quantity_full, 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completions_move_stock_exactly_once() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let transfer = fx.create(vec![LineItem::new(item, 25, 0)]).await;
        fx.advance(&transfer, &TO_IN_TRANSIT).await;
        let id = transfer.id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = fx.service.clone();
                let actor = fx.actor;
                tokio::spawn(async move {
                    service
                        .update_transfer_status(id, TransferStatus::Completed, actor, None)
                        .await
                })
            })
            .collect();

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(TransferServiceError::AlreadyCompleted(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(fx.source_balance(item).await.quantity_full, 75);
        assert_eq!(fx.destination_balance(item).await.unwrap().quantity_full, 25);
    }

    #[tokio::test]
    async fn failed_line_rolls_back_every_line_and_keeps_status() {
        let fx = setup(no_reservation()).await;
        let gas = fx.stocked_item("LPG-14", 50, 0).await;
        let oxygen = fx.stocked_item("OXY-47", 100, 0).await;

        let big = fx
            .create(vec![LineItem::new(gas, 10, 0), LineItem::new(oxygen, 10, 0)])
            .await;
        let big = fx.advance(&big, &TO_IN_TRANSIT).await;

        // A sibling drains most of the oxygen before `big` completes.
        let drain = fx.create(vec![LineItem::new(oxygen, 95, 0)]).await;
        fx.advance(
            &drain,
            &[TransferStatus::Approved, TransferStatus::InTransit, TransferStatus::Completed],
        )
        .await;

        let err = fx
            .service
            .update_transfer_status(big.id, TransferStatus::Completed, fx.actor, None)
            .await
            .unwrap_err();

        match err {
            TransferServiceError::Execution(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].item_id, oxygen);
            }
            other => panic!("expected execution failure, got {other}"),
        }
        assert_eq!(fx.source_balance(gas).await.quantity_full, 50);
        assert!(fx.destination_balance(gas).await.is_none());
        assert_eq!(fx.source_balance(oxygen).await.quantity_full, 5);
        assert_eq!(
            fx.service.get_transfer(big.id).await.unwrap().status,
            TransferStatus::InTransit
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transfers_never_overdraw_the_source() {
        let fx = setup(no_reservation()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;

        let small = fx.create(vec![LineItem::new(item, 30, 0)]).await;
        let large = fx.create(vec![LineItem::new(item, 90, 0)]).await;
        fx.advance(&small, &TO_IN_TRANSIT).await;
        fx.advance(&large, &TO_IN_TRANSIT).await;

        let handles: Vec<_> = [small.id, large.id]
            .into_iter()
            .map(|id| {
                let service = fx.service.clone();
                let actor = fx.actor;
                tokio::spawn(async move {
                    service
                        .update_transfer_status(id, TransferStatus::Completed, actor, None)
                        .await
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(TransferServiceError::Execution(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 1);
        let left = fx.source_balance(item).await.quantity_full;
        let moved = fx.destination_balance(item).await.unwrap().quantity_full;
        assert!(left >= 0);
        assert_eq!(left + moved, 100);
    }

    #[tokio::test]
    async fn reservation_blocks_an_overlapping_approval() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;

        let small = fx.create(vec![LineItem::new(item, 30, 0)]).await;
        let large = fx.create(vec![LineItem::new(item, 90, 0)]).await;
        fx.advance(&small, &[TransferStatus::Approved]).await;

        let err = fx
            .service
            .update_transfer_status(large.id, TransferStatus::Approved, fx.actor, None)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferServiceError::Execution(_)));
        let stored = fx.service.get_transfer(large.id).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert!(!stored.stock_reserved);
        assert_eq!(fx.source_balance(item).await.quantity_reserved, 30);
    }

    #[tokio::test]
    async fn cancelling_a_reserved_transfer_releases_the_hold() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let transfer = fx.create(vec![LineItem::new(item, 60, 0)]).await;
        let in_transit = fx.advance(&transfer, &TO_IN_TRANSIT).await;
        assert_eq!(fx.source_balance(item).await.quantity_reserved, 60);

        let cancelled = fx
            .service
            .update_transfer_status(in_transit.id, TransferStatus::Cancelled, fx.actor, Some("truck broke down"))
            .await
            .unwrap();

        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(fx.actor));
        assert_eq!(cancelled.notes.as_deref(), Some("[cancelled] truck broke down"));
        let balance = fx.source_balance(item).await;
        assert_eq!((balance.quantity_full, balance.quantity_reserved), (100, 0));
    }

    #[tokio::test]
    async fn validation_never_touches_the_ledger() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 10).await;
        let request = TransferRequest {
            source_location_id: Some(fx.source.id),
            destination_location_id: Some(fx.destination.id),
            transfer_date: today(),
            lines: vec![LineItem::new(item, 95, 2)],
        };

        let before = fx.store.balances(&fx.source, &StockFilter::default()).await.unwrap();
        let first = fx.service.validate_transfer(&request).await.unwrap();
        let second = fx.service.validate_transfer(&request).await.unwrap();
        let after = fx.store.balances(&fx.source, &StockFilter::default()).await.unwrap();

        assert!(first.is_valid);
        assert_eq!(first.warnings.len(), 1, "95 of 100 is near depletion");
        assert_eq!(first, second);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn multi_line_validation_reports_every_problem() {
        let fx = setup(EngineSettings::default()).await;
        let gas = fx.stocked_item("LPG-14", 10, 0).await;
        let request = TransferRequest {
            source_location_id: Some(fx.source.id),
            destination_location_id: Some(fx.destination.id),
            transfer_date: today().pred_opt().unwrap(),
            lines: vec![LineItem::new(gas, 50, 0), LineItem::new(ItemId::new(), 1, 0)],
        };

        let result = fx.service.validate_transfer(&request).await.unwrap();

        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("in the past")));
        assert!(result.errors.iter().any(|e| e.contains("insufficient full stock")));
        assert!(result.errors.iter().any(|e| e.contains("not found")));
        assert_eq!(result.blocked_items.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_item_lines_are_rejected_on_create() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;

        let err = fx
            .service
            .create_transfer(
                fx.new_transfer(vec![LineItem::new(item, 5, 0), LineItem::new(item, 3, 0)], true),
                fx.actor,
            )
            .await
            .unwrap_err();

        match err {
            TransferServiceError::Validation(result) => {
                assert!(result.errors.iter().any(|e| e.contains("duplicate")));
            }
            other => panic!("expected validation failure, got {other}"),
        }
        assert!(fx.service.list_transfers(&TransferFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflicts_warn_by_default_and_block_when_configured() {
        let fx = setup(no_reservation()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        fx.create(vec![LineItem::new(item, 70, 0)]).await;

        let second = fx.new_transfer(vec![LineItem::new(item, 50, 0)], true);
        let report = fx
            .service
            .check_transfer_conflicts(&second.request(), None)
            .await
            .unwrap();
        assert!(report.has_conflicts);
        assert_eq!(report.contested_items(), vec![item]);

        let warned = fx.service.create_transfer(second.clone(), fx.actor).await.unwrap();
        assert!(warned.conflicts.has_conflicts);
        assert_eq!(warned.conflicts.contested_items(), vec![item]);

        let blocking = TransferService::new(
            fx.store.clone(),
            EngineSettings {
                conflict_mode: ConflictMode::Block,
                ..no_reservation()
            },
        )
        .with_clock(now);
        let err = blocking.create_transfer(second, fx.actor).await.unwrap_err();
        assert!(matches!(err, TransferServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn submitting_a_draft_revalidates_against_current_stock() {
        let fx = setup(no_reservation()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let draft = fx
            .service
            .create_transfer(fx.new_transfer(vec![LineItem::new(item, 50, 0)], false), fx.actor)
            .await
            .unwrap()
            .transfer;
        assert_eq!(draft.status, TransferStatus::Draft);

        let other = fx.create(vec![LineItem::new(item, 60, 0)]).await;
        fx.advance(
            &other,
            &[TransferStatus::Approved, TransferStatus::InTransit, TransferStatus::Completed],
        )
        .await;

        let err = fx
            .service
            .update_transfer_status(draft.id, TransferStatus::Pending, fx.actor, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferServiceError::Validation(_)));
        assert_eq!(
            fx.service.get_transfer(draft.id).await.unwrap().status,
            TransferStatus::Draft
        );
    }

    #[tokio::test]
    async fn submitting_a_contested_draft_is_blocked_in_block_mode() {
        let fx = setup(no_reservation()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let blocking = TransferService::new(
            fx.store.clone(),
            EngineSettings {
                conflict_mode: ConflictMode::Block,
                ..no_reservation()
            },
        )
        .with_clock(now);

        let draft = blocking
            .create_transfer(fx.new_transfer(vec![LineItem::new(item, 90, 0)], false), fx.actor)
            .await
            .unwrap()
            .transfer;
        let sibling = blocking
            .create_transfer(fx.new_transfer(vec![LineItem::new(item, 30, 0)], true), fx.actor)
            .await
            .unwrap();
        assert!(!sibling.conflicts.has_conflicts);

        let err = blocking
            .update_transfer_status(draft.id, TransferStatus::Pending, fx.actor, None)
            .await
            .unwrap_err();
        match err {
            TransferServiceError::Conflict(report) => {
                assert_eq!(report.contested_items(), vec![item]);
            }
            other => panic!("expected conflict, got {other}"),
        }
        let stored = fx.service.get_transfer(draft.id).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Draft);
        assert_eq!(stored.version, draft.version);

        // Warn mode lets the same submission through.
        let pending = fx
            .service
            .update_transfer_status(draft.id, TransferStatus::Pending, fx.actor, None)
            .await
            .unwrap();
        assert_eq!(pending.status, TransferStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_transfer_untouched() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let transfer = fx.create(vec![LineItem::new(item, 10, 0)]).await;

        let err = fx
            .service
            .update_transfer_status(transfer.id, TransferStatus::Completed, fx.actor, None)
            .await
            .unwrap_err();

        match err {
            TransferServiceError::InvalidTransition(e) => {
                assert_eq!(e.from, TransferStatus::Pending);
                assert_eq!(e.to, TransferStatus::Completed);
            }
            other => panic!("expected invalid transition, got {other}"),
        }
        assert_eq!(fx.service.get_transfer(transfer.id).await.unwrap(), transfer);
        assert_eq!(fx.source_balance(item).await.quantity_full, 100);
    }

    #[tokio::test]
    async fn replacing_lines_recomputes_summary_and_bumps_version() {
        let fx = setup(EngineSettings::default()).await;
        let gas = fx.stocked_item("LPG-14", 100, 0).await;
        let oxygen = fx.stocked_item("OXY-47", 100, 0).await;
        let transfer = fx.create(vec![LineItem::new(gas, 10, 0)]).await;
        let editor = UserId::new();

        let updated = fx
            .service
            .update_transfer_lines(
                transfer.id,
                vec![LineItem::new(gas, 4, 0), LineItem::new(oxygen, 6, 0)],
                editor,
            )
            .await
            .unwrap();

        assert_eq!(updated.lines.len(), 2);
        assert_eq!(updated.summary.total_items, 2);
        assert_eq!(updated.summary.total_quantity, 10);
        assert_eq!(updated.summary.total_cost, Some(9_500));
        assert_eq!(updated.version, transfer.version + 1);
        assert_eq!(updated.created_by, fx.actor);
        assert_eq!(updated.updated_by, editor);
        assert_eq!(fx.service.get_transfer(transfer.id).await.unwrap(), updated);

        let approved = fx.advance(&updated, &[TransferStatus::Approved]).await;
        let err = fx
            .service
            .update_transfer_lines(approved.id, vec![LineItem::new(gas, 1, 0)], editor)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferServiceError::Domain(_)));
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_filterable() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;

        let mut created = Vec::new();
        for minute in 0..3 {
            let service = TransferService::new(fx.store.clone(), EngineSettings::default())
                .with_clock(move || now() + chrono::Duration::minutes(minute));
            let transfer = service
                .create_transfer(fx.new_transfer(vec![LineItem::new(item, 1, 0)], minute != 1), fx.actor)
                .await
                .unwrap();
            created.push(transfer.transfer.id);
        }

        let all = fx.service.list_transfers(&TransferFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![created[2], created[1], created[0]]);

        let drafts = fx
            .service
            .list_transfers(&TransferFilter {
                status: Some(TransferStatus::Draft),
                ..TransferFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, created[1]);

        let page = fx
            .service
            .list_transfers(&TransferFilter {
                limit: Some(1),
                offset: 1,
                ..TransferFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, created[1]);
    }

    #[tokio::test]
    async fn vehicle_destinations_are_credited_in_the_vehicle_ledger() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 100, 0).await;
        let truck = Vehicle {
            id: LocationId::new(),
            plate: "KA01AB1234".to_string(),
            name: "Delivery truck".to_string(),
            load_capacity: Some(40),
            active: true,
        };
        fx.store.upsert_location(truck.clone()).await;

        let mut new = fx.new_transfer(vec![LineItem::new(item, 50, 0)], true);
        new.destination_location_id = Some(truck.id);
        let created = fx.service.create_transfer(new, fx.actor).await.unwrap();
        assert!(created.warnings.iter().any(|w| w.contains("capacity")));
        let transfer = created.transfer;

        fx.advance(
            &transfer,
            &[TransferStatus::Approved, TransferStatus::InTransit, TransferStatus::Completed],
        )
        .await;

        assert_eq!(fx.store.balance(&truck, item).await.unwrap().unwrap().quantity_full, 50);
        assert!(fx.destination_balance(item).await.is_none());
    }

    #[tokio::test]
    async fn receiving_stock_requires_known_item_and_positive_quantity() {
        let fx = setup(EngineSettings::default()).await;
        let item = fx.stocked_item("LPG-14", 10, 0).await;

        let missing = fx.service.receive_stock(fx.source.id, ItemId::new(), 5, 0).await;
        assert!(matches!(missing, Err(TransferServiceError::NotFound(_))));

        let zero = fx.service.receive_stock(fx.source.id, item, 0, 0).await;
        assert!(matches!(zero, Err(TransferServiceError::Domain(_))));

        let unknown_location = fx.service.receive_stock(LocationId::new(), item, 1, 0).await;
        assert!(matches!(unknown_location, Err(TransferServiceError::NotFound(_))));

        let huge = fx.service.receive_stock(fx.source.id, item, i64::MAX, 1).await;
        assert!(matches!(huge, Err(TransferServiceError::Domain(_))));

        let stock = fx
            .service
            .get_warehouse_stock(fx.source.id, &StockFilter::default())
            .await
            .unwrap();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].quantity_full, 10);
    }
}

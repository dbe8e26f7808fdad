use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use gasflow_core::{ItemId, LocationId, UserId};
use gasflow_infra::{EngineSettings, InMemoryStore, TransferService};
use gasflow_inventory::{ItemSpec, Location, StockBalance, Warehouse};
use gasflow_transfers::{
    LedgerSnapshot, LineItem, NewTransfer, TransferPriority, TransferRequest, TransferStatus, TransferValidator,
};

fn warehouse(code: &str) -> Warehouse {
    Warehouse {
        id: LocationId::new(),
        code: code.to_string(),
        name: format!("{code} depot"),
        capacity: None,
        active: true,
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 15).unwrap()
}

/// Snapshot and request with `lines` distinct items, all well stocked.
fn fixture(lines: usize) -> (TransferRequest, LedgerSnapshot) {
    let source = warehouse("WH01");
    let destination = warehouse("WH02");
    let mut snapshot = LedgerSnapshot {
        source: Some(Location::Warehouse(source.clone())),
        destination: Some(Location::Warehouse(destination.clone())),
        items: HashMap::new(),
        source_balances: HashMap::new(),
        destination_units_on_hand: 0,
    };
    let mut request_lines = Vec::with_capacity(lines);

    for n in 0..lines {
        let item = ItemSpec::new(ItemId::new(), format!("LPG-{n}"), "LPG cylinder")
            .with_variant(format!("{}kg", 5 + n % 4 * 5))
            .with_weights(14.2, 15.5)
            .with_unit_cost(1_100);
        let mut balance = StockBalance::empty(source.id, item.id);
        balance.quantity_full = 500;
        balance.quantity_empty = 50;
        snapshot.source_balances.insert(item.id, balance);
        request_lines.push(LineItem::new(item.id, 20, 2));
        snapshot.items.insert(item.id, item);
    }

    let request = TransferRequest {
        source_location_id: Some(source.id),
        destination_location_id: Some(destination.id),
        transfer_date: date(),
        lines: request_lines,
    };
    (request, snapshot)
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_transfer");
    let validator = TransferValidator::default();

    for lines in [1usize, 10, 100, 1000] {
        let (request, snapshot) = fixture(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, _| {
            b.iter(|| black_box(validator.validate(black_box(&request), &snapshot, date())));
        });
    }
    group.finish();
}

fn bench_complete_transfer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("complete_transfer");
    group.sample_size(20);

    for lines in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, &lines| {
            b.iter(|| {
                rt.block_on(async {
                    let store = InMemoryStore::arc();
                    let source = warehouse("WH01");
                    let destination = warehouse("WH02");
                    store.upsert_location(source.clone()).await;
                    store.upsert_location(destination.clone()).await;

                    let service = TransferService::new(store.clone(), EngineSettings::default())
                        .with_clock(|| date().and_hms_opt(8, 0, 0).unwrap().and_utc());
                    let mut items = Vec::with_capacity(lines);
                    for n in 0..lines {
                        let item = ItemSpec::new(ItemId::new(), format!("LPG-{n}"), "LPG cylinder");
                        store.upsert_item(item.clone()).await;
                        service.receive_stock(source.id, item.id, 100, 0).await.unwrap();
                        items.push(LineItem::new(item.id, 10, 0));
                    }

                    let actor = UserId::new();
                    let transfer = service
                        .create_transfer(
                            NewTransfer {
                                source_location_id: Some(source.id),
                                destination_location_id: Some(destination.id),
                                transfer_date: date(),
                                scheduled_date: None,
                                priority: TransferPriority::Normal,
                                reason: None,
                                notes: None,
                                lines: items,
                                submit: true,
                            },
                            actor,
                        )
                        .await
                        .unwrap()
                        .transfer;
                    for status in [TransferStatus::Approved, TransferStatus::InTransit, TransferStatus::Completed] {
                        service
                            .update_transfer_status(transfer.id, status, actor, None)
                            .await
                            .unwrap();
                    }
                    black_box(transfer.id)
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate, bench_complete_transfer);
criterion_main!(benches);

//! Postgres-backed catalog, stock ledger and transfer repository.
//!
//! Every ledger write is a conditional `UPDATE` whose guard lives in the
//! `WHERE` clause; "the row matched" (`rows_affected() == 1`) is the only
//! success signal. Status changes use the same compare-and-swap shape on the
//! `transfers` row and share one transaction with their stock effect.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (check violation) | `23514` | `Database` |
//! | Database (deadlock detected) | `40P01` | `Retryable` |
//! | Database (serialization failure) | `40001` | `Retryable` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / other | N/A | `Database` |
//!
//! ## Thread Safety
//!
//! `PostgresStore` is `Send + Sync`; all work goes through the SQLx pool.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use gasflow_core::{ExpectedVersion, ItemId, LocationId, TransferId, UserId};
use gasflow_inventory::{ItemSpec, Location, LocationKind, StockBalance, StockFilter, StockLocation, Vehicle, Warehouse};
use gasflow_transfers::{Transfer, TransferLine, TransferPriority, TransferStatus, TransferSummary};

use crate::catalog::Catalog;
use crate::error::StoreError;
use crate::ledger::executor::{LedgerRow, MoveTarget, StockMove, apply_effect};
use crate::ledger::{AvailabilityCheck, StockLedger};
use crate::transfer_store::{TransferFilter, TransferRepository, TransitionCommit};

const SCHEMA: &str = include_str!("schema.sql");

const TRANSFER_COLUMNS: &str = r#"
    id, reference_code, source_location_id, destination_location_id, destination_kind,
    transfer_date, scheduled_date, status, priority, reason, notes, summary, stock_reserved,
    created_by, created_at, updated_at, updated_by, approved_by, approved_at, completed_by, completed_at,
    cancelled_by, cancelled_at, version
"#;

const LINE_COLUMNS: &str = r#"
    transfer_id, item_id, quantity_full, quantity_empty, unit_weight, unit_cost, batch_number, expiry_date
"#;

/// Table and key column holding balances for a location kind.
fn stock_table(kind: LocationKind) -> (&'static str, &'static str) {
    match kind {
        LocationKind::Warehouse => ("warehouse_stock", "warehouse_id"),
        LocationKind::Vehicle => ("vehicle_stock", "vehicle_id"),
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self, location), fields(location_id = %location.id()), err)]
    pub async fn upsert_location(&self, location: &Location) -> Result<(), StoreError> {
        let query = match location {
            Location::Warehouse(w) => sqlx::query(
                r#"
                INSERT INTO warehouses (id, code, name, capacity, active)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE
                SET code = EXCLUDED.code, name = EXCLUDED.name,
                    capacity = EXCLUDED.capacity, active = EXCLUDED.active
                "#,
            )
            .bind(w.id.as_uuid())
            .bind(&w.code)
            .bind(&w.name)
            .bind(w.capacity)
            .bind(w.active),
            Location::Vehicle(v) => sqlx::query(
                r#"
                INSERT INTO vehicles (id, plate, name, load_capacity, active)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE
                SET plate = EXCLUDED.plate, name = EXCLUDED.name,
                    load_capacity = EXCLUDED.load_capacity, active = EXCLUDED.active
                "#,
            )
            .bind(v.id.as_uuid())
            .bind(&v.plate)
            .bind(&v.name)
            .bind(v.load_capacity)
            .bind(v.active),
        };
        query
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_location", e))?;
        Ok(())
    }

    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    pub async fn upsert_item(&self, item: &ItemSpec) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (id, sku, name, variant, capacity_kg, tare_weight_kg, unit_cost)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET sku = EXCLUDED.sku, name = EXCLUDED.name, variant = EXCLUDED.variant,
                capacity_kg = EXCLUDED.capacity_kg, tare_weight_kg = EXCLUDED.tare_weight_kg,
                unit_cost = EXCLUDED.unit_cost
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.sku)
        .bind(&item.name)
        .bind(&item.variant)
        .bind(item.capacity_kg)
        .bind(item.tare_weight_kg)
        .bind(item.unit_cost.map(|c| c as i64))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_item", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))
    }

    async fn load_lines(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<TransferLine>>, StoreError> {
        let sql = format!("SELECT {LINE_COLUMNS} FROM transfer_lines WHERE transfer_id = ANY($1) ORDER BY transfer_id, line_no");
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_lines", e))?;

        let mut lines: HashMap<Uuid, Vec<TransferLine>> = HashMap::new();
        for row in rows {
            let transfer_id: Uuid = row.try_get("transfer_id").map_err(|e| map_sqlx_error("load_lines", e))?;
            lines.entry(transfer_id).or_default().push(line_from_row(&row)?);
        }
        Ok(lines)
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Transfer>, StoreError> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("hydrate", e))?;
        let mut lines = self.load_lines(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("hydrate", e))?;
                transfer_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

/// Ledger writes inside an open transaction.
struct TxLedger {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MoveTarget for TxLedger {
    async fn lock_rows(&mut self, rows: &[LedgerRow]) -> Result<(), StoreError> {
        for (kind, location_id, item_id) in rows {
            let (table, key) = stock_table(*kind);
            // Upsert with a no-op update takes the row lock whether or not the row existed.
            let sql = format!(
                r#"
                INSERT INTO {table} ({key}, item_id, quantity_full, quantity_empty, quantity_reserved, updated_at)
                VALUES ($1, $2, 0, 0, 0, NOW())
                ON CONFLICT ({key}, item_id) DO UPDATE SET updated_at = {table}.updated_at
                "#
            );
            sqlx::query(&sql)
                .bind(location_id.as_uuid())
                .bind(item_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("lock_rows", e))?;
        }
        Ok(())
    }

    async fn debit_if_available(
        &mut self,
        source: &dyn StockLocation,
        mv: &StockMove,
        consume_reservation: bool,
    ) -> Result<bool, StoreError> {
        let (table, key) = stock_table(source.kind());
        let sql = format!(
            r#"
            UPDATE {table}
            SET quantity_full = quantity_full - $3,
                quantity_empty = quantity_empty - $4,
                quantity_reserved = quantity_reserved - CASE WHEN $5 THEN $3 ELSE 0 END,
                updated_at = NOW()
            WHERE {key} = $1 AND item_id = $2
              AND quantity_empty >= $4
              AND CASE WHEN $5 THEN quantity_reserved >= $3
                       ELSE quantity_full - quantity_reserved >= $3 END
            "#
        );
        let result = sqlx::query(&sql)
            .bind(source.id().as_uuid())
            .bind(mv.item_id.as_uuid())
            .bind(mv.quantity_full)
            .bind(mv.quantity_empty)
            .bind(consume_reservation)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("debit", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit(&mut self, destination: &dyn StockLocation, mv: &StockMove) -> Result<(), StoreError> {
        let (table, key) = stock_table(destination.kind());
        let sql = format!(
            r#"
            INSERT INTO {table} ({key}, item_id, quantity_full, quantity_empty, quantity_reserved, updated_at)
            VALUES ($1, $2, $3, $4, 0, NOW())
            ON CONFLICT ({key}, item_id) DO UPDATE
            SET quantity_full = {table}.quantity_full + EXCLUDED.quantity_full,
                quantity_empty = {table}.quantity_empty + EXCLUDED.quantity_empty,
                updated_at = NOW()
            "#
        );
        sqlx::query(&sql)
            .bind(destination.id().as_uuid())
            .bind(mv.item_id.as_uuid())
            .bind(mv.quantity_full)
            .bind(mv.quantity_empty)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("credit", e))?;
        Ok(())
    }

    async fn reserve_if_available(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError> {
        let (table, key) = stock_table(source.kind());
        let sql = format!(
            r#"
            UPDATE {table}
            SET quantity_reserved = quantity_reserved + $3, updated_at = NOW()
            WHERE {key} = $1 AND item_id = $2 AND quantity_full - quantity_reserved >= $3
            "#
        );
        let result = sqlx::query(&sql)
            .bind(source.id().as_uuid())
            .bind(item_id.as_uuid())
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("reserve", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_if_held(
        &mut self,
        source: &dyn StockLocation,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<bool, StoreError> {
        let (table, key) = stock_table(source.kind());
        let sql = format!(
            r#"
            UPDATE {table}
            SET quantity_reserved = quantity_reserved - $3, updated_at = NOW()
            WHERE {key} = $1 AND item_id = $2 AND quantity_reserved >= $3
            "#
        );
        let result = sqlx::query(&sql)
            .bind(source.id().as_uuid())
            .bind(item_id.as_uuid())
            .bind(quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("release", e))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    #[instrument(skip(self), fields(location_id = %id), err)]
    async fn location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        let warehouse = sqlx::query("SELECT id, code, name, capacity, active FROM warehouses WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_warehouse", e))?;
        if let Some(row) = warehouse {
            return Ok(Some(Location::Warehouse(Warehouse {
                id,
                code: get(&row, "code")?,
                name: get(&row, "name")?,
                capacity: get(&row, "capacity")?,
                active: get(&row, "active")?,
            })));
        }

        let vehicle = sqlx::query("SELECT id, plate, name, load_capacity, active FROM vehicles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_vehicle", e))?;
        vehicle
            .map(|row| {
                Ok(Location::Vehicle(Vehicle {
                    id,
                    plate: get(&row, "plate")?,
                    name: get(&row, "name")?,
                    load_capacity: get(&row, "load_capacity")?,
                    active: get(&row, "active")?,
                }))
            })
            .transpose()
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn item(&self, id: ItemId) -> Result<Option<ItemSpec>, StoreError> {
        let row = sqlx::query(
            "SELECT id, sku, name, variant, capacity_kg, tare_weight_kg, unit_cost FROM items WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_item", e))?;

        row.map(|row| {
            Ok(ItemSpec {
                id,
                sku: get(&row, "sku")?,
                name: get(&row, "name")?,
                variant: get(&row, "variant")?,
                capacity_kg: get(&row, "capacity_kg")?,
                tare_weight_kg: get(&row, "tare_weight_kg")?,
                unit_cost: get::<Option<i64>>(&row, "unit_cost")?.map(|c| c.max(0) as u64),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl StockLedger for PostgresStore {
    #[instrument(skip(self, location), fields(location_id = %location.id(), item_id = %item_id), err)]
    async fn balance(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
    ) -> Result<Option<StockBalance>, StoreError> {
        let (table, key) = stock_table(location.kind());
        let sql = format!(
            "SELECT item_id, quantity_full, quantity_empty, quantity_reserved, updated_at FROM {table} WHERE {key} = $1 AND item_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(location.id().as_uuid())
            .bind(item_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("balance", e))?;
        row.map(|r| balance_from_row(location.id(), &r)).transpose()
    }

    #[instrument(skip(self, location, filter), fields(location_id = %location.id(), row_count = tracing::field::Empty), err)]
    async fn balances(
        &self,
        location: &dyn StockLocation,
        filter: &StockFilter,
    ) -> Result<Vec<StockBalance>, StoreError> {
        let (table, key) = stock_table(location.kind());
        let sql = format!(
            "SELECT item_id, quantity_full, quantity_empty, quantity_reserved, updated_at FROM {table} WHERE {key} = $1"
        );
        let rows = sqlx::query(&sql)
            .bind(location.id().as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("balances", e))?;

        let balances = rows
            .iter()
            .map(|r| balance_from_row(location.id(), r))
            .collect::<Result<Vec<_>, _>>()?;
        let balances = filter.apply(balances);
        Span::current().record("row_count", balances.len());
        Ok(balances)
    }

    /// One `SELECT` that reads the row and evaluates the comparison together.
    #[instrument(skip(self, location), fields(location_id = %location.id(), item_id = %item_id), err)]
    async fn check_availability(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<AvailabilityCheck, StoreError> {
        let (table, key) = stock_table(location.kind());
        let sql = format!(
            r#"
            SELECT item_id, quantity_full, quantity_empty, quantity_reserved, updated_at,
                   (quantity_full - quantity_reserved >= $3 AND quantity_empty >= $4) AS sufficient
            FROM {table}
            WHERE {key} = $1 AND item_id = $2
            "#
        );
        let row = sqlx::query(&sql)
            .bind(location.id().as_uuid())
            .bind(item_id.as_uuid())
            .bind(quantity_full)
            .bind(quantity_empty)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("check_availability", e))?;

        match row {
            Some(row) => Ok(AvailabilityCheck {
                sufficient: get(&row, "sufficient")?,
                balance: Some(balance_from_row(location.id(), &row)?),
            }),
            None => Ok(AvailabilityCheck {
                balance: None,
                sufficient: false,
            }),
        }
    }

    #[instrument(skip(self, location), fields(location_id = %location.id(), item_id = %item_id), err)]
    async fn receive_stock(
        &self,
        location: &dyn StockLocation,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> Result<StockBalance, StoreError> {
        let (table, key) = stock_table(location.kind());
        let sql = format!(
            r#"
            INSERT INTO {table} ({key}, item_id, quantity_full, quantity_empty, quantity_reserved, updated_at)
            VALUES ($1, $2, $3, $4, 0, NOW())
            ON CONFLICT ({key}, item_id) DO UPDATE
            SET quantity_full = {table}.quantity_full + EXCLUDED.quantity_full,
                quantity_empty = {table}.quantity_empty + EXCLUDED.quantity_empty,
                updated_at = NOW()
            RETURNING item_id, quantity_full, quantity_empty, quantity_reserved, updated_at
            "#
        );
        let row = sqlx::query(&sql)
            .bind(location.id().as_uuid())
            .bind(item_id.as_uuid())
            .bind(quantity_full)
            .bind(quantity_empty)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("receive_stock", e))?;
        balance_from_row(location.id(), &row)
    }
}

#[async_trait]
impl TransferRepository for PostgresStore {
    #[instrument(skip(self, transfer), fields(transfer_id = %transfer.id, line_count = transfer.lines.len()), err)]
    async fn insert(&self, transfer: &Transfer) -> Result<(), StoreError> {
        let mut tx = self.begin("insert_transfer").await?;
        let sql = format!(
            "INSERT INTO transfers ({TRANSFER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)"
        );
        sqlx::query(&sql)
            .bind(transfer.id.as_uuid())
            .bind(&transfer.reference_code)
            .bind(transfer.source_location_id.as_uuid())
            .bind(transfer.destination_location_id.as_uuid())
            .bind(transfer.destination_kind.as_str())
            .bind(transfer.transfer_date)
            .bind(transfer.scheduled_date)
            .bind(transfer.status.as_str())
            .bind(transfer.priority.as_str())
            .bind(&transfer.reason)
            .bind(&transfer.notes)
            .bind(Json(&transfer.summary))
            .bind(transfer.stock_reserved)
            .bind(transfer.created_by.as_uuid())
            .bind(transfer.created_at)
            .bind(transfer.updated_at)
            .bind(transfer.updated_by.as_uuid())
            .bind(transfer.approved_by.map(|u| *u.as_uuid()))
            .bind(transfer.approved_at)
            .bind(transfer.completed_by.map(|u| *u.as_uuid()))
            .bind(transfer.completed_at)
            .bind(transfer.cancelled_by.map(|u| *u.as_uuid()))
            .bind(transfer.cancelled_at)
            .bind(transfer.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_transfer", e))?;

        insert_lines(&mut tx, transfer).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(transfer_id = %id), err)]
    async fn get(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_transfer", e))?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter), fields(row_count = tracing::field::Empty), err)]
    async fn list(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE TRUE"));
        if let Some(id) = filter.source_location_id {
            qb.push(" AND source_location_id = ").push_bind(*id.as_uuid());
        }
        if let Some(id) = filter.destination_location_id {
            qb.push(" AND destination_location_id = ").push_bind(*id.as_uuid());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND transfer_date >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND transfer_date <= ").push_bind(to);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.effective_limit() as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transfers", e))?;
        Span::current().record("row_count", rows.len());
        self.hydrate(rows).await
    }

    #[instrument(skip(self), fields(source_location_id = %source), err)]
    async fn open_at_source(&self, source: LocationId, date: NaiveDate) -> Result<Vec<Transfer>, StoreError> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE source_location_id = $1 AND transfer_date = $2 AND status = ANY($3)"
        );
        let open: Vec<&str> = TransferStatus::OPEN.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(&sql)
            .bind(source.as_uuid())
            .bind(date)
            .bind(&open)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("open_at_source", e))?;
        self.hydrate(rows).await
    }

    #[instrument(skip(self, transfer), fields(transfer_id = %transfer.id, expected_version = ?expected), err)]
    async fn save_lines(&self, transfer: &Transfer, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut tx = self.begin("save_lines").await?;
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET summary = $2, updated_at = $3, version = $4, updated_by = $6
            WHERE id = $1
              AND status IN ('draft', 'pending')
              AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(Json(&transfer.summary))
        .bind(transfer.updated_at)
        .bind(transfer.version as i64)
        .bind(expected_as_i64(expected))
        .bind(transfer.updated_by.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save_lines", e))?;

        if result.rows_affected() == 0 {
            let err = explain_missed_update(&mut tx, transfer.id, transfer.status, expected).await;
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }

        sqlx::query("DELETE FROM transfer_lines WHERE transfer_id = $1")
            .bind(transfer.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_lines", e))?;
        insert_lines(&mut tx, transfer).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    /// Status CAS first, then the stock effect, in one transaction.
    ///
    /// The `UPDATE` on the transfer row takes its row lock, so a concurrent
    /// commit for the same transfer waits and then fails its own status guard.
    #[instrument(
        skip(self, commit),
        fields(
            transfer_id = %commit.transfer.id,
            from = %commit.expected_status,
            to = %commit.transfer.status,
            operation = tracing::field::Empty
        ),
        err
    )]
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<(), StoreError> {
        Span::current().record("operation", "commit_transition");
        let t = &commit.transfer;
        let mut tx = self.begin("commit_transition").await?;

        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET status = $3, notes = $4, stock_reserved = $5, updated_at = $6,
                approved_by = $7, approved_at = $8, completed_by = $9, completed_at = $10,
                cancelled_by = $11, cancelled_at = $12, version = $13, updated_by = $15
            WHERE id = $1 AND status = $2 AND ($14::BIGINT IS NULL OR version = $14)
            "#,
        )
        .bind(t.id.as_uuid())
        .bind(commit.expected_status.as_str())
        .bind(t.status.as_str())
        .bind(&t.notes)
        .bind(t.stock_reserved)
        .bind(t.updated_at)
        .bind(t.approved_by.map(|u| *u.as_uuid()))
        .bind(t.approved_at)
        .bind(t.completed_by.map(|u| *u.as_uuid()))
        .bind(t.completed_at)
        .bind(t.cancelled_by.map(|u| *u.as_uuid()))
        .bind(t.cancelled_at)
        .bind(t.version as i64)
        .bind(expected_as_i64(commit.expected_version))
        .bind(t.updated_by.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            let err = explain_missed_update(&mut tx, t.id, commit.expected_status, commit.expected_version).await;
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }

        let mut ledger = TxLedger { tx };
        match apply_effect(&mut ledger, t, &commit.effect).await {
            Ok(()) => {
                ledger
                    .tx
                    .commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(())
            }
            Err(err) => {
                ledger
                    .tx
                    .rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }
}

async fn insert_lines(tx: &mut Transaction<'static, Postgres>, transfer: &Transfer) -> Result<(), StoreError> {
    for (idx, line) in transfer.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO transfer_lines
                (transfer_id, line_no, item_id, quantity_full, quantity_empty, unit_weight, unit_cost, batch_number, expiry_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transfer.id.as_uuid())
        .bind(idx as i32 + 1)
        .bind(line.item_id.as_uuid())
        .bind(line.quantity_full)
        .bind(line.quantity_empty)
        .bind(line.unit_weight)
        .bind(line.unit_cost.map(|c| c as i64))
        .bind(&line.batch_number)
        .bind(line.expiry_date)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
    }
    Ok(())
}

/// Work out why a guarded `UPDATE` on `transfers` matched no row.
async fn explain_missed_update(
    tx: &mut Transaction<'static, Postgres>,
    id: TransferId,
    expected_status: TransferStatus,
    expected_version: ExpectedVersion,
) -> StoreError {
    let row = sqlx::query("SELECT status, version FROM transfers WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await;

    let row = match row {
        Ok(Some(row)) => row,
        Ok(None) => return StoreError::NotFound(format!("transfer {id}")),
        Err(e) => return map_sqlx_error("explain_missed_update", e),
    };

    let actual = match get::<String>(&row, "status").and_then(|s| parse_enum::<TransferStatus>(&s)) {
        Ok(status) => status,
        Err(e) => return e,
    };
    if actual != expected_status {
        return StoreError::StatusChanged {
            expected: expected_status,
            actual,
        };
    }
    let version = get::<i64>(&row, "version").unwrap_or_default();
    StoreError::VersionConflict(format!(
        "transfer {id} is at version {version}, expected {expected_version:?}"
    ))
}

fn expected_as_i64(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Database(format!("failed to decode column {column}: {e}")))
}

fn parse_enum<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Database(format!("corrupt enum value {value:?}: {e}")))
}

fn balance_from_row(location_id: LocationId, row: &PgRow) -> Result<StockBalance, StoreError> {
    Ok(StockBalance {
        location_id,
        item_id: ItemId::from_uuid(get(row, "item_id")?),
        quantity_full: get(row, "quantity_full")?,
        quantity_empty: get(row, "quantity_empty")?,
        quantity_reserved: get(row, "quantity_reserved")?,
        updated_at: get::<Option<DateTime<Utc>>>(row, "updated_at")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<TransferLine, StoreError> {
    Ok(TransferLine {
        item_id: ItemId::from_uuid(get(row, "item_id")?),
        quantity_full: get(row, "quantity_full")?,
        quantity_empty: get(row, "quantity_empty")?,
        unit_weight: get(row, "unit_weight")?,
        unit_cost: get::<Option<i64>>(row, "unit_cost")?.map(|c| c.max(0) as u64),
        batch_number: get(row, "batch_number")?,
        expiry_date: get(row, "expiry_date")?,
    })
}

fn transfer_from_row(row: &PgRow, lines: Vec<TransferLine>) -> Result<Transfer, StoreError> {
    let user = |column: &str| -> Result<Option<UserId>, StoreError> {
        Ok(get::<Option<Uuid>>(row, column)?.map(UserId::from_uuid))
    };
    let Json(summary): Json<TransferSummary> = get(row, "summary")?;

    Ok(Transfer {
        id: TransferId::from_uuid(get(row, "id")?),
        reference_code: get(row, "reference_code")?,
        source_location_id: LocationId::from_uuid(get(row, "source_location_id")?),
        destination_location_id: LocationId::from_uuid(get(row, "destination_location_id")?),
        destination_kind: parse_enum::<LocationKind>(&get::<String>(row, "destination_kind")?)?,
        transfer_date: get(row, "transfer_date")?,
        scheduled_date: get(row, "scheduled_date")?,
        status: parse_enum::<TransferStatus>(&get::<String>(row, "status")?)?,
        priority: parse_enum::<TransferPriority>(&get::<String>(row, "priority")?)?,
        reason: get(row, "reason")?,
        notes: get(row, "notes")?,
        lines,
        summary,
        stock_reserved: get(row, "stock_reserved")?,
        created_by: UserId::from_uuid(get(row, "created_by")?),
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        updated_by: UserId::from_uuid(get(row, "updated_by")?),
        approved_by: user("approved_by")?,
        approved_at: get(row, "approved_at")?,
        completed_by: user("completed_by")?,
        completed_at: get(row, "completed_at")?,
        cancelled_by: user("cancelled_by")?,
        cancelled_at: get(row, "cancelled_at")?,
        version: get::<i64>(row, "version")?.max(0) as u64,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some(code) if is_retryable(code) => StoreError::Retryable(msg),
                // Ledger CHECKs: quantities non-negative, reserved <= full.
                Some("23514") => StoreError::Database(format!(
                    "check constraint {} violated in {}",
                    db_err.constraint().unwrap_or("?"),
                    operation
                )),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {operation}")),
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

/// SQLSTATEs for transactions Postgres aborted only to break a lock cycle
/// or a serialization conflict; the same request can succeed on retry.
fn is_retryable(code: &str) -> bool {
    matches!(code, "40P01" | "40001")
}

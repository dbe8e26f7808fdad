//! Transfer service: the operations the HTTP layer calls.
//!
//! Validation and conflict checks are read-only and return structured
//! results. Every write ends in exactly one storage call, so each operation
//! either commits completely or leaves storage untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use gasflow_core::{DomainError, ExpectedVersion, ItemId, LocationId, TransferId, UserId};
use gasflow_inventory::{Location, MAX_QUANTITY, StockBalance, StockFilter, StockLocation};
use gasflow_transfers::{
    ConflictMode, ConflictReport, InvalidTransition, LedgerSnapshot, LineItem, NewTransfer, Transfer, TransferDraft,
    TransferLine, TransferRequest, TransferStatus, TransferValidator, ValidationResult, check_conflicts,
    random_suffix, reference_code,
};

use crate::catalog::Catalog;
use crate::config::EngineSettings;
use crate::error::{LineFailure, StoreError};
use crate::ledger::StockLedger;
use crate::transfer_store::{StockEffect, TransferFilter, TransferRepository, TransitionCommit};

/// Everything the service needs from storage.
pub trait TransferStore: Catalog + StockLedger + TransferRepository {}

impl<T: Catalog + StockLedger + TransferRepository> TransferStore for T {}

/// Errors surfaced to callers of [`TransferService`].
#[derive(Debug, Error)]
pub enum TransferServiceError {
    #[error("transfer validation failed: {}", .0.errors.join("; "))]
    Validation(ValidationResult),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Only raised when conflicts are configured to block.
    #[error("conflicting open transfers for {} item(s)", .0.contested_items().len())]
    Conflict(ConflictReport),

    /// A stock write failed at commit time; nothing was applied.
    #[error("stock move failed for {} line(s)", .0.len())]
    Execution(Vec<LineFailure>),

    #[error("transfer {0} is already completed")]
    AlreadyCompleted(TransferId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TransferServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => TransferServiceError::NotFound(what),
            StoreError::InsufficientStock(failures) => TransferServiceError::Execution(failures),
            StoreError::VersionConflict(msg) | StoreError::Retryable(msg) => TransferServiceError::Concurrency(msg),
            e @ StoreError::StatusChanged { .. } => TransferServiceError::Concurrency(e.to_string()),
            other => TransferServiceError::Store(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, TransferServiceError>;

/// A newly persisted transfer with the advisories raised while creating it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedTransfer {
    #[serde(flatten)]
    pub transfer: Transfer,
    /// Soft validation warnings (near depletion, heavy load, over capacity).
    pub warnings: Vec<String>,
    /// Open transfers competing for the same stock; empty unless contested.
    pub conflicts: ConflictReport,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn TransferStore>,
    settings: EngineSettings,
    validator: TransferValidator,
    clock: Clock,
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TransferService {
    pub fn new(store: Arc<dyn TransferStore>, settings: EngineSettings) -> Self {
        Self {
            store,
            validator: TransferValidator::new(settings.validation.clone()),
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock (tests pin "today" with this).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Validate a request against the current ledger.
    ///
    /// Single-line requests read their balance with one indivisible
    /// availability check; longer requests read each line's balance in turn.
    #[instrument(skip(self, request), fields(lines = request.lines.len()), err)]
    pub async fn validate_transfer(&self, request: &TransferRequest) -> ServiceResult<ValidationResult> {
        if request.lines.len() == 1 {
            return self.validate_single_item_atomic(request).await;
        }
        let (result, _) = self.validate_with_snapshot(request).await?;
        Ok(result)
    }

    #[instrument(skip(self, request), err)]
    pub async fn validate_single_item_atomic(&self, request: &TransferRequest) -> ServiceResult<ValidationResult> {
        let mut snapshot = self.catalog_snapshot(request).await?;
        if let (Some(source), [line]) = (snapshot.source.as_ref(), request.lines.as_slice()) {
            let check = self
                .store
                .check_availability(source, line.item_id, line.quantity_full.max(0), line.quantity_empty.max(0))
                .await?;
            if let Some(balance) = check.balance {
                snapshot.source_balances.insert(line.item_id, balance);
            }
        }
        let result = self.validator.validate(request, &snapshot, self.now().date_naive());
        log_validation(&result);
        Ok(result)
    }

    /// Compare `request` with open transfers at the same source and date.
    #[instrument(skip(self, request), err)]
    pub async fn check_transfer_conflicts(
        &self,
        request: &TransferRequest,
        exclude: Option<TransferId>,
    ) -> ServiceResult<ConflictReport> {
        let Some(source_id) = request.source_location_id else {
            return Ok(ConflictReport::default());
        };
        let Some(source) = self.store.location(source_id).await? else {
            return Ok(ConflictReport::default());
        };

        let siblings = self.store.open_at_source(source_id, request.transfer_date).await?;
        let balances = self.source_balances(&source, request.lines.iter().map(|l| l.item_id)).await?;
        let report = check_conflicts(request, exclude, &siblings, &balances);

        if report.has_conflicts {
            warn!(
                source = %source.code(),
                items = ?report.contested_items(),
                "open transfers together claim more stock than available"
            );
        }
        Ok(report)
    }

    /// Validate, check conflicts, price the lines and persist a new transfer
    /// in `draft` (or `pending` when `submit` is set).
    #[instrument(skip(self, new), fields(actor = %actor), err)]
    pub async fn create_transfer(&self, new: NewTransfer, actor: UserId) -> ServiceResult<CreatedTransfer> {
        let request = new.request();
        let (validation, snapshot) = self.validate_with_snapshot(&request).await?;
        if !validation.is_valid {
            return Err(TransferServiceError::Validation(validation));
        }

        let conflicts = self.guard_conflicts(&request, None).await?;

        let (Some(source), Some(destination)) = (snapshot.source.as_ref(), snapshot.destination.as_ref()) else {
            return Err(TransferServiceError::NotFound("transfer location".to_string()));
        };
        let lines: Vec<TransferLine> = request
            .lines
            .iter()
            .map(|l| TransferLine::priced(l, snapshot.items.get(&l.item_id)))
            .collect();
        let status = if new.submit {
            TransferStatus::Pending
        } else {
            TransferStatus::Draft
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let transfer = Transfer::new(TransferDraft {
                id: TransferId::new(),
                reference_code: reference_code(source.code(), destination.code(), new.transfer_date, &random_suffix()),
                source_location_id: source.id(),
                destination_location_id: destination.id(),
                destination_kind: destination.kind(),
                transfer_date: new.transfer_date,
                scheduled_date: new.scheduled_date,
                priority: new.priority,
                reason: new.reason.clone(),
                notes: new.notes.clone(),
                lines: lines.clone(),
                status,
                created_by: actor,
                created_at: self.now(),
            })?;

            match self.store.insert(&transfer).await {
                Ok(()) => {
                    info!(
                        transfer_id = %transfer.id,
                        reference = %transfer.reference_code,
                        status = %transfer.status,
                        lines = transfer.lines.len(),
                        "transfer created"
                    );
                    return Ok(CreatedTransfer {
                        transfer,
                        warnings: validation.warnings,
                        conflicts,
                    });
                }
                // Reference suffix collision; draw another.
                Err(StoreError::Duplicate(_)) if attempts < 3 => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply a status change and its stock effect as one unit.
    ///
    /// `pending -> approved` reserves source stock (when enabled), cancelling
    /// a reserved transfer releases it, and `in_transit -> completed` moves
    /// the stock. A failed stock write leaves the transfer in its prior status.
    #[instrument(skip(self, notes), fields(transfer_id = %id, to = %to, actor = %actor), err)]
    pub async fn update_transfer_status(
        &self,
        id: TransferId,
        to: TransferStatus,
        actor: UserId,
        notes: Option<&str>,
    ) -> ServiceResult<Transfer> {
        let mut transfer = self.get_transfer(id).await?;
        let from = transfer.status;
        if from == TransferStatus::Completed && to == TransferStatus::Completed {
            return Err(TransferServiceError::AlreadyCompleted(id));
        }
        from.check_transition(to)?;

        if from == TransferStatus::Draft && to == TransferStatus::Pending {
            let request = transfer.request();
            let validation = self.validate_transfer(&request).await?;
            if !validation.is_valid {
                return Err(TransferServiceError::Validation(validation));
            }
            // Drafts are not open siblings, so submission is where their claim first competes.
            self.guard_conflicts(&request, Some(id)).await?;
        }

        let expected_version = ExpectedVersion::Exact(transfer.version);
        let was_reserved = transfer.stock_reserved;
        transfer.transition(to, actor, notes, self.now())?;

        let effect = match (from, to) {
            (TransferStatus::Pending, TransferStatus::Approved) if self.settings.reserve_on_approval => {
                transfer.stock_reserved = true;
                StockEffect::Reserve {
                    source: self.require_location(transfer.source_location_id).await?,
                }
            }
            (TransferStatus::Approved | TransferStatus::InTransit, TransferStatus::Cancelled) if was_reserved => {
                transfer.stock_reserved = false;
                StockEffect::Release {
                    source: self.require_location(transfer.source_location_id).await?,
                }
            }
            (TransferStatus::InTransit, TransferStatus::Completed) => {
                transfer.stock_reserved = false;
                StockEffect::Execute {
                    source: self.require_location(transfer.source_location_id).await?,
                    destination: self.require_location(transfer.destination_location_id).await?,
                    consume_reservation: was_reserved,
                }
            }
            _ => StockEffect::None,
        };

        let commit = TransitionCommit {
            transfer,
            expected_status: from,
            expected_version,
            effect,
        };
        match self.store.commit_transition(&commit).await {
            Ok(()) => {
                info!(
                    transfer_id = %id,
                    from = %from,
                    to = %to,
                    stock_reserved = commit.transfer.stock_reserved,
                    "transfer status changed"
                );
                Ok(commit.transfer)
            }
            Err(StoreError::StatusChanged {
                actual: TransferStatus::Completed,
                ..
            }) if to == TransferStatus::Completed => Err(TransferServiceError::AlreadyCompleted(id)),
            Err(StoreError::InsufficientStock(failures)) => {
                warn!(
                    transfer_id = %id,
                    from = %from,
                    to = %to,
                    failed_items = ?failures.iter().map(|f| f.item_id).collect::<Vec<_>>(),
                    "stock effect rejected; transfer left unchanged"
                );
                Err(TransferServiceError::Execution(failures))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace all lines of a `draft` or `pending` transfer.
    #[instrument(skip(self, lines), fields(transfer_id = %id, lines = lines.len(), actor = %actor), err)]
    pub async fn update_transfer_lines(
        &self,
        id: TransferId,
        lines: Vec<LineItem>,
        actor: UserId,
    ) -> ServiceResult<Transfer> {
        let mut transfer = self.get_transfer(id).await?;
        if !matches!(transfer.status, TransferStatus::Draft | TransferStatus::Pending) {
            return Err(DomainError::conflict(format!(
                "lines cannot be changed once a transfer is {}",
                transfer.status
            ))
            .into());
        }

        let request = TransferRequest {
            source_location_id: Some(transfer.source_location_id),
            destination_location_id: Some(transfer.destination_location_id),
            transfer_date: transfer.transfer_date,
            lines,
        };
        let (validation, snapshot) = self.validate_with_snapshot(&request).await?;
        if !validation.is_valid {
            return Err(TransferServiceError::Validation(validation));
        }
        if transfer.status == TransferStatus::Pending {
            self.guard_conflicts(&request, Some(id)).await?;
        }

        let expected = ExpectedVersion::Exact(transfer.version);
        let priced = request
            .lines
            .iter()
            .map(|l| TransferLine::priced(l, snapshot.items.get(&l.item_id)))
            .collect();
        transfer.replace_lines(priced, actor, self.now())?;
        self.store.save_lines(&transfer, expected).await?;

        info!(transfer_id = %id, version = transfer.version, "transfer lines replaced");
        Ok(transfer)
    }

    pub async fn get_transfer(&self, id: TransferId) -> ServiceResult<Transfer> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TransferServiceError::NotFound(format!("transfer {id}")))
    }

    pub async fn list_transfers(&self, filter: &TransferFilter) -> ServiceResult<Vec<Transfer>> {
        Ok(self.store.list(filter).await?)
    }

    /// Balances held at a warehouse or vehicle.
    pub async fn get_warehouse_stock(
        &self,
        location_id: LocationId,
        filter: &StockFilter,
    ) -> ServiceResult<Vec<StockBalance>> {
        let location = self.require_location(location_id).await?;
        Ok(self.store.balances(&location, filter).await?)
    }

    /// Goods receipt: credit a location outside of any transfer.
    #[instrument(skip(self), err)]
    pub async fn receive_stock(
        &self,
        location_id: LocationId,
        item_id: ItemId,
        quantity_full: i64,
        quantity_empty: i64,
    ) -> ServiceResult<StockBalance> {
        if quantity_full < 0 || quantity_empty < 0 {
            return Err(DomainError::validation("received quantities must be non-negative").into());
        }
        if quantity_full > MAX_QUANTITY || quantity_empty > MAX_QUANTITY {
            return Err(
                DomainError::validation(format!("received quantity exceeds the limit of {MAX_QUANTITY}")).into(),
            );
        }
        if quantity_full == 0 && quantity_empty == 0 {
            return Err(DomainError::validation("received quantity must be positive").into());
        }

        let location = self.require_location(location_id).await?;
        if !location.is_active() {
            return Err(DomainError::validation(format!("location {} is inactive", location.code())).into());
        }
        if self.store.item(item_id).await?.is_none() {
            return Err(TransferServiceError::NotFound(format!("item {item_id}")));
        }

        let balance = self
            .store
            .receive_stock(&location, item_id, quantity_full, quantity_empty)
            .await?;
        info!(
            location = %location.code(),
            item_id = %item_id,
            quantity_full,
            quantity_empty,
            "stock received"
        );
        Ok(balance)
    }

    /// Conflict check that rejects contested requests in block mode.
    async fn guard_conflicts(
        &self,
        request: &TransferRequest,
        exclude: Option<TransferId>,
    ) -> ServiceResult<ConflictReport> {
        let report = self.check_transfer_conflicts(request, exclude).await?;
        if report.has_conflicts && self.settings.conflict_mode == ConflictMode::Block {
            return Err(TransferServiceError::Conflict(report));
        }
        Ok(report)
    }

    async fn require_location(&self, id: LocationId) -> ServiceResult<Location> {
        self.store
            .location(id)
            .await?
            .ok_or_else(|| TransferServiceError::NotFound(format!("location {id}")))
    }

    async fn validate_with_snapshot(
        &self,
        request: &TransferRequest,
    ) -> ServiceResult<(ValidationResult, LedgerSnapshot)> {
        let mut snapshot = self.catalog_snapshot(request).await?;
        if let Some(source) = snapshot.source.clone() {
            snapshot.source_balances = self.source_balances(&source, request.lines.iter().map(|l| l.item_id)).await?;
        }
        let result = self.validator.validate(request, &snapshot, self.now().date_naive());
        log_validation(&result);
        Ok((result, snapshot))
    }

    /// Locations, items and destination occupancy; source balances are left
    /// to the caller.
    async fn catalog_snapshot(&self, request: &TransferRequest) -> ServiceResult<LedgerSnapshot> {
        let mut snapshot = LedgerSnapshot::default();
        if let Some(id) = request.source_location_id {
            snapshot.source = self.store.location(id).await?;
        }
        if let Some(id) = request.destination_location_id {
            snapshot.destination = self.store.location(id).await?;
        }

        for line in &request.lines {
            if snapshot.items.contains_key(&line.item_id) {
                continue;
            }
            if let Some(item) = self.store.item(line.item_id).await? {
                snapshot.items.insert(line.item_id, item);
            }
        }

        if let Some(destination) = snapshot.destination.as_ref().filter(|d| d.unit_capacity().is_some()) {
            snapshot.destination_units_on_hand = self
                .store
                .balances(destination, &StockFilter::default())
                .await?
                .iter()
                .map(StockBalance::units_on_hand)
                .fold(0i64, i64::saturating_add);
        }
        Ok(snapshot)
    }

    async fn source_balances(
        &self,
        source: &Location,
        items: impl Iterator<Item = ItemId>,
    ) -> ServiceResult<HashMap<ItemId, StockBalance>> {
        let mut balances = HashMap::new();
        for item_id in items {
            if balances.contains_key(&item_id) {
                continue;
            }
            if let Some(balance) = self.store.balance(source, item_id).await? {
                balances.insert(item_id, balance);
            }
        }
        Ok(balances)
    }
}

fn log_validation(result: &ValidationResult) {
    if !result.is_valid {
        warn!(errors = ?result.errors, blocked = ?result.blocked_items, "transfer request invalid");
    } else if !result.warnings.is_empty() {
        warn!(warnings = ?result.warnings, "transfer request valid with warnings");
    }
}

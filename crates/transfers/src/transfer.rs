use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use gasflow_core::{AggregateRoot, DomainError, DomainResult, ItemId, LocationId, TransferId, UserId};
use gasflow_inventory::{ItemSpec, LocationKind};

use crate::status::{InvalidTransition, TransferStatus};
use crate::summary::{TransferSummary, summarize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TransferPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferPriority::Low => "low",
            TransferPriority::Normal => "normal",
            TransferPriority::High => "high",
            TransferPriority::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for TransferPriority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Low, Self::Normal, Self::High, Self::Urgent]
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown priority: {s}")))
    }
}

/// One requested line: an item and how many full/empty units to move.
///
/// Quantities are signed so that malformed client input can be reported by
/// the validator instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: ItemId,
    #[serde(default)]
    pub quantity_full: i64,
    #[serde(default)]
    pub quantity_empty: i64,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl LineItem {
    pub fn new(item_id: ItemId, quantity_full: i64, quantity_empty: i64) -> Self {
        Self {
            item_id,
            quantity_full,
            quantity_empty,
            batch_number: None,
            expiry_date: None,
        }
    }

    pub fn quantity(&self) -> i64 {
        self.quantity_full.saturating_add(self.quantity_empty)
    }
}

/// Input of the validator and the conflict checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    pub transfer_date: NaiveDate,
    pub lines: Vec<LineItem>,
}

/// Payload for creating a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub source_location_id: Option<LocationId>,
    pub destination_location_id: Option<LocationId>,
    pub transfer_date: NaiveDate,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: TransferPriority,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<LineItem>,
    /// Create directly in `pending` instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

impl NewTransfer {
    pub fn request(&self) -> TransferRequest {
        TransferRequest {
            source_location_id: self.source_location_id,
            destination_location_id: self.destination_location_id,
            transfer_date: self.transfer_date,
            lines: self.lines.clone(),
        }
    }
}

/// Persisted line of a transfer. The owning transfer id is implied by the
/// parent record (and is part of the row key in storage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLine {
    pub item_id: ItemId,
    pub quantity_full: i64,
    pub quantity_empty: i64,
    /// Shipped weight of one unit (capacity + tare), when known.
    pub unit_weight: Option<f64>,
    /// Cost of one unit in smallest currency unit, when known.
    pub unit_cost: Option<u64>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl TransferLine {
    /// Build a line from a request line, copying physical and cost attributes
    /// from the item catalog when the item is known.
    pub fn priced(item: &LineItem, spec: Option<&ItemSpec>) -> Self {
        Self {
            item_id: item.item_id,
            quantity_full: item.quantity_full,
            quantity_empty: item.quantity_empty,
            unit_weight: spec.and_then(ItemSpec::unit_weight),
            unit_cost: spec.and_then(|s| s.unit_cost),
            batch_number: item.batch_number.clone(),
            expiry_date: item.expiry_date,
        }
    }

    pub fn quantity(&self) -> i64 {
        self.quantity_full.saturating_add(self.quantity_empty)
    }

    pub fn as_line_item(&self) -> LineItem {
        LineItem {
            item_id: self.item_id,
            quantity_full: self.quantity_full,
            quantity_empty: self.quantity_empty,
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
        }
    }
}

/// Fields a new transfer record is built from (after validation).
#[derive(Debug, Clone)]
pub struct TransferDraft {
    pub id: TransferId,
    pub reference_code: String,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub destination_kind: LocationKind,
    pub transfer_date: NaiveDate,
    pub scheduled_date: Option<NaiveDate>,
    pub priority: TransferPriority,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<TransferLine>,
    pub status: TransferStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// A requested movement of stock between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub reference_code: String,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub destination_kind: LocationKind,
    pub transfer_date: NaiveDate,
    pub scheduled_date: Option<NaiveDate>,
    pub status: TransferStatus,
    pub priority: TransferPriority,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<TransferLine>,
    pub summary: TransferSummary,
    /// Whether the source currently holds a reservation for this transfer's
    /// full units.
    pub stock_reserved: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last actor to change the record (status or lines).
    pub updated_by: UserId,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_by: Option<UserId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Transfer {
    /// Build a new record. Only `draft` and `pending` are valid initial statuses.
    pub fn new(draft: TransferDraft) -> DomainResult<Self> {
        if draft.source_location_id == draft.destination_location_id {
            return Err(DomainError::invariant("source and destination must differ"));
        }
        if !matches!(draft.status, TransferStatus::Draft | TransferStatus::Pending) {
            return Err(DomainError::validation(format!(
                "transfers cannot be created in status {}",
                draft.status
            )));
        }
        ensure_lines(&draft.lines)?;

        let summary = summarize(&draft.lines);
        Ok(Self {
            id: draft.id,
            reference_code: draft.reference_code,
            source_location_id: draft.source_location_id,
            destination_location_id: draft.destination_location_id,
            destination_kind: draft.destination_kind,
            transfer_date: draft.transfer_date,
            scheduled_date: draft.scheduled_date,
            status: draft.status,
            priority: draft.priority,
            reason: draft.reason,
            notes: draft.notes,
            lines: draft.lines,
            summary,
            stock_reserved: false,
            created_by: draft.created_by,
            created_at: draft.created_at,
            updated_at: draft.created_at,
            updated_by: draft.created_by,
            approved_by: None,
            approved_at: None,
            completed_by: None,
            completed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            version: 1,
        })
    }

    /// Move to `to`, stamping the actor and appending `note`.
    ///
    /// Pure state change; stock side effects are the caller's job and must be
    /// committed together with the new status.
    pub fn transition(
        &mut self,
        to: TransferStatus,
        actor: UserId,
        note: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.status.check_transition(to)?;

        match to {
            TransferStatus::Approved => {
                self.approved_by = Some(actor);
                self.approved_at = Some(at);
            }
            TransferStatus::Completed => {
                self.completed_by = Some(actor);
                self.completed_at = Some(at);
            }
            TransferStatus::Cancelled => {
                self.cancelled_by = Some(actor);
                self.cancelled_at = Some(at);
            }
            _ => {}
        }

        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            self.append_note(to, note);
        }

        self.status = to;
        self.updated_at = at;
        self.updated_by = actor;
        self.version += 1;
        Ok(())
    }

    /// Replace all lines and recompute the summary from scratch.
    pub fn replace_lines(
        &mut self,
        lines: Vec<TransferLine>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !matches!(self.status, TransferStatus::Draft | TransferStatus::Pending) {
            return Err(DomainError::conflict(format!(
                "lines cannot be changed once a transfer is {}",
                self.status
            )));
        }
        ensure_lines(&lines)?;

        self.summary = summarize(&lines);
        self.lines = lines;
        self.updated_at = at;
        self.updated_by = actor;
        self.version += 1;
        Ok(())
    }

    pub fn request(&self) -> TransferRequest {
        TransferRequest {
            source_location_id: Some(self.source_location_id),
            destination_location_id: Some(self.destination_location_id),
            transfer_date: self.transfer_date,
            lines: self.lines.iter().map(TransferLine::as_line_item).collect(),
        }
    }

    pub fn line_for(&self, item_id: ItemId) -> Option<&TransferLine> {
        self.lines.iter().find(|l| l.item_id == item_id)
    }

    fn append_note(&mut self, status: TransferStatus, note: &str) {
        let entry = format!("[{status}] {note}");
        self.notes = Some(match self.notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{entry}"),
            _ => entry,
        });
    }
}

fn ensure_lines(lines: &[TransferLine]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation("a transfer needs at least one line"));
    }
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if line.quantity_full < 0 || line.quantity_empty < 0 {
            return Err(DomainError::validation("line quantities must be non-negative"));
        }
        if !seen.insert(line.item_id) {
            return Err(DomainError::validation(format!(
                "duplicate line for item {}",
                line.item_id
            )));
        }
    }
    Ok(())
}

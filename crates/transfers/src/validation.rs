//! Transfer validation.
//!
//! The validator is a pure function of the request, a read-only snapshot of
//! the ledger and catalog, and the current date. It accumulates every problem
//! instead of stopping at the first so a client sees all of them at once.
//! Results are never cached: the ledger can change between two calls.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use gasflow_core::{ItemId, LocationId};
use gasflow_inventory::{ItemSpec, Location, MAX_QUANTITY, StockBalance, StockLocation};

use crate::summary::summarize;
use crate::transfer::{TransferLine, TransferRequest};

/// Thresholds for soft (non-blocking) warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Warn when a line asks for more than this share of available stock.
    pub near_depletion_ratio: f64,
    /// Warn when a transfer has more lines than this.
    pub large_transfer_lines: usize,
    /// Warn when the total shipped weight (kg) exceeds this.
    pub heavy_transfer_weight: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            near_depletion_ratio: 0.9,
            large_transfer_lines: 100,
            heavy_transfer_weight: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub blocked_items: Vec<ItemId>,
    pub total_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<u64>,
}

impl ValidationResult {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn block(&mut self, item_id: ItemId) {
        if !self.blocked_items.contains(&item_id) {
            self.blocked_items.push(item_id);
        }
    }
}

/// Read-only view of everything the validator needs.
///
/// `source_balances` holds the source location's balance rows keyed by item;
/// an item without a row has no stock record at the source.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub items: HashMap<ItemId, ItemSpec>,
    pub source_balances: HashMap<ItemId, StockBalance>,
    /// Units (full + empty) currently held at the destination.
    pub destination_units_on_hand: i64,
}

impl LedgerSnapshot {
    fn label(&self, item_id: ItemId) -> String {
        self.items
            .get(&item_id)
            .map(ItemSpec::label)
            .unwrap_or_else(|| item_id.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferValidator {
    policy: ValidationPolicy,
}

impl TransferValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn validate(
        &self,
        request: &TransferRequest,
        snapshot: &LedgerSnapshot,
        today: NaiveDate,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        check_structure(request, today, &mut result);
        check_locations(request, snapshot, &mut result);
        self.check_lines(request, snapshot, &mut result);
        check_duplicates(request, snapshot, &mut result);
        self.check_soft_limits(request, snapshot, &mut result);

        result.is_valid = result.errors.is_empty();
        result
    }

    fn check_lines(&self, request: &TransferRequest, snapshot: &LedgerSnapshot, result: &mut ValidationResult) {
        for (idx, line) in request.lines.iter().enumerate() {
            let n = idx + 1;
            let label = snapshot.label(line.item_id);

            if line.quantity_full < 0 || line.quantity_empty < 0 {
                result.error(format!(
                    "line {n} ({label}): quantities must be non-negative whole numbers"
                ));
                continue;
            }
            if line.quantity_full > MAX_QUANTITY || line.quantity_empty > MAX_QUANTITY {
                result.error(format!(
                    "line {n} ({label}): quantity exceeds the per-line limit of {MAX_QUANTITY}"
                ));
                result.block(line.item_id);
                continue;
            }
            if line.quantity() == 0 {
                result.error(format!("line {n} ({label}): quantity must be positive"));
                continue;
            }
            if !snapshot.items.contains_key(&line.item_id) {
                result.error(format!("item {} not found", line.item_id));
                result.block(line.item_id);
                continue;
            }
            if snapshot.source.is_none() {
                continue;
            }

            let Some(balance) = snapshot.source_balances.get(&line.item_id) else {
                result.error(format!("no stock record for {label} at the source location"));
                result.block(line.item_id);
                continue;
            };

            let available = balance.available_for_transfer();
            if line.quantity_full > available {
                result.error(format!(
                    "insufficient full stock for {label}: requested {}, available {available}",
                    line.quantity_full
                ));
                result.block(line.item_id);
            } else if line.quantity_full > 0
                && line.quantity_full as f64 > self.policy.near_depletion_ratio * available as f64
            {
                let pct = line.quantity_full as f64 * 100.0 / available as f64;
                result.warn(format!(
                    "requesting {pct:.0}% of available stock for {label}"
                ));
            }

            if line.quantity_empty > balance.quantity_empty {
                result.error(format!(
                    "insufficient empty stock for {label}: requested {}, available {}",
                    line.quantity_empty, balance.quantity_empty
                ));
                result.block(line.item_id);
            }
        }
    }

    fn check_soft_limits(&self, request: &TransferRequest, snapshot: &LedgerSnapshot, result: &mut ValidationResult) {
        if request.lines.len() > self.policy.large_transfer_lines {
            result.warn(format!(
                "transfer has {} line items; consider splitting it",
                request.lines.len()
            ));
        }

        let priced: Vec<TransferLine> = request
            .lines
            .iter()
            .map(|l| TransferLine::priced(l, snapshot.items.get(&l.item_id)))
            .collect();
        let summary = summarize(&priced);
        result.total_weight = summary.total_weight;
        result.estimated_cost = summary.total_cost;

        if summary.total_weight > self.policy.heavy_transfer_weight {
            result.warn(format!(
                "total weight {:.1} kg exceeds {:.0} kg; may require special handling",
                summary.total_weight, self.policy.heavy_transfer_weight
            ));
        }

        if let Some(destination) = &snapshot.destination {
            if let Some(capacity) = destination.unit_capacity() {
                let after = snapshot.destination_units_on_hand.saturating_add(summary.total_quantity);
                if after > capacity {
                    result.warn(format!(
                        "destination {} would hold {after} units, above its capacity of {capacity}",
                        destination.code()
                    ));
                }
            }
        }
    }
}

fn check_structure(request: &TransferRequest, today: NaiveDate, result: &mut ValidationResult) {
    match (request.source_location_id, request.destination_location_id) {
        (None, _) | (_, None) => {
            if request.source_location_id.is_none() {
                result.error("source location is required");
            }
            if request.destination_location_id.is_none() {
                result.error("destination location is required");
            }
        }
        (Some(source), Some(destination)) if source == destination => {
            result.error("source and destination locations must be different");
        }
        _ => {}
    }

    if request.lines.is_empty() {
        result.error("at least one line item is required");
    }

    if request.transfer_date < today {
        result.error(format!(
            "transfer date {} is in the past",
            request.transfer_date
        ));
    }
}

fn check_locations(request: &TransferRequest, snapshot: &LedgerSnapshot, result: &mut ValidationResult) {
    let sides: [(&str, Option<LocationId>, Option<&Location>); 2] = [
        ("source", request.source_location_id, snapshot.source.as_ref()),
        ("destination", request.destination_location_id, snapshot.destination.as_ref()),
    ];

    for (side, requested, resolved) in sides {
        let Some(id) = requested else { continue };
        match resolved {
            Some(location) if location.id() == id => {
                if !location.is_active() {
                    result.error(format!("{side} location {} is inactive", location.code()));
                }
            }
            _ => result.error(format!("{side} location {id} not found")),
        }
    }
}

fn check_duplicates(request: &TransferRequest, snapshot: &LedgerSnapshot, result: &mut ValidationResult) {
    let mut counts: HashMap<ItemId, usize> = HashMap::new();
    for line in &request.lines {
        *counts.entry(line.item_id).or_default() += 1;
    }

    let mut reported = Vec::new();
    for line in &request.lines {
        if counts[&line.item_id] > 1 && !reported.contains(&line.item_id) {
            reported.push(line.item_id);
            result.error(format!(
                "duplicate line for item {}: each item may appear only once",
                snapshot.label(line.item_id)
            ));
        }
    }
}

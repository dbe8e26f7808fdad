//! Cross-transfer conflict detection.
//!
//! The validator only sees the ledger. Sibling transfers that are open at the
//! same source on the same date but have not touched the ledger yet are
//! invisible to it; this module adds up their claims.
//!
//! Siblings holding a reservation are already counted in the source's
//! `quantity_reserved`, so only unreserved claims are added on top of the
//! ledger's available figure. Empty units are never reserved, so every open
//! sibling's empties count.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use gasflow_core::{ItemId, TransferId};
use gasflow_inventory::StockBalance;

use crate::transfer::{Transfer, TransferRequest};

/// How detected conflicts are treated on create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictMode {
    /// Report conflicts but let the transfer through.
    #[default]
    Warn,
    /// Reject the transfer when any conflict is found.
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockKind {
    Full,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub item_id: ItemId,
    pub stock: StockKind,
    /// What the ledger shows as available at the source.
    pub available: i64,
    /// Units claimed by open siblings and not yet reflected in the ledger.
    pub claimed_by_siblings: i64,
    pub requested: i64,
    pub sibling_transfers: Vec<TransferId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub details: Vec<ConflictDetail>,
}

impl ConflictReport {
    pub fn contested_items(&self) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self.details.iter().map(|d| d.item_id).collect();
        items.dedup();
        items
    }

    pub fn describe(&self) -> Vec<String> {
        self.details
            .iter()
            .map(|d| {
                format!(
                    "item {} ({:?}): requested {} + {} claimed by {} open transfer(s) exceeds {} available",
                    d.item_id,
                    d.stock,
                    d.requested,
                    d.claimed_by_siblings,
                    d.sibling_transfers.len(),
                    d.available
                )
            })
            .collect()
    }
}

#[derive(Default)]
struct Claim {
    unreserved: i64,
    transfers: Vec<TransferId>,
}

/// Compare `request` against open `siblings` at the same source and date.
///
/// `siblings` may contain anything; only transfers at the same source on the
/// same date in `pending`, `approved` or `in_transit` count, and `exclude`
/// (the transfer being re-checked) is skipped. `balances` holds the source's
/// balance rows by item.
pub fn check_conflicts(
    request: &TransferRequest,
    exclude: Option<TransferId>,
    siblings: &[Transfer],
    balances: &HashMap<ItemId, StockBalance>,
) -> ConflictReport {
    let Some(source) = request.source_location_id else {
        return ConflictReport::default();
    };

    let mut claims: BTreeMap<(ItemId, StockKind), Claim> = BTreeMap::new();
    let open_siblings = siblings.iter().filter(|t| {
        t.source_location_id == source
            && t.transfer_date == request.transfer_date
            && t.status.is_open()
            && Some(t.id) != exclude
    });

    for sibling in open_siblings {
        for line in &sibling.lines {
            if line.quantity_full > 0 {
                let claim = claims.entry((line.item_id, StockKind::Full)).or_default();
                if !sibling.stock_reserved {
                    claim.unreserved = claim.unreserved.saturating_add(line.quantity_full);
                }
                claim.transfers.push(sibling.id);
            }
            if line.quantity_empty > 0 {
                let claim = claims.entry((line.item_id, StockKind::Empty)).or_default();
                claim.unreserved = claim.unreserved.saturating_add(line.quantity_empty);
                claim.transfers.push(sibling.id);
            }
        }
    }

    let mut details = Vec::new();
    for line in &request.lines {
        let balance = balances.get(&line.item_id);
        let wanted = [
            (StockKind::Full, line.quantity_full, balance.map_or(0, StockBalance::available_for_transfer)),
            (StockKind::Empty, line.quantity_empty, balance.map_or(0, |b| b.quantity_empty)),
        ];

        for (stock, requested, available) in wanted {
            if requested <= 0 {
                continue;
            }
            let Some(claim) = claims.get(&(line.item_id, stock)) else {
                continue;
            };
            if claim.unreserved > 0 && claim.unreserved.saturating_add(requested) > available {
                details.push(ConflictDetail {
                    item_id: line.item_id,
                    stock,
                    available,
                    claimed_by_siblings: claim.unreserved,
                    requested,
                    sibling_transfers: claim.transfers.clone(),
                });
            }
        }
    }

    ConflictReport {
        has_conflicts: !details.is_empty(),
        details,
    }
}

//! Aggregate totals derived from transfer lines.
//!
//! Totals are always recomputed from the full line list; they are never
//! patched incrementally.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::transfer::TransferLine;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub total_items: usize,
    pub total_quantity: i64,
    pub total_weight: f64,
    /// `None` when no line carries cost data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<u64>,
    pub distinct_variants: usize,
}

/// Compute totals over `lines`.
///
/// Lines without a unit weight add nothing to the weight; lines without a
/// unit cost add nothing to the cost. Negative quantities are treated as zero
/// here (the validator reports them).
pub fn summarize(lines: &[TransferLine]) -> TransferSummary {
    let mut total_quantity = 0i64;
    let mut total_weight = 0f64;
    let mut total_cost: Option<u64> = None;
    let mut variants = HashSet::new();

    for line in lines {
        let quantity = line.quantity_full.max(0).saturating_add(line.quantity_empty.max(0));
        total_quantity = total_quantity.saturating_add(quantity);

        if let Some(unit_weight) = line.unit_weight {
            total_weight += unit_weight * quantity as f64;
        }
        if let Some(unit_cost) = line.unit_cost {
            let line_cost = unit_cost.saturating_mul(quantity as u64);
            total_cost = Some(total_cost.unwrap_or(0).saturating_add(line_cost));
        }
        variants.insert(line.item_id);
    }

    TransferSummary {
        total_items: lines.len(),
        total_quantity,
        total_weight,
        total_cost,
        distinct_variants: variants.len(),
    }
}

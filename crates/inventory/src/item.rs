use serde::{Deserialize, Serialize};

use gasflow_core::ItemId;

/// Item record as consumed from the product catalog.
///
/// Physical attributes are optional: weight is advisory, so an item without
/// them simply contributes nothing to weight totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub id: ItemId,
    pub sku: String,
    pub name: String,
    /// Variant label (e.g. "14.2kg", "19kg commercial").
    pub variant: Option<String>,
    /// Gas capacity of one cylinder, in kg.
    pub capacity_kg: Option<f64>,
    /// Empty cylinder (tare) weight, in kg.
    pub tare_weight_kg: Option<f64>,
    /// Unit cost in smallest currency unit (e.g. cents).
    pub unit_cost: Option<u64>,
}

impl ItemSpec {
    pub fn new(id: ItemId, sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            variant: None,
            capacity_kg: None,
            tare_weight_kg: None,
            unit_cost: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_weights(mut self, capacity_kg: f64, tare_weight_kg: f64) -> Self {
        self.capacity_kg = Some(capacity_kg);
        self.tare_weight_kg = Some(tare_weight_kg);
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: u64) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    /// Weight of one unit as shipped: capacity + tare.
    ///
    /// `None` unless both attributes are known.
    pub fn unit_weight(&self) -> Option<f64> {
        match (self.capacity_kg, self.tare_weight_kg) {
            (Some(capacity), Some(tare)) => Some(capacity + tare),
            _ => None,
        }
    }

    /// Human-readable label used in validation messages.
    pub fn label(&self) -> String {
        match &self.variant {
            Some(v) => format!("{} ({})", self.sku, v),
            None => self.sku.clone(),
        }
    }
}

//! Stock-holding locations.
//!
//! Warehouses and vehicles keep separate ledgers in storage but present one
//! capability (`StockLocation`) to the transfer engine, so the executor never
//! has to look up which kind of destination it is talking to.

use serde::{Deserialize, Serialize};

use gasflow_core::{DomainError, LocationId};

/// Kind of stock-holding location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Warehouse,
    Vehicle,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Warehouse => "warehouse",
            LocationKind::Vehicle => "vehicle",
        }
    }
}

impl core::str::FromStr for LocationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warehouse" => Ok(LocationKind::Warehouse),
            "vehicle" => Ok(LocationKind::Vehicle),
            other => Err(DomainError::validation(format!("unknown location kind: {other}"))),
        }
    }
}

impl core::fmt::Display for LocationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by every place that can hold stock.
pub trait StockLocation: core::fmt::Debug + Send + Sync {
    fn id(&self) -> LocationId;

    /// Short code used in transfer reference codes (e.g. "WH01", "TRK-7").
    fn code(&self) -> &str;

    fn name(&self) -> &str;

    fn kind(&self) -> LocationKind;

    /// Maximum number of units (full + empty) the location can hold, if bounded.
    fn unit_capacity(&self) -> Option<i64>;

    fn is_active(&self) -> bool;
}

/// A depot/warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: LocationId,
    pub code: String,
    pub name: String,
    pub capacity: Option<i64>,
    pub active: bool,
}

/// A delivery truck; its code is the registration plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: LocationId,
    pub plate: String,
    pub name: String,
    pub load_capacity: Option<i64>,
    pub active: bool,
}

impl StockLocation for Warehouse {
    fn id(&self) -> LocationId {
        self.id
    }

    fn code(&self) -> &str {
        &self.code
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LocationKind {
        LocationKind::Warehouse
    }

    fn unit_capacity(&self) -> Option<i64> {
        self.capacity
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl StockLocation for Vehicle {
    fn id(&self) -> LocationId {
        self.id
    }

    fn code(&self) -> &str {
        &self.plate
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LocationKind {
        LocationKind::Vehicle
    }

    fn unit_capacity(&self) -> Option<i64> {
        self.load_capacity
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Owned location record as returned by the location catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Warehouse(Warehouse),
    Vehicle(Vehicle),
}

impl Location {
    pub fn as_stock_location(&self) -> &dyn StockLocation {
        match self {
            Location::Warehouse(w) => w,
            Location::Vehicle(v) => v,
        }
    }
}

impl StockLocation for Location {
    fn id(&self) -> LocationId {
        self.as_stock_location().id()
    }

    fn code(&self) -> &str {
        self.as_stock_location().code()
    }

    fn name(&self) -> &str {
        self.as_stock_location().name()
    }

    fn kind(&self) -> LocationKind {
        self.as_stock_location().kind()
    }

    fn unit_capacity(&self) -> Option<i64> {
        self.as_stock_location().unit_capacity()
    }

    fn is_active(&self) -> bool {
        self.as_stock_location().is_active()
    }
}

impl From<Warehouse> for Location {
    fn from(value: Warehouse) -> Self {
        Location::Warehouse(value)
    }
}

impl From<Vehicle> for Location {
    fn from(value: Vehicle) -> Self {
        Location::Vehicle(value)
    }
}

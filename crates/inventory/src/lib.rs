//! Stock ledger domain module.
//!
//! This crate contains the business rules for per-location stock balances,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).
//! Storage adapters in `gasflow-infra` apply these rules as conditional writes.

pub mod balance;
pub mod item;
pub mod location;

pub use balance::{MAX_QUANTITY, StockBalance, StockFilter};
pub use item::ItemSpec;
pub use location::{Location, LocationKind, StockLocation, Vehicle, Warehouse};

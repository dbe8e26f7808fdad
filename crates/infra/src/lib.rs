//! Infrastructure layer: storage ports and adapters, the atomic stock-move
//! executor, configuration and the transfer service that ties them together.

pub mod catalog;
pub mod config;
pub mod error;
pub mod in_memory;
pub mod ledger;
pub mod postgres;
pub mod service;
pub mod transfer_store;

#[cfg(test)]
mod integration_tests;

pub use catalog::Catalog;
pub use config::{AppConfig, ConfigError, EngineSettings};
pub use error::{LineFailure, StoreError};
pub use in_memory::InMemoryStore;
pub use ledger::{AvailabilityCheck, StockLedger};
pub use postgres::PostgresStore;
pub use service::{CreatedTransfer, ServiceResult, TransferService, TransferServiceError, TransferStore};
pub use transfer_store::{StockEffect, TransferFilter, TransferRepository, TransitionCommit};

//! Stock transfer domain module.
//!
//! Transfer records and their lifecycle, multi-item line semantics, the
//! validator, the sibling-conflict checker and the summary calculator. All of
//! it is deterministic domain logic; reads are handed in as snapshots and
//! writes are performed by `gasflow-infra`.

pub mod conflict;
pub mod reference;
pub mod status;
pub mod summary;
pub mod transfer;
pub mod validation;

pub use conflict::{ConflictDetail, ConflictMode, ConflictReport, StockKind, check_conflicts};
pub use reference::{random_suffix, reference_code};
pub use status::{InvalidTransition, TransferStatus};
pub use summary::{TransferSummary, summarize};
pub use transfer::{
    LineItem, NewTransfer, Transfer, TransferDraft, TransferLine, TransferPriority,
    TransferRequest,
};
pub use validation::{LedgerSnapshot, TransferValidator, ValidationPolicy, ValidationResult};

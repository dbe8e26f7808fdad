use serde::Deserialize;

use gasflow_core::{ItemId, TransferId};
use gasflow_transfers::{LineItem, TransferRequest, TransferStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: TransferStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceLinesRequest {
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckRequest {
    #[serde(flatten)]
    pub request: TransferRequest,
    /// Transfer to leave out of the comparison (the one being edited).
    pub exclude: Option<TransferId>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub item_id: ItemId,
    #[serde(default)]
    pub quantity_full: i64,
    #[serde(default)]
    pub quantity_empty: i64,
}

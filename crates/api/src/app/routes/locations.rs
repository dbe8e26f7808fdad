use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use gasflow_core::LocationId;
use gasflow_inventory::StockFilter;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route("/:id/stock", get(get_stock).post(receive_stock))
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(filter): Query<StockFilter>,
) -> axum::response::Response {
    let location_id: LocationId = match errors::parse_id(&id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.get_warehouse_stock(location_id, &filter).await {
        Ok(balances) => (StatusCode::OK, Json(balances)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    actor: ActorContext,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveStockRequest>,
) -> axum::response::Response {
    let location_id: LocationId = match errors::parse_id(&id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    tracing::info!(
        location_id = %location_id,
        item_id = %body.item_id,
        actor = %actor.actor_id(),
        "stock receipt"
    );

    match services
        .transfers
        .receive_stock(location_id, body.item_id, body.quantity_full, body.quantity_empty)
        .await
    {
        Ok(balance) => (StatusCode::OK, Json(balance)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use gasflow_core::TransferId;
use gasflow_infra::TransferFilter;
use gasflow_transfers::{NewTransfer, TransferRequest};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_transfer).get(list_transfers))
        .route("/validate", post(validate_transfer))
        .route("/conflicts", post(check_conflicts))
        .route("/:id", get(get_transfer))
        .route("/:id/lines", put(replace_lines))
        .route("/:id/status", post(update_status))
}

pub async fn validate_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<TransferRequest>,
) -> axum::response::Response {
    match services.transfers.validate_transfer(&body).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn check_conflicts(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ConflictCheckRequest>,
) -> axum::response::Response {
    match services
        .transfers
        .check_transfer_conflicts(&body.request, body.exclude)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    actor: ActorContext,
    Json(body): Json<NewTransfer>,
) -> axum::response::Response {
    match services.transfers.create_transfer(body, actor.actor_id()).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_transfers(
    Extension(services): Extension<Arc<AppServices>>,
    Query(filter): Query<TransferFilter>,
) -> axum::response::Response {
    match services.transfers.list_transfers(&filter).await {
        Ok(transfers) => (StatusCode::OK, Json(transfers)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.get_transfer(id).await {
        Ok(transfer) => (StatusCode::OK, Json(transfer)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn replace_lines(
    Extension(services): Extension<Arc<AppServices>>,
    actor: ActorContext,
    Path(id): Path<String>,
    Json(body): Json<dto::ReplaceLinesRequest>,
) -> axum::response::Response {
    let id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.update_transfer_lines(id, body.lines, actor.actor_id()).await {
        Ok(transfer) => (StatusCode::OK, Json(transfer)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    actor: ActorContext,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateStatusRequest>,
) -> axum::response::Response {
    let id: TransferId = match errors::parse_id(&id, "transfer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .transfers
        .update_transfer_status(id, body.status, actor.actor_id(), body.notes.as_deref())
        .await
    {
        Ok(transfer) => (StatusCode::OK, Json(transfer)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

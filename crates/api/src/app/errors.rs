use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use gasflow_core::DomainError;
use gasflow_infra::TransferServiceError;

pub fn service_error_to_response(err: TransferServiceError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        TransferServiceError::Validation(result) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": "validation_failed",
                "message": message,
                "errors": result.errors,
                "warnings": result.warnings,
                "blocked_items": result.blocked_items,
            })),
        )
            .into_response(),
        TransferServiceError::InvalidTransition(t) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "invalid_transition",
                "message": message,
                "from": t.from,
                "to": t.to,
            })),
        )
            .into_response(),
        TransferServiceError::Conflict(report) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "transfer_conflict",
                "message": message,
                "details": report.details,
            })),
        )
            .into_response(),
        TransferServiceError::Execution(failures) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": message,
                "failed_items": failures,
            })),
        )
            .into_response(),
        TransferServiceError::AlreadyCompleted(_) => json_error(StatusCode::CONFLICT, "already_completed", message),
        TransferServiceError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        TransferServiceError::Concurrency(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        TransferServiceError::Domain(e) => domain_error_to_response(e),
        TransferServiceError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let status = match err {
        DomainError::Validation(_) | DomainError::InvalidId(_) => StatusCode::BAD_REQUEST,
        DomainError::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) => StatusCode::CONFLICT,
    };
    json_error(status, err.code(), err.detail())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path identifier, answering 400 on garbage.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gasflow_core::TransferId;
    use gasflow_infra::StoreError;
    use gasflow_transfers::{InvalidTransition, TransferStatus, ValidationResult};

    #[test]
    fn status_codes_follow_the_error_kind() {
        let cases = [
            (
                TransferServiceError::Validation(ValidationResult::default()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                TransferServiceError::InvalidTransition(InvalidTransition {
                    from: TransferStatus::Completed,
                    to: TransferStatus::Pending,
                }),
                StatusCode::CONFLICT,
            ),
            (
                TransferServiceError::AlreadyCompleted(TransferId::new()),
                StatusCode::CONFLICT,
            ),
            (TransferServiceError::NotFound("transfer".into()), StatusCode::NOT_FOUND),
            (
                TransferServiceError::Domain(DomainError::validation("bad")),
                StatusCode::BAD_REQUEST,
            ),
            (
                TransferServiceError::Store(StoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(service_error_to_response(err).status(), expected);
        }
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id::<TransferId>("nope", "transfer").is_err());
        let id = TransferId::new();
        assert_eq!(parse_id::<TransferId>(&id.to_string(), "transfer").ok(), Some(id));
    }
}

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use gasflow_core::UserId;

use crate::app::errors;
use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Attach an [`ActorContext`] when the request names its actor.
///
/// A missing header is fine here (reads are anonymous); a malformed one is
/// rejected outright.
pub async fn actor_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    match extract_actor(req.headers()) {
        Ok(Some(actor_id)) => {
            req.extensions_mut().insert(ActorContext::new(actor_id));
        }
        Ok(None) => {}
        Err(message) => return errors::json_error(StatusCode::UNAUTHORIZED, "invalid_actor", message),
    }

    next.run(req).await
}

fn extract_actor(headers: &HeaderMap) -> Result<Option<UserId>, &'static str> {
    let Some(header) = headers.get(ACTOR_HEADER) else {
        return Ok(None);
    };

    let value = header.to_str().map_err(|_| "x-actor-id must be ASCII")?.trim();
    if value.is_empty() {
        return Ok(None);
    }

    value.parse().map(Some).map_err(|_| "x-actor-id must be a UUID")
}

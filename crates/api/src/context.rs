use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Response,
};

use gasflow_core::UserId;

use crate::app::errors;

/// Acting user for a request, taken from the `x-actor-id` header.
///
/// Handlers that change state take this as an extractor; requests without
/// the header are rejected with 401 before the handler runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor_id: UserId,
}

impl ActorContext {
    pub fn new(actor_id: UserId) -> Self {
        Self { actor_id }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<ActorContext>().copied().ok_or_else(|| {
            errors::json_error(
                StatusCode::UNAUTHORIZED,
                "missing_actor",
                "x-actor-id header is required",
            )
        })
    }
}

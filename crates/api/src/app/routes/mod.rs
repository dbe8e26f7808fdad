use axum::Router;

pub mod locations;
pub mod system;
pub mod transfers;

/// Router for all domain endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/transfers", transfers::router())
        .nest("/locations", locations::router())
}

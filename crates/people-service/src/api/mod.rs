pub mod routes;

use crate::state::PeopleServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: PeopleServiceState) -> Router {
    let body_limit = state.config().max_upload_bytes;

    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Video upload
        .route("/upload_people", post(routes::upload_people))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

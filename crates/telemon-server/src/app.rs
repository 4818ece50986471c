use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::api;
use crate::logging;
use crate::state::AppState;

/// Routes plus middleware. Requests pass logging, then the trusted-subnet
/// check, then body decoding, then hash verification.
pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/ping", get(api::ping))
        .route("/update/", post(api::update_json))
        .route("/update/:kind/:name/:value", post(api::update_from_path))
        .route("/updates/", post(api::update_batch))
        .route("/value/", post(api::value_json))
        .route("/value/:kind/:name", get(api::value_from_path))
        .layer(DefaultBodyLimit::max(crate::middleware::MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::verify_hash,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::decode_body,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::trusted_subnet,
        ))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}

use crate::state::AppState;
use crate::{api, logging, middleware as guard};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

/// Routes that mutate the store. These sit behind the trusted-subnet check.
fn ingest_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/update/", post(api::update_from_json))
        .route("/update/:kind/:name/:value", post(api::update_from_path))
        .route("/updates/", post(api::update_batch))
        .route_layer(middleware::from_fn_with_state(
            state,
            guard::trusted_subnet_middleware,
        ))
}

fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api::index))
        .route("/ping", get(api::ping))
        .route("/value/", post(api::value_json))
        .route("/value/:kind/:name", get(api::value_text))
}

pub fn build_http_app(state: AppState) -> Router {
    ingest_routes(state.clone())
        .merge(read_routes())
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}

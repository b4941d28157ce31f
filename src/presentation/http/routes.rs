//! Route Configuration
//!
//! Public account routes, cookie-protected chat routes, and the
//! operational endpoints.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::{auth_middleware, rate_limit_ip};
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/account", account_routes(state.clone()))
        .merge(chat_routes(state.clone()))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// Account routes (public, IP rate limited)
fn account_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/signup", post(handlers::auth::signup))
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/logout", post(handlers::auth::logout))
        .route_layer(middleware::from_fn_with_state(state, rate_limit_ip))
}

/// Chat routes (cookie session required, IP rate limited)
fn chat_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/messages", get(handlers::message::get_messages))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route_layer(middleware::from_fn_with_state(state, rate_limit_ip))
}

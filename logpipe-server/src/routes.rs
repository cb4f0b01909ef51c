use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers;

/// The full IFE route table (spec §6).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/log", post(handlers::submit_log))
        .route("/api/logs/batch", post(handlers::submit_batch))
        .route("/api/logs/:device_id", get(handlers::query_logs))
        .route("/api/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

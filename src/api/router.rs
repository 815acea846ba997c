use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    Router::new()
        .route("/api/usage/activity", post(handlers::observe_activity))
        .route("/api/usage/evaluate", post(handlers::evaluate_quota))
        .route("/api/usage/record", post(handlers::record_operation))
        .route("/api/usage/summary", get(handlers::ledger_summary))
        .route("/api/usage/users/:user_id/stats", get(handlers::user_stats))
        .route(
            "/api/usage/servers/:server_id/users",
            get(handlers::server_users),
        )
        .route("/api/usage/bans", post(handlers::ban_user))
        .route("/api/usage/bans/:user_id", delete(handlers::unban_user))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}

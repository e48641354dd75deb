use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Instrumented demo workload ──────────────────────────
        .route("/api/work/:kind", get(handlers::work::do_work))
        // ── View data ───────────────────────────────────────────
        .route("/api/views", get(handlers::views::list_views))
        .route("/api/views/*name", get(handlers::views::get_view))
        .route("/api/stream", get(handlers::views::views_stream))
        // ── Export channel ──────────────────────────────────────
        .route("/api/exports", get(handlers::views::recent_exports))
        .route("/api/exports/collect", post(handlers::views::force_collect))
        .route("/api/subscriptions", get(handlers::views::subscriptions))
        .route("/api/subscriptions/add", post(handlers::views::subscribe))
        .route("/api/subscriptions/remove", post(handlers::views::unsubscribe))
        // ── Load generator control ──────────────────────────────
        .route("/api/load/start", post(handlers::load::start_load))
        .route("/api/load/stop", post(handlers::load::stop_load))
        .route("/api/load/status", get(handlers::load::load_status))
        // ── Every matched route is tracked as a server call ─────
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            timing::timing_middleware,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

//! Admin and read-only HTTP surface.
//!
//! Every endpoint answers structured JSON with a `success` flag; only
//! catastrophic failures surface as HTTP 500.

mod admin;
mod views;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::cycle::EngineContext;

#[derive(Clone)]
pub struct AppState {
    pub ctx: EngineContext,
    /// Serialises cycle runs; a second request while one is in flight is
    /// rejected instead of queued.
    pub cycle_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/admin/run-cycle", post(admin::run_cycle))
        .route("/admin/monitor-orders", post(admin::monitor_orders))
        .route("/admin/initialize-portfolios", post(admin::initialize_portfolios))
        .route("/api/leaderboard", get(views::leaderboard))
        .route("/api/live-metrics", get(views::live_metrics))
        .route("/api/active-positions", get(views::active_positions))
        .route("/api/ai-decisions-history", get(views::decisions_history))
        .route("/api/cancelled-orders", get(views::cancelled_orders))
        .route("/api/recent-trades", get(views::recent_trades))
        .route("/api/ai-trades/:firm", get(views::firm_trades))
        .layer(axum_mw::from_fn(crate::middleware::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! Admin endpoints: health, cycle trigger, monitor trigger, portfolio
//! bootstrap.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

use super::AppState;
use crate::analysis::PipelineReevaluator;
use crate::cycle::run_cycle as run_cycle_once;
use crate::models::Portfolio;
use crate::orders::{MonitorConfig, OrderMonitor};
use crate::retry::RetryPolicy;

const MONITOR_SECRET_HEADER: &str = "x-monitor-secret";

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.ctx.store.ping().await.is_ok();
    Json(json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "store_reachable": store_ok,
        "system_enabled": state.ctx.config.system_enabled,
        "bankroll_mode": state.ctx.config.bankroll_mode.as_str(),
        "dry_run": state.ctx.config.dry_run,
        "configured_keys": state.ctx.config.configured_key_flags(),
    }))
}

/// Run one cycle synchronously. A deadline overrun is a PARTIAL summary
/// with HTTP 200, not an error.
pub async fn run_cycle_handler_inner(state: &AppState) -> Json<Value> {
    if !state.ctx.config.system_enabled {
        return Json(json!({
            "success": false,
            "error": "system disabled by configuration",
        }));
    }

    let Ok(_guard) = state.cycle_lock.try_lock() else {
        return Json(json!({
            "success": false,
            "error": "cycle already running",
        }));
    };

    match run_cycle_once(&state.ctx).await {
        Ok(summary) => Json(json!({
            "success": true,
            "cycle_id": summary.cycle_id,
            "status": summary.status.as_str(),
            "markets_fetched": summary.markets_fetched,
            "markets_tradable": summary.markets_tradable,
            "predictions_saved": summary.predictions_saved,
            "bets_approved": summary.bets_approved,
            "bets_executed": summary.bets_executed,
            "bets_failed": summary.bets_failed,
            "skips": summary.skips,
        })),
        Err(e) => {
            error!(error = %e, "cycle run failed");
            Json(json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}

pub async fn run_cycle(state: State<AppState>) -> Json<Value> {
    run_cycle_handler_inner(&state.0).await
}

/// One monitor pass. Requires the shared secret header; anything else is
/// rejected before any work happens.
pub async fn monitor_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let presented = headers
        .get(MONITOR_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented != state.ctx.config.monitor_secret {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let reevaluator = Arc::new(PipelineReevaluator {
        venue: state.ctx.venue.clone(),
        model: state.ctx.model.clone(),
        collectors: state.ctx.collectors.clone(),
        cache: state.ctx.cache.clone(),
        roster: state.ctx.roster.clone(),
        retry: RetryPolicy::default(),
    });
    let monitor = OrderMonitor::new(
        state.ctx.store.clone(),
        state.ctx.venue.clone(),
        reevaluator,
        MonitorConfig::default(),
    );

    match monitor.run_pass(Utc::now()).await {
        Ok(summary) => Ok(Json(json!({
            "success": true,
            "reviewed": summary.reviewed,
            "strikes_issued": summary.strikes_issued,
            "resets": summary.resets,
            "cancelled": summary.cancelled,
            "skipped": summary.skipped,
        }))),
        Err(e) => {
            error!(error = %e, "monitor pass failed");
            Ok(Json(json!({
                "success": false,
                "error": e.to_string(),
            })))
        }
    }
}

/// Create the five firm portfolios if absent. Idempotent.
pub async fn initialize_portfolios(State(state): State<AppState>) -> Json<Value> {
    let initial = state.ctx.config.bankroll_mode.initial_balance();
    let roster = state.ctx.roster.clone();
    let now = Utc::now();

    let created = state
        .ctx
        .store
        .with_tx(move |tx| {
            let mut created = Vec::new();
            for firm in &roster {
                if tx.get_portfolio(&firm.name)?.is_none() {
                    tx.upsert_portfolio(&Portfolio::new(&firm.name, initial, now))?;
                    created.push(firm.name.clone());
                }
            }
            Ok(created)
        })
        .await;

    match created {
        Ok(created) => Json(json!({
            "success": true,
            "created": created,
            "initial_balance": initial,
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string(),
        })),
    }
}

//! Read-only views over the store for the dashboard.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::models::BetStatus;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn failure(e: impl std::fmt::Display) -> Json<Value> {
    Json(json!({ "success": false, "error": e.to_string() }))
}

/// Firms ranked by bankroll, with realised pnl against the initial stake.
pub async fn leaderboard(State(state): State<AppState>) -> Json<Value> {
    let portfolios = match state.ctx.store.with_tx(|tx| tx.list_portfolios()).await {
        Ok(p) => p,
        Err(e) => return failure(e),
    };

    let mut rows: Vec<Value> = portfolios
        .iter()
        .map(|p| {
            let pnl = p.balance - p.initial_balance;
            let pnl_pct = if p.initial_balance > 0.0 {
                pnl / p.initial_balance * 100.0
            } else {
                0.0
            };
            json!({
                "firm": p.firm,
                "balance": p.balance,
                "initial_balance": p.initial_balance,
                "peak_balance": p.peak_balance,
                "pnl": pnl,
                "pnl_pct": pnl_pct,
                "consecutive_wins": p.consecutive_wins,
                "consecutive_losses": p.consecutive_losses,
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        let av = a["balance"].as_f64().unwrap_or(0.0);
        let bv = b["balance"].as_f64().unwrap_or(0.0);
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });

    Json(json!({ "success": true, "leaderboard": rows }))
}

pub async fn live_metrics(State(state): State<AppState>) -> Json<Value> {
    let result = state
        .ctx
        .store
        .with_tx(|tx| {
            let portfolios = tx.list_portfolios()?;
            let cycle = tx.latest_cycle()?;
            let open = tx.list_unresolved_bets()?;
            Ok((portfolios, cycle, open))
        })
        .await;

    match result {
        Ok((portfolios, cycle, open)) => {
            let total_balance: f64 = portfolios.iter().map(|p| p.balance).sum();
            let total_initial: f64 = portfolios.iter().map(|p| p.initial_balance).sum();
            let open_exposure: f64 = open.iter().map(|b| b.size).sum();
            Json(json!({
                "success": true,
                "total_balance": total_balance,
                "total_initial": total_initial,
                "total_pnl": total_balance - total_initial,
                "open_positions": open.len(),
                "open_exposure": open_exposure,
                "latest_cycle": cycle,
            }))
        }
        Err(e) => failure(e),
    }
}

pub async fn active_positions(State(state): State<AppState>) -> Json<Value> {
    match state.ctx.store.with_tx(|tx| tx.list_unresolved_bets()).await {
        Ok(bets) => Json(json!({ "success": true, "positions": bets })),
        Err(e) => failure(e),
    }
}

pub async fn decisions_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100);
    match state
        .ctx
        .store
        .with_tx(move |tx| tx.list_predictions(limit))
        .await
    {
        Ok(predictions) => Json(json!({
            "success": true,
            "count": predictions.len(),
            "decisions": predictions,
        })),
        Err(e) => failure(e),
    }
}

pub async fn cancelled_orders(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100);
    match state
        .ctx
        .store
        .with_tx(move |tx| tx.list_cancelled_orders(limit))
        .await
    {
        Ok(orders) => Json(json!({ "success": true, "cancelled_orders": orders })),
        Err(e) => failure(e),
    }
}

pub async fn recent_trades(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(50);
    match state
        .ctx
        .store
        .with_tx(move |tx| tx.list_recent_bets(limit))
        .await
    {
        Ok(bets) => {
            let executed: Vec<_> = bets
                .into_iter()
                .filter(|b| b.status != BetStatus::Approved)
                .collect();
            Json(json!({ "success": true, "trades": executed }))
        }
        Err(e) => failure(e),
    }
}

pub async fn firm_trades(
    State(state): State<AppState>,
    Path(firm): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(50);
    let known = state.ctx.roster.iter().any(|f| f.name == firm);
    if !known {
        return Json(json!({
            "success": false,
            "error": format!("unknown firm: {firm}"),
        }));
    }
    match state
        .ctx
        .store
        .with_tx(move |tx| tx.list_bets_for_firm(&firm, limit))
        .await
    {
        Ok(bets) => Json(json!({ "success": true, "trades": bets })),
        Err(e) => failure(e),
    }
}

//! Cycle orchestrator.
//!
//! Drives one full run over firms x markets. Firms are processed
//! sequentially on purpose: five concurrent firms each loading collector
//! output and model responses blew past the hosting memory budget, and
//! the shared cycle cache keeps most collector work deduplicated anyway.
//! The deadline is enforced between `(firm, market)` pairs so an in-flight
//! submission is never interrupted.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::request_decision;
use crate::cache::CycleCache;
use crate::collectors::CollectorSet;
use crate::config::Config;
use crate::decision::validate_decision;
use crate::errors::EngineError;
use crate::llm::ModelClient;
use crate::markets::fetch_tradable_markets;
use crate::models::{CycleRecord, CycleStatus, Firm, Market};
use crate::orders::{OrderExecutor, SubmitOutcome};
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;
use crate::risk::RiskGuard;
use crate::sizing::{choose_side, desired_size, net_ev};
use crate::store::Store;
use crate::venue::VenueApi;

/// Everything an operation needs, owned explicitly. No package-level
/// mutable state anywhere in the engine.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Store,
    pub venue: Arc<dyn VenueApi>,
    pub model: Arc<dyn ModelClient>,
    pub collectors: CollectorSet,
    pub cache: Arc<CycleCache>,
    pub config: Arc<Config>,
    pub roster: Vec<Firm>,
}

impl EngineContext {
    pub fn risk_guard(&self) -> RiskGuard {
        RiskGuard {
            daily_bet_cap: self.config.bankroll_mode.daily_bet_cap(),
            daily_spend_cap: self.config.bankroll_mode.daily_spend_cap(),
            min_bet: self.config.sizing.min_bet,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SkipEntry {
    pub firm: String,
    pub market_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub status: CycleStatus,
    pub markets_fetched: usize,
    pub markets_tradable: usize,
    pub predictions_saved: usize,
    pub bets_approved: usize,
    pub bets_executed: usize,
    pub bets_failed: usize,
    pub skips: Vec<SkipEntry>,
}

enum PairOutcome {
    AlreadyEvaluated,
    /// Skipped before a prediction existed (model or schema failure).
    NoPrediction(String),
    /// Prediction saved, no bet followed.
    Skipped(String),
    RiskRejected(String),
    Submitted,
    Failed,
}

/// Run one full cycle.
pub async fn run_cycle(ctx: &EngineContext) -> Result<CycleSummary, EngineError> {
    let started_at = Utc::now();
    let cycle_id = Uuid::new_v4().to_string();

    let mut record = CycleRecord {
        id: cycle_id.clone(),
        started_at,
        finished_at: None,
        status: CycleStatus::Running,
        markets_fetched: 0,
        markets_tradable: 0,
        bets_approved: 0,
        bets_executed: 0,
        bets_failed: 0,
        per_category_counts: HashMap::new(),
    };
    ctx.store.with_tx(|tx| tx.insert_cycle(&record)).await?;

    // Stale per-cycle state never survives into a new run.
    ctx.cache.clear();

    let fetch = match fetch_tradable_markets(
        ctx.venue.as_ref(),
        ctx.config.market_page_size,
        ctx.config.market_cap,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            record.status = CycleStatus::Failed;
            record.finished_at = Some(Utc::now());
            ctx.store.with_tx(|tx| tx.finish_cycle(&record)).await?;
            return Err(e);
        }
    };

    record.markets_fetched = fetch.fetched as i64;
    record.markets_tradable = fetch.markets.len() as i64;
    for market in &fetch.markets {
        *record
            .per_category_counts
            .entry(market.category.as_str().to_string())
            .or_insert(0) += 1;
    }

    let mut summary = CycleSummary {
        cycle_id: cycle_id.clone(),
        status: CycleStatus::Completed,
        markets_fetched: fetch.fetched,
        markets_tradable: fetch.markets.len(),
        predictions_saved: 0,
        bets_approved: 0,
        bets_executed: 0,
        bets_failed: 0,
        skips: fetch
            .rejections
            .iter()
            .map(|(market_id, reason)| SkipEntry {
                firm: String::new(),
                market_id: market_id.clone(),
                reason: reason.as_str().to_string(),
            })
            .collect(),
    };

    let executor = OrderExecutor::new(
        ctx.store.clone(),
        ctx.venue.clone(),
        ctx.risk_guard(),
        ctx.config.venue_fee_rate,
        ctx.config.dry_run,
    );
    let retry = RetryPolicy::default();
    let deadline = Instant::now() + ctx.config.cycle_deadline;

    'firms: for (index, firm) in ctx.roster.iter().enumerate() {
        info!(
            firm = %firm.name,
            progress = format!("[{}/{}]", index + 1, ctx.roster.len()),
            "evaluating firm"
        );

        for market in &fetch.markets {
            if Instant::now() >= deadline {
                warn!(firm = %firm.name, "cycle deadline reached, marking partial");
                summary.status = CycleStatus::Partial;
                break 'firms;
            }

            match evaluate_pair(ctx, &executor, &retry, firm, market).await {
                Ok(PairOutcome::AlreadyEvaluated) => {}
                Ok(PairOutcome::NoPrediction(reason)) => {
                    summary.skips.push(SkipEntry {
                        firm: firm.name.clone(),
                        market_id: market.market_id.clone(),
                        reason,
                    });
                }
                Ok(PairOutcome::Skipped(reason)) => {
                    summary.predictions_saved += 1;
                    summary.skips.push(SkipEntry {
                        firm: firm.name.clone(),
                        market_id: market.market_id.clone(),
                        reason,
                    });
                }
                Ok(PairOutcome::RiskRejected(reason)) => {
                    summary.predictions_saved += 1;
                    summary.skips.push(SkipEntry {
                        firm: firm.name.clone(),
                        market_id: market.market_id.clone(),
                        reason,
                    });
                }
                Ok(PairOutcome::Submitted) => {
                    summary.predictions_saved += 1;
                    summary.bets_approved += 1;
                    summary.bets_executed += 1;
                }
                Ok(PairOutcome::Failed) => {
                    summary.predictions_saved += 1;
                    summary.bets_approved += 1;
                    summary.bets_failed += 1;
                }
                Err(e) => {
                    // One pair's failure never takes down the cycle.
                    warn!(
                        firm = %firm.name,
                        market_id = %market.market_id,
                        error = %e,
                        "pair evaluation failed"
                    );
                    summary.skips.push(SkipEntry {
                        firm: firm.name.clone(),
                        market_id: market.market_id.clone(),
                        reason: format!("error: {e}"),
                    });
                }
            }
        }
    }

    // Close the loop against the venue before the record is finalised. A
    // reconciliation failure is logged, not fatal to the cycle.
    let reconciler = Reconciler::new(
        ctx.store.clone(),
        ctx.venue.clone(),
        ctx.config.venue_fee_rate,
    );
    if let Err(e) = reconciler.run(Utc::now()).await {
        warn!(error = %e, "reconciliation failed");
    }

    ctx.cache.clear();

    record.status = summary.status;
    record.finished_at = Some(Utc::now());
    record.bets_approved = summary.bets_approved as i64;
    record.bets_executed = summary.bets_executed as i64;
    record.bets_failed = summary.bets_failed as i64;
    ctx.store.with_tx(|tx| tx.finish_cycle(&record)).await?;

    info!(
        cycle_id = %cycle_id,
        status = summary.status.as_str(),
        predictions = summary.predictions_saved,
        executed = summary.bets_executed,
        failed = summary.bets_failed,
        "cycle finished"
    );
    Ok(summary)
}

/// One `(firm, market)` evaluation: analyse, validate, persist the
/// prediction, price, size, gate, submit. Every skip leaves an auditable
/// reason on the prediction row.
async fn evaluate_pair(
    ctx: &EngineContext,
    executor: &OrderExecutor,
    retry: &RetryPolicy,
    firm: &Firm,
    market: &Market,
) -> Result<PairOutcome, EngineError> {
    let now = Utc::now();

    let already = ctx
        .store
        .with_tx(|tx| tx.has_prediction_on_day(&firm.name, &market.market_id, now.date_naive()))
        .await?;
    if already {
        return Ok(PairOutcome::AlreadyEvaluated);
    }

    let raw = match request_decision(
        ctx.model.as_ref(),
        retry,
        &ctx.cache,
        &ctx.collectors,
        firm,
        market,
    )
    .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(firm = %firm.name, market_id = %market.market_id, error = %e, "model unavailable");
            return Ok(PairOutcome::NoPrediction("model_unavailable".into()));
        }
    };

    let prediction = match validate_decision(&firm.name, &market.market_id, &raw, now) {
        Ok(prediction) => prediction,
        Err(e) => {
            warn!(firm = %firm.name, market_id = %market.market_id, error = %e, "decision rejected");
            return Ok(PairOutcome::NoPrediction("schema_rejected".into()));
        }
    };

    // The prediction is canonical from here on, bet or no bet.
    {
        let p = prediction.clone();
        ctx.store.with_tx(move |tx| tx.insert_prediction(&p)).await?;
    }

    let skip = |reason: &str| PairOutcome::Skipped(reason.to_string());

    // Orderbook probe for the preferred side only.
    let preferred_token = if prediction.probability >= 0.5 {
        market.yes_token_id.clone()
    } else {
        market.no_token_id.clone()
    };
    let Some(preferred_token) = preferred_token else {
        self_skip(ctx, &prediction.id, "missing_token").await?;
        return Ok(skip("missing_token"));
    };

    let Some(book) =
        crate::sizing::fetch_quote(ctx.venue.as_ref(), retry, &preferred_token).await
    else {
        self_skip(ctx, &prediction.id, "orderbook_unavailable").await?;
        return Ok(skip("orderbook_unavailable"));
    };

    let Some(choice) = choose_side(
        market,
        prediction.probability,
        &book,
        ctx.config.venue_fee_rate,
    ) else {
        self_skip(ctx, &prediction.id, "orderbook_unavailable").await?;
        return Ok(skip("orderbook_unavailable"));
    };

    if net_ev(1.0, choice.buy_price, choice.p_win, ctx.config.venue_fee_rate) <= 0.0 {
        self_skip(ctx, &prediction.id, "negative_ev").await?;
        return Ok(skip("negative_ev"));
    }

    let portfolio = {
        let name = firm.name.clone();
        ctx.store
            .with_tx(move |tx| tx.get_portfolio(&name))
            .await?
            .ok_or_else(|| EngineError::Integrity(format!("portfolio {} missing", firm.name)))?
    };

    let desired = desired_size(
        firm.strategy,
        &ctx.config.sizing,
        choice.p_win,
        choice.buy_price,
        prediction.confidence,
        &portfolio,
    );

    match executor
        .approve_and_submit(&prediction, market.category, &choice, desired, now)
        .await?
    {
        SubmitOutcome::Rejected { reason, tier } => {
            let reason_str = reason.as_str().to_string();
            info!(
                firm = %firm.name,
                market_id = %market.market_id,
                tier = tier.as_str(),
                reason = %reason_str,
                "bet vetoed by risk guard"
            );
            self_skip(ctx, &prediction.id, &reason_str).await?;
            Ok(PairOutcome::RiskRejected(reason_str))
        }
        SubmitOutcome::Submitted { .. } => Ok(PairOutcome::Submitted),
        SubmitOutcome::Failed { .. } => Ok(PairOutcome::Failed),
    }
}

async fn self_skip(
    ctx: &EngineContext,
    prediction_id: &str,
    reason: &str,
) -> Result<(), EngineError> {
    ctx.store
        .with_tx(|tx| tx.set_prediction_skip_reason(prediction_id, reason))
        .await?;
    Ok(())
}

//! Order lifecycle.
//!
//! Submission persists the APPROVED row and commits BEFORE the venue call;
//! a second transaction records the outcome. An order that was logged but
//! never saved cannot exist by construction. The monitor reviews open
//! orders on a 30-minute cadence and cancels after three consecutive
//! strikes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{
    Bet, BetStatus, CancelledOrder, Category, OrderReview, Prediction, Side,
};
use crate::retry::RetryPolicy;
use crate::risk::{RiskGuard, RiskInputs, RiskRejection, RiskVerdict, Tier};
use crate::sizing::{format_price, round_price, SideChoice};
use crate::store::Store;
use crate::venue::{decode_errno, PlaceOrderRequest, VenueApi};

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Rejected {
        reason: RiskRejection,
        tier: Tier,
    },
    Submitted {
        bet_id: String,
        order_id: String,
        size: f64,
    },
    Failed {
        bet_id: String,
        error: String,
    },
}

pub struct OrderExecutor {
    store: Store,
    venue: Arc<dyn VenueApi>,
    guard: RiskGuard,
    retry: RetryPolicy,
    fee_rate: f64,
    dry_run: bool,
}

impl OrderExecutor {
    pub fn new(
        store: Store,
        venue: Arc<dyn VenueApi>,
        guard: RiskGuard,
        fee_rate: f64,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            venue,
            guard,
            retry: RetryPolicy::default(),
            fee_rate,
            dry_run,
        }
    }

    /// Gate the candidate through the risk guard and, if approved, run the
    /// full submission state machine. The guard evaluation, counter bump,
    /// balance hold and APPROVED insert share one transaction.
    pub async fn approve_and_submit(
        &self,
        prediction: &Prediction,
        category: Category,
        choice: &SideChoice,
        desired_size: f64,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, EngineError> {
        let firm = prediction.firm.clone();
        let prediction_id = prediction.id.clone();
        let market_id = prediction.market_id.clone();
        let token_id = choice.token_id.clone();
        let limit_price = round_price(choice.buy_price);
        let p_win = choice.p_win;
        let fee_rate = self.fee_rate;
        let guard = self.guard.clone();

        enum Approval {
            Rejected(RiskRejection, Tier),
            Approved(Bet),
        }

        let approval = self
            .store
            .with_tx(move |tx| {
                let portfolio = tx.get_portfolio(&firm)?.ok_or_else(|| {
                    crate::store::StoreError::Integrity(format!("portfolio {firm} missing"))
                })?;
                let counter = tx.daily_counter(&firm, now.date_naive())?;
                let open = tx.count_open_positions(&firm, category)?;

                let verdict = guard.evaluate(&RiskInputs {
                    portfolio: &portfolio,
                    counter: &counter,
                    open_positions_in_category: open,
                    desired_size,
                });

                let size = match verdict {
                    RiskVerdict::Rejected { reason, tier } => {
                        return Ok(Approval::Rejected(reason, tier))
                    }
                    RiskVerdict::Approved { size, .. } => size,
                };

                let bet = Bet {
                    id: Uuid::new_v4().to_string(),
                    prediction_id: prediction_id.clone(),
                    firm: firm.clone(),
                    market_id: market_id.clone(),
                    category,
                    token_id: token_id.clone(),
                    side: Side::Buy,
                    size,
                    limit_price,
                    status: BetStatus::Approved,
                    order_id: None,
                    execution_timestamp: None,
                    expected_value: crate::sizing::net_ev(size, limit_price, p_win, fee_rate),
                    actual_result: None,
                    profit_loss: None,
                    consecutive_strikes: 0,
                    reviews: vec![],
                    error_text: None,
                    redeemed: false,
                    created_at: now,
                };
                tx.insert_bet(&bet)?;
                tx.bump_daily_counter(&firm, now.date_naive(), 1, size, 0.0)?;

                // Hold the stake; it comes back on failure or cancellation.
                let mut portfolio = portfolio;
                portfolio.balance -= size;
                portfolio.last_update = now;
                tx.upsert_portfolio(&portfolio)?;

                Ok(Approval::Approved(bet))
            })
            .await?;

        let bet = match approval {
            Approval::Rejected(reason, tier) => {
                return Ok(SubmitOutcome::Rejected { reason, tier })
            }
            Approval::Approved(bet) => bet,
        };

        info!(
            firm = %bet.firm,
            market_id = %bet.market_id,
            size = bet.size,
            price = bet.limit_price,
            "[BET] approved, submitting"
        );

        self.submit(bet, now).await
    }

    /// Steps 3 and 4 of the submission contract: venue call outside any
    /// transaction, then a second transaction recording the outcome.
    async fn submit(&self, bet: Bet, now: DateTime<Utc>) -> Result<SubmitOutcome, EngineError> {
        if self.dry_run {
            let order_id = format!("dry-run-{}", &bet.id[..8]);
            self.store
                .with_tx(|tx| tx.mark_bet_submitted(&bet.id, &order_id, now))
                .await?;
            info!(bet_id = %bet.id, order_id = %order_id, "dry run, order not sent");
            return Ok(SubmitOutcome::Submitted {
                bet_id: bet.id.clone(),
                order_id,
                size: bet.size,
            });
        }

        let request = PlaceOrderRequest {
            market_id: bet.market_id.clone(),
            token_id: bet.token_id.clone(),
            side: bet.side.as_str().to_string(),
            price: format_price(bet.limit_price),
            amount: bet.size,
            check_approval: true,
        };

        // Transient transport failures and transient venue errnos retry;
        // business rejections surface immediately.
        let placed = self
            .retry
            .run(
                "place order",
                || async {
                    let resp = self.venue.place_order(&request).await?;
                    if resp.errno != 0 {
                        return Err(decode_errno(resp.errno, resp.message.as_deref()));
                    }
                    resp.order_id
                        .clone()
                        .ok_or_else(|| EngineError::Storage("venue returned no order id".into()))
                },
                |e: &EngineError| e.is_retryable(),
            )
            .await;

        match placed {
            Ok(order_id) => {
                self.store
                    .with_tx(|tx| tx.mark_bet_submitted(&bet.id, &order_id, now))
                    .await?;
                info!(bet_id = %bet.id, order_id = %order_id, "order submitted");
                Ok(SubmitOutcome::Submitted {
                    bet_id: bet.id.clone(),
                    order_id,
                    size: bet.size,
                })
            }
            Err(e) => {
                let error = e.to_string();
                warn!(bet_id = %bet.id, error = %error, "order submission failed");
                self.store
                    .with_tx(|tx| {
                        tx.mark_bet_failed(&bet.id, &error)?;
                        // Release the held stake; the attempt still counts
                        // against the daily bet count.
                        tx.bump_daily_counter(
                            &bet.firm,
                            now.date_naive(),
                            0,
                            -bet.size,
                            0.0,
                        )?;
                        if let Some(mut portfolio) = tx.get_portfolio(&bet.firm)? {
                            portfolio.balance += bet.size;
                            portfolio.last_update = now;
                            tx.upsert_portfolio(&portfolio)?;
                        }
                        Ok(())
                    })
                    .await?;
                Ok(SubmitOutcome::Failed {
                    bet_id: bet.id.clone(),
                    error,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 3-strike monitor
// ---------------------------------------------------------------------------

/// Fresh same-firm re-evaluation of an event, used by the contradiction
/// factor. Production wires the analysis pipeline in; tests script it.
#[async_trait::async_trait]
pub trait Reevaluator: Send + Sync {
    /// Fresh probability of YES, or None when re-evaluation is unavailable
    /// (no contradiction is counted in that case).
    async fn reevaluate(&self, firm: &str, market_id: &str) -> Option<f64>;
}

/// Re-evaluation disabled; the contradiction factor never trips.
pub struct NoReevaluation;

#[async_trait::async_trait]
impl Reevaluator for NoReevaluation {
    async fn reevaluate(&self, _firm: &str, _market_id: &str) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Fractional price move that counts as manipulation.
    pub price_move_threshold: f64,
    /// Order age beyond which the stagnation factor trips.
    pub stagnation_hours: f64,
    pub strikes_to_cancel: i64,
    /// Idempotence bucket: one review per bet per bucket.
    pub bucket_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            price_move_threshold: 0.15,
            stagnation_hours: 168.0,
            strikes_to_cancel: 3,
            bucket_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MonitorSummary {
    pub reviewed: usize,
    pub strikes_issued: usize,
    pub resets: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

pub struct OrderMonitor {
    store: Store,
    venue: Arc<dyn VenueApi>,
    reevaluator: Arc<dyn Reevaluator>,
    config: MonitorConfig,
}

impl OrderMonitor {
    pub fn new(
        store: Store,
        venue: Arc<dyn VenueApi>,
        reevaluator: Arc<dyn Reevaluator>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            venue,
            reevaluator,
            config,
        }
    }

    fn bucket(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp() / (self.config.bucket_minutes * 60)
    }

    /// One monitor pass over every open SUBMITTED bet.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<MonitorSummary, EngineError> {
        let bets = self.store.with_tx(|tx| tx.list_open_submitted_bets()).await?;
        let mut summary = MonitorSummary::default();

        for bet in bets {
            // Idempotence: one review per wall-clock bucket.
            if let Some(last) = bet.reviews.last() {
                if self.bucket(last.timestamp) == self.bucket(now) {
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.review_bet(&bet, now).await {
                Ok(ReviewOutcome::Strike { cancelled }) => {
                    summary.reviewed += 1;
                    summary.strikes_issued += 1;
                    if cancelled {
                        summary.cancelled += 1;
                    }
                }
                Ok(ReviewOutcome::Reset) => {
                    summary.reviewed += 1;
                    summary.resets += 1;
                }
                Ok(ReviewOutcome::Unreviewable) => summary.skipped += 1,
                Err(e) => {
                    warn!(bet_id = %bet.id, error = %e, "monitor review failed");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            reviewed = summary.reviewed,
            strikes = summary.strikes_issued,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "monitor pass complete"
        );
        Ok(summary)
    }

    async fn review_bet(
        &self,
        bet: &Bet,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome, EngineError> {
        let Some(current_price) = self.current_price(&bet.token_id).await else {
            // No quote, no review; strike state is left untouched.
            return Ok(ReviewOutcome::Unreviewable);
        };

        let price_delta = (current_price - bet.limit_price).abs() / bet.limit_price;
        let price_manipulation = price_delta > self.config.price_move_threshold;

        let submitted_at = bet.execution_timestamp.unwrap_or(bet.created_at);
        let age_hours = (now - submitted_at).num_seconds() as f64 / 3600.0;
        let stagnant = age_hours > self.config.stagnation_hours;

        let ai_contradicts = match self.reevaluator.reevaluate(&bet.firm, &bet.market_id).await {
            Some(fresh_p) => {
                let original = self
                    .store
                    .with_tx(|tx| tx.get_prediction(&bet.prediction_id))
                    .await?;
                match original {
                    Some(p) => (p.probability >= 0.5) != (fresh_p >= 0.5),
                    None => false,
                }
            }
            None => false,
        };

        let strike_issued = price_manipulation || stagnant || ai_contradicts;
        let review = OrderReview {
            timestamp: now,
            price_delta_pct: price_delta * 100.0,
            age_hours,
            ai_contradicts,
            strike_issued,
        };

        // Strikes must be consecutive: a clean review resets the counter.
        let strikes = if strike_issued {
            bet.consecutive_strikes + 1
        } else {
            0
        };

        let mut reviews = bet.reviews.clone();
        reviews.push(review);
        self.store
            .with_tx(|tx| tx.set_bet_reviews(&bet.id, &reviews, strikes))
            .await?;

        if !strike_issued {
            return Ok(ReviewOutcome::Reset);
        }

        info!(
            bet_id = %bet.id,
            strikes,
            price_delta_pct = price_delta * 100.0,
            age_hours,
            ai_contradicts,
            "strike issued"
        );

        let mut cancelled = false;
        if strikes >= self.config.strikes_to_cancel {
            cancelled = self.cancel(bet, &reviews, now).await?;
        }
        Ok(ReviewOutcome::Strike { cancelled })
    }

    async fn current_price(&self, token_id: &str) -> Option<f64> {
        match self.venue.get_orderbook(token_id).await {
            Ok(book) => book.mid.or(book.ask).or(book.bid),
            Err(e) => {
                warn!(token_id, error = %e, "orderbook fetch failed in monitor");
                None
            }
        }
    }

    async fn cancel(
        &self,
        bet: &Bet,
        reviews: &[OrderReview],
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(order_id) = bet.order_id.clone() else {
            return Err(EngineError::Integrity(format!(
                "submitted bet {} has no order id",
                bet.id
            )));
        };

        let resp = self.venue.cancel_order(&order_id).await?;
        if resp.errno != 0 {
            warn!(
                bet_id = %bet.id,
                errno = resp.errno,
                "venue refused cancellation, will retry next pass"
            );
            return Ok(false);
        }

        let last = reviews.last();
        let cancel_reason = format!(
            "{} consecutive strikes: price moved {:.1}% from {:.3}, age {:.0}h, ai contradiction {}",
            self.config.strikes_to_cancel,
            last.map(|r| r.price_delta_pct).unwrap_or(0.0),
            bet.limit_price,
            last.map(|r| r.age_hours).unwrap_or(0.0),
            last.map(|r| r.ai_contradicts).unwrap_or(false),
        );

        let record = CancelledOrder {
            order_id,
            firm: bet.firm.clone(),
            market_id: bet.market_id.clone(),
            strikes_history: reviews.to_vec(),
            cancel_reason: cancel_reason.clone(),
            cancelled_at: now,
        };

        self.store
            .with_tx(|tx| {
                tx.insert_cancelled_order(&record)?;
                tx.mark_bet_cancelled(&bet.id)?;
                // Release the held stake back to the firm.
                if let Some(mut portfolio) = tx.get_portfolio(&bet.firm)? {
                    portfolio.balance += bet.size;
                    portfolio.last_update = now;
                    tx.upsert_portfolio(&portfolio)?;
                }
                Ok(())
            })
            .await?;

        info!(bet_id = %bet.id, reason = %cancel_reason, "order cancelled");
        Ok(true)
    }
}

enum ReviewOutcome {
    Strike { cancelled: bool },
    Reset,
    Unreviewable,
}

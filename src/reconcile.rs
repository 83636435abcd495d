//! Reconciliation.
//!
//! Compares local bet state against the venue: trade fills promote
//! SUBMITTED bets to FILLED, market resolutions settle outcomes into the
//! firm portfolios, and winning positions get an on-chain redemption
//! request. All updates for one bet share a single transaction, and a
//! pass with no new venue activity is a no-op.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::models::{Bet, BetStatus};
use crate::store::Store;
use crate::venue::VenueApi;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileSummary {
    pub fills_applied: usize,
    pub bets_resolved: usize,
    pub wins: usize,
    pub losses: usize,
    pub redeemed: usize,
    pub redemptions_deferred: usize,
}

/// Below this the custody wallet cannot pay a redemption transaction.
const MIN_REDEMPTION_GAS: f64 = 0.001;

pub struct Reconciler {
    store: Store,
    venue: Arc<dyn VenueApi>,
    fee_rate: f64,
}

impl Reconciler {
    pub fn new(store: Store, venue: Arc<dyn VenueApi>, fee_rate: f64) -> Self {
        Self {
            store,
            venue,
            fee_rate,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReconcileSummary, EngineError> {
        let mut summary = ReconcileSummary::default();

        self.apply_fills(&mut summary).await?;
        self.apply_resolutions(&mut summary, now).await?;
        self.redeem_wins(&mut summary).await?;
        self.check_position_drift().await;

        info!(
            fills = summary.fills_applied,
            resolved = summary.bets_resolved,
            redeemed = summary.redeemed,
            deferred = summary.redemptions_deferred,
            "reconciliation complete"
        );
        Ok(summary)
    }

    async fn apply_fills(&self, summary: &mut ReconcileSummary) -> Result<(), EngineError> {
        let fills = self.venue.get_my_trades().await?;
        if fills.is_empty() {
            return Ok(());
        }
        let filled_order_ids: HashSet<String> =
            fills.into_iter().map(|f| f.order_id).collect();

        let open = self
            .store
            .with_tx(|tx| tx.list_bets_by_status(BetStatus::Submitted))
            .await?;

        for bet in open {
            let Some(order_id) = bet.order_id.as_ref() else {
                continue;
            };
            if filled_order_ids.contains(order_id) {
                self.store.with_tx(|tx| tx.mark_bet_filled(&bet.id)).await?;
                debug!(bet_id = %bet.id, order_id = %order_id, "fill applied");
                summary.fills_applied += 1;
            }
        }
        Ok(())
    }

    async fn apply_resolutions(
        &self,
        summary: &mut ReconcileSummary,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let unresolved = self.store.with_tx(|tx| tx.list_unresolved_bets()).await?;
        if unresolved.is_empty() {
            return Ok(());
        }

        // One detail fetch per market regardless of how many firms hold it.
        let mut winners: HashMap<String, Option<String>> = HashMap::new();

        for bet in unresolved {
            let winner = match winners.get(&bet.market_id) {
                Some(cached) => cached.clone(),
                None => {
                    let winner = match self.venue.get_market(&bet.market_id).await {
                        Ok(Some(detail)) => detail.winner_token_id,
                        Ok(None) => None,
                        Err(e) => {
                            warn!(market_id = %bet.market_id, error = %e, "resolution lookup failed");
                            None
                        }
                    };
                    winners.insert(bet.market_id.clone(), winner.clone());
                    winner
                }
            };
            let Some(winner_token) = winner else {
                continue;
            };

            let won = winner_token == bet.token_id;
            self.settle_bet(&bet, won, now).await?;
            summary.bets_resolved += 1;
            if won {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
        }
        Ok(())
    }

    /// Settle one resolved bet: outcome, pnl, and portfolio update in a
    /// single transaction. The stake was held at approval time, so a loss
    /// only books the counter entry while a win credits the net payout.
    async fn settle_bet(
        &self,
        bet: &Bet,
        won: bool,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        // Payout fee is charged at win time on the full payout.
        let payout = if won {
            (bet.size / bet.limit_price) * (1.0 - self.fee_rate)
        } else {
            0.0
        };
        let profit_loss = payout - bet.size;

        self.store
            .with_tx(|tx| {
                tx.mark_bet_resolved(&bet.id, won as i64, profit_loss)?;
                if bet.status == BetStatus::Submitted {
                    // Resolution implies the order traded.
                    tx.mark_bet_filled(&bet.id)?;
                }

                let mut portfolio = tx.get_portfolio(&bet.firm)?.ok_or_else(|| {
                    crate::store::StoreError::Integrity(format!(
                        "portfolio {} missing",
                        bet.firm
                    ))
                })?;
                if won {
                    portfolio.balance += payout;
                    portfolio.consecutive_wins += 1;
                    portfolio.consecutive_losses = 0;
                } else {
                    portfolio.consecutive_losses += 1;
                    portfolio.consecutive_wins = 0;
                    tx.bump_daily_counter(&bet.firm, now.date_naive(), 0, 0.0, bet.size)?;
                }
                portfolio.peak_balance = portfolio.peak_balance.max(portfolio.balance);
                portfolio.last_update = now;
                tx.upsert_portfolio(&portfolio)?;
                Ok(())
            })
            .await?;

        info!(
            bet_id = %bet.id,
            firm = %bet.firm,
            won,
            profit_loss,
            "bet settled"
        );
        Ok(())
    }

    /// Redemption needs native-token gas; a failure is a warning and the
    /// position is retried on the next pass.
    async fn redeem_wins(&self, summary: &mut ReconcileSummary) -> Result<(), EngineError> {
        let pending = self.store.with_tx(|tx| tx.list_unredeemed_wins()).await?;
        if pending.is_empty() {
            return Ok(());
        }

        // Persistent low gas on the custody wallet defers the whole batch.
        match self.venue.get_my_balances().await {
            Ok(balances) if balances.native_gas <= MIN_REDEMPTION_GAS => {
                warn!(
                    native_gas = balances.native_gas,
                    pending = pending.len(),
                    "custody wallet low on gas, deferring redemptions"
                );
                summary.redemptions_deferred += pending.len();
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "balance check failed, attempting redemptions anyway");
            }
        }

        for bet in pending {
            match self.venue.redeem(&bet.market_id).await {
                Ok(resp) if resp.errno == 0 => {
                    self.store
                        .with_tx(|tx| tx.mark_bet_redeemed(&bet.id))
                        .await?;
                    summary.redeemed += 1;
                }
                Ok(resp) => {
                    warn!(
                        market_id = %bet.market_id,
                        errno = resp.errno,
                        message = resp.message.as_deref().unwrap_or(""),
                        "redemption deferred"
                    );
                    summary.redemptions_deferred += 1;
                }
                Err(e) => {
                    warn!(market_id = %bet.market_id, error = %e, "redemption deferred");
                    summary.redemptions_deferred += 1;
                }
            }
        }
        Ok(())
    }

    /// Venue positions with no matching local bet mean local state drifted.
    /// Drift is logged for an operator; nothing is auto-corrected.
    async fn check_position_drift(&self) {
        let positions = match self.venue.get_my_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                debug!(error = %e, "position check skipped");
                return;
            }
        };
        if positions.is_empty() {
            return;
        }

        let known: HashSet<String> = match self
            .store
            .with_tx(|tx| tx.list_unresolved_bets())
            .await
        {
            Ok(bets) => bets.into_iter().map(|b| b.token_id).collect(),
            Err(e) => {
                debug!(error = %e, "position check skipped");
                return;
            }
        };

        for position in positions {
            if position.size > 0.0 && !known.contains(&position.token_id) {
                warn!(
                    market_id = %position.market_id,
                    token_id = %position.token_id,
                    size = position.size,
                    "venue position has no matching open bet"
                );
            }
        }
    }
}

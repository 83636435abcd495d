//! Typed entity queries. Every method runs inside the caller's
//! transaction; none of them open a boundary of their own.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};
use std::collections::HashMap;

use super::{StoreError, StoreTx};
use crate::models::{
    AreaScores, AreaTexts, Bet, BetStatus, CancelledOrder, Category, CycleRecord, CycleStatus,
    DailyCounter, OrderReview, Portfolio, Side,
};

const BET_COLS: &str = "id, prediction_id, firm, market_id, category, token_id, side, size, \
     limit_price, status, order_id, execution_timestamp, expected_value, actual_result, \
     profit_loss, consecutive_strikes, reviews, error_text, redeemed, created_at";

const PREDICTION_COLS: &str = "id, firm, market_id, probability, confidence, score_sentiment, \
     score_news, score_technical, score_fundamental, score_volatility, analysis_sentiment, \
     analysis_news, analysis_technical, analysis_fundamental, analysis_volatility, \
     probability_reasoning, skip_reason, created_at";

fn dt_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_dt_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn map_bet(row: &Row<'_>) -> rusqlite::Result<Bet> {
    let status_raw: String = row.get(9)?;
    let status = BetStatus::parse(&status_raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(9, "status".into(), Type::Text))?;
    let category_raw: String = row.get(4)?;
    let reviews_raw: String = row.get(16)?;

    Ok(Bet {
        id: row.get(0)?,
        prediction_id: row.get(1)?,
        firm: row.get(2)?,
        market_id: row.get(3)?,
        category: Category::parse(&category_raw),
        token_id: row.get(5)?,
        side: Side::Buy,
        size: row.get(7)?,
        limit_price: row.get(8)?,
        status,
        order_id: row.get(10)?,
        execution_timestamp: opt_dt_col(row, 11)?,
        expected_value: row.get(12)?,
        actual_result: row.get(13)?,
        profit_loss: row.get(14)?,
        consecutive_strikes: row.get(15)?,
        reviews: serde_json::from_str(&reviews_raw).unwrap_or_default(),
        error_text: row.get(17)?,
        redeemed: row.get::<_, i64>(18)? != 0,
        created_at: dt_col(row, 19)?,
    })
}

fn map_prediction(row: &Row<'_>) -> rusqlite::Result<crate::models::Prediction> {
    Ok(crate::models::Prediction {
        id: row.get(0)?,
        firm: row.get(1)?,
        market_id: row.get(2)?,
        probability: row.get(3)?,
        confidence: row.get(4)?,
        scores: AreaScores {
            sentiment: row.get(5)?,
            news: row.get(6)?,
            technical: row.get(7)?,
            fundamental: row.get(8)?,
            volatility: row.get(9)?,
        },
        analyses: AreaTexts {
            sentiment: row.get(10)?,
            news: row.get(11)?,
            technical: row.get(12)?,
            fundamental: row.get(13)?,
            volatility: row.get(14)?,
        },
        probability_reasoning: row.get(15)?,
        skip_reason: row.get(16)?,
        created_at: dt_col(row, 17)?,
    })
}

impl StoreTx<'_> {
    // ------------------------------------------------------------------
    // Portfolios
    // ------------------------------------------------------------------

    pub fn upsert_portfolio(&mut self, p: &Portfolio) -> Result<(), StoreError> {
        if p.balance < 0.0 {
            return Err(StoreError::Integrity(format!(
                "portfolio balance for {} would go negative: {:.2}",
                p.firm, p.balance
            )));
        }
        if p.peak_balance + 1e-9 < p.balance {
            return Err(StoreError::Integrity(format!(
                "peak_balance for {} below balance",
                p.firm
            )));
        }
        self.conn.execute(
            "INSERT INTO portfolios
                 (firm, balance, initial_balance, peak_balance,
                  consecutive_wins, consecutive_losses, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(firm) DO UPDATE SET
                balance = excluded.balance,
                peak_balance = excluded.peak_balance,
                consecutive_wins = excluded.consecutive_wins,
                consecutive_losses = excluded.consecutive_losses,
                last_update = excluded.last_update",
            params![
                &p.firm,
                p.balance,
                p.initial_balance,
                p.peak_balance,
                p.consecutive_wins,
                p.consecutive_losses,
                p.last_update.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_portfolio(&mut self, firm: &str) -> Result<Option<Portfolio>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT firm, balance, initial_balance, peak_balance,
                    consecutive_wins, consecutive_losses, last_update
             FROM portfolios WHERE firm = ?1",
        )?;
        let portfolio = stmt
            .query_row(params![firm], |row| {
                Ok(Portfolio {
                    firm: row.get(0)?,
                    balance: row.get(1)?,
                    initial_balance: row.get(2)?,
                    peak_balance: row.get(3)?,
                    consecutive_wins: row.get(4)?,
                    consecutive_losses: row.get(5)?,
                    last_update: dt_col(row, 6)?,
                })
            })
            .optional()?;
        Ok(portfolio)
    }

    pub fn list_portfolios(&mut self) -> Result<Vec<Portfolio>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT firm, balance, initial_balance, peak_balance,
                    consecutive_wins, consecutive_losses, last_update
             FROM portfolios ORDER BY firm ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Portfolio {
                    firm: row.get(0)?,
                    balance: row.get(1)?,
                    initial_balance: row.get(2)?,
                    peak_balance: row.get(3)?,
                    consecutive_wins: row.get(4)?,
                    consecutive_losses: row.get(5)?,
                    last_update: dt_col(row, 6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    pub fn insert_prediction(&mut self, p: &crate::models::Prediction) -> Result<(), StoreError> {
        if !(0.0..=1.0).contains(&p.probability) {
            return Err(StoreError::Integrity(format!(
                "prediction probability out of range: {}",
                p.probability
            )));
        }
        if !p.scores.all_in_range() || !(0.0..=10.0).contains(&p.confidence) {
            return Err(StoreError::Integrity(
                "prediction scores out of range".into(),
            ));
        }
        self.conn.execute(
            &format!(
                "INSERT INTO predictions ({PREDICTION_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                &p.id,
                &p.firm,
                &p.market_id,
                p.probability,
                p.confidence,
                p.scores.sentiment,
                p.scores.news,
                p.scores.technical,
                p.scores.fundamental,
                p.scores.volatility,
                &p.analyses.sentiment,
                &p.analyses.news,
                &p.analyses.technical,
                &p.analyses.fundamental,
                &p.analyses.volatility,
                &p.probability_reasoning,
                p.skip_reason.as_deref(),
                p.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn set_prediction_skip_reason(
        &mut self,
        prediction_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE predictions SET skip_reason = ?2 WHERE id = ?1",
            params![prediction_id, reason],
        )?;
        if updated == 0 {
            return Err(StoreError::Integrity(format!(
                "prediction {prediction_id} not found"
            )));
        }
        Ok(())
    }

    /// Whether the firm already evaluated this market on the given UTC day.
    /// Re-running a completed cycle must not double-book.
    pub fn has_prediction_on_day(
        &mut self,
        firm: &str,
        market_id: &str,
        day: NaiveDate,
    ) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COUNT(*) FROM predictions
             WHERE firm = ?1 AND market_id = ?2 AND substr(created_at, 1, 10) = ?3",
        )?;
        let count: i64 = stmt.query_row(
            params![firm, market_id, day.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_prediction(
        &mut self,
        id: &str,
    ) -> Result<Option<crate::models::Prediction>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {PREDICTION_COLS} FROM predictions WHERE id = ?1"
        ))?;
        Ok(stmt.query_row(params![id], map_prediction).optional()?)
    }

    pub fn list_predictions(
        &mut self,
        limit: usize,
    ) -> Result<Vec<crate::models::Prediction>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {PREDICTION_COLS} FROM predictions ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit.clamp(1, 1000) as i64], map_prediction)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Bets
    // ------------------------------------------------------------------

    /// The APPROVED row is canonical before any submission attempt; inserts
    /// in any other status are an invariant violation.
    pub fn insert_bet(&mut self, bet: &Bet) -> Result<(), StoreError> {
        if bet.status != BetStatus::Approved {
            return Err(StoreError::Integrity(format!(
                "bet {} inserted with status {}, expected APPROVED",
                bet.id,
                bet.status.as_str()
            )));
        }
        if bet.size < 1.5 {
            return Err(StoreError::Integrity(format!(
                "bet {} below minimum size: {:.2}",
                bet.id, bet.size
            )));
        }
        if !(0.001..=0.999).contains(&bet.limit_price) {
            return Err(StoreError::Integrity(format!(
                "bet {} limit price out of bounds: {}",
                bet.id, bet.limit_price
            )));
        }
        let reviews = serde_json::to_string(&bet.reviews).unwrap_or_else(|_| "[]".into());
        self.conn.execute(
            &format!(
                "INSERT INTO bets ({BET_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
            ),
            params![
                &bet.id,
                &bet.prediction_id,
                &bet.firm,
                &bet.market_id,
                bet.category.as_str(),
                &bet.token_id,
                bet.side.as_str(),
                bet.size,
                bet.limit_price,
                bet.status.as_str(),
                bet.order_id.as_deref(),
                bet.execution_timestamp.map(|t| t.to_rfc3339()),
                bet.expected_value,
                bet.actual_result,
                bet.profit_loss,
                bet.consecutive_strikes,
                reviews,
                bet.error_text.as_deref(),
                bet.redeemed as i64,
                bet.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_bet(&mut self, id: &str) -> Result<Option<Bet>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {BET_COLS} FROM bets WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], map_bet).optional()?)
    }

    fn transition_bet(&mut self, id: &str, to: BetStatus) -> Result<Bet, StoreError> {
        let bet = self
            .get_bet(id)?
            .ok_or_else(|| StoreError::Integrity(format!("bet {id} not found")))?;
        if !bet.status.can_transition_to(to) {
            return Err(StoreError::Integrity(format!(
                "bet {id}: illegal transition {} -> {}",
                bet.status.as_str(),
                to.as_str()
            )));
        }
        Ok(bet)
    }

    pub fn mark_bet_submitted(
        &mut self,
        id: &str,
        order_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.transition_bet(id, BetStatus::Submitted)?;
        self.conn.execute(
            "UPDATE bets SET status = 'SUBMITTED', order_id = ?2, execution_timestamp = ?3
             WHERE id = ?1",
            params![id, order_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_bet_failed(&mut self, id: &str, error_text: &str) -> Result<(), StoreError> {
        self.transition_bet(id, BetStatus::Failed)?;
        self.conn.execute(
            "UPDATE bets SET status = 'FAILED', error_text = ?2 WHERE id = ?1",
            params![id, error_text],
        )?;
        Ok(())
    }

    pub fn mark_bet_filled(&mut self, id: &str) -> Result<(), StoreError> {
        self.transition_bet(id, BetStatus::Filled)?;
        self.conn
            .execute("UPDATE bets SET status = 'FILLED' WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn mark_bet_cancelled(&mut self, id: &str) -> Result<(), StoreError> {
        self.transition_bet(id, BetStatus::Cancelled)?;
        self.conn.execute(
            "UPDATE bets SET status = 'CANCELLED' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn set_bet_reviews(
        &mut self,
        id: &str,
        reviews: &[OrderReview],
        consecutive_strikes: i64,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(reviews)
            .map_err(|e| StoreError::Other(format!("encode reviews: {e}")))?;
        let updated = self.conn.execute(
            "UPDATE bets SET reviews = ?2, consecutive_strikes = ?3 WHERE id = ?1",
            params![id, json, consecutive_strikes],
        )?;
        if updated == 0 {
            return Err(StoreError::Integrity(format!("bet {id} not found")));
        }
        Ok(())
    }

    /// Record the resolution outcome. Rejects double-resolution so that
    /// reconciliation stays idempotent at the caller.
    pub fn mark_bet_resolved(
        &mut self,
        id: &str,
        actual_result: i64,
        profit_loss: f64,
    ) -> Result<(), StoreError> {
        let bet = self
            .get_bet(id)?
            .ok_or_else(|| StoreError::Integrity(format!("bet {id} not found")))?;
        if bet.actual_result.is_some() {
            return Err(StoreError::Conflict(format!("bet {id} already resolved")));
        }
        if !matches!(bet.status, BetStatus::Submitted | BetStatus::Filled) {
            return Err(StoreError::Integrity(format!(
                "bet {id} in status {} cannot resolve",
                bet.status.as_str()
            )));
        }
        self.conn.execute(
            "UPDATE bets SET actual_result = ?2, profit_loss = ?3 WHERE id = ?1",
            params![id, actual_result, profit_loss],
        )?;
        Ok(())
    }

    pub fn mark_bet_redeemed(&mut self, id: &str) -> Result<(), StoreError> {
        self.conn
            .execute("UPDATE bets SET redeemed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn list_bets_by_status(&mut self, status: BetStatus) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets WHERE status = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], map_bet)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// SUBMITTED bets with no resolution yet; the monitor's working set.
    pub fn list_open_submitted_bets(&mut self) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets
             WHERE status = 'SUBMITTED' AND actual_result IS NULL
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], map_bet)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    pub fn list_unresolved_bets(&mut self) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets
             WHERE status IN ('SUBMITTED', 'FILLED') AND actual_result IS NULL
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], map_bet)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// Resolved winners whose on-chain redemption is still outstanding.
    pub fn list_unredeemed_wins(&mut self) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets
             WHERE actual_result = 1 AND redeemed = 0
             ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], map_bet)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    pub fn list_recent_bets(&mut self, limit: usize) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit.clamp(1, 1000) as i64], map_bet)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_bets_for_firm(&mut self, firm: &str, limit: usize) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {BET_COLS} FROM bets WHERE firm = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![firm, limit.clamp(1, 1000) as i64], map_bet)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Open (unresolved SUBMITTED/FILLED) positions a firm holds in one
    /// category. Feeds the tier exposure cap.
    pub fn count_open_positions(
        &mut self,
        firm: &str,
        category: Category,
    ) -> Result<i64, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COUNT(*) FROM bets
             WHERE firm = ?1 AND category = ?2
               AND status IN ('SUBMITTED', 'FILLED') AND actual_result IS NULL",
        )?;
        let count: i64 =
            stmt.query_row(params![firm, category.as_str()], |row| row.get(0))?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Daily counters
    // ------------------------------------------------------------------

    /// Counter row for `(firm, day)`. Keying by date gives the lazy reset:
    /// the first read after rollover sees a fresh row.
    pub fn daily_counter(
        &mut self,
        firm: &str,
        day: NaiveDate,
    ) -> Result<DailyCounter, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT bets_count, spent, realized_loss FROM daily_counters
             WHERE firm = ?1 AND date = ?2",
        )?;
        let row = stmt
            .query_row(
                params![firm, day.format("%Y-%m-%d").to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(match row {
            Some((bets_count, spent, realized_loss)) => DailyCounter {
                firm: firm.to_string(),
                date: day,
                bets_count,
                spent,
                realized_loss,
            },
            None => DailyCounter::fresh(firm, day),
        })
    }

    pub fn bump_daily_counter(
        &mut self,
        firm: &str,
        day: NaiveDate,
        bets_delta: i64,
        spent_delta: f64,
        loss_delta: f64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO daily_counters (firm, date, bets_count, spent, realized_loss)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(firm, date) DO UPDATE SET
                bets_count = bets_count + excluded.bets_count,
                spent = spent + excluded.spent,
                realized_loss = realized_loss + excluded.realized_loss",
            params![
                firm,
                day.format("%Y-%m-%d").to_string(),
                bets_delta,
                spent_delta,
                loss_delta
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------

    pub fn insert_cycle(&mut self, record: &CycleRecord) -> Result<(), StoreError> {
        let counts = serde_json::to_string(&record.per_category_counts)
            .unwrap_or_else(|_| "{}".into());
        self.conn.execute(
            "INSERT INTO cycles
                 (id, started_at, finished_at, status, markets_fetched, markets_tradable,
                  bets_approved, bets_executed, bets_failed, per_category_counts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &record.id,
                record.started_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
                record.status.as_str(),
                record.markets_fetched,
                record.markets_tradable,
                record.bets_approved,
                record.bets_executed,
                record.bets_failed,
                counts,
            ],
        )?;
        Ok(())
    }

    pub fn finish_cycle(&mut self, record: &CycleRecord) -> Result<(), StoreError> {
        let counts = serde_json::to_string(&record.per_category_counts)
            .unwrap_or_else(|_| "{}".into());
        let updated = self.conn.execute(
            "UPDATE cycles SET finished_at = ?2, status = ?3, markets_fetched = ?4,
                 markets_tradable = ?5, bets_approved = ?6, bets_executed = ?7,
                 bets_failed = ?8, per_category_counts = ?9
             WHERE id = ?1",
            params![
                &record.id,
                record.finished_at.map(|t| t.to_rfc3339()),
                record.status.as_str(),
                record.markets_fetched,
                record.markets_tradable,
                record.bets_approved,
                record.bets_executed,
                record.bets_failed,
                counts,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Integrity(format!(
                "cycle {} not found",
                record.id
            )));
        }
        Ok(())
    }

    pub fn latest_cycle(&mut self) -> Result<Option<CycleRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, started_at, finished_at, status, markets_fetched, markets_tradable,
                    bets_approved, bets_executed, bets_failed, per_category_counts
             FROM cycles ORDER BY started_at DESC LIMIT 1",
        )?;
        let record = stmt
            .query_row([], |row| {
                let status_raw: String = row.get(3)?;
                let status = CycleStatus::parse(&status_raw).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(3, "status".into(), Type::Text)
                })?;
                let counts_raw: String = row.get(9)?;
                Ok(CycleRecord {
                    id: row.get(0)?,
                    started_at: dt_col(row, 1)?,
                    finished_at: opt_dt_col(row, 2)?,
                    status,
                    markets_fetched: row.get(4)?,
                    markets_tradable: row.get(5)?,
                    bets_approved: row.get(6)?,
                    bets_executed: row.get(7)?,
                    bets_failed: row.get(8)?,
                    per_category_counts: serde_json::from_str::<HashMap<String, i64>>(&counts_raw)
                        .unwrap_or_default(),
                })
            })
            .optional()?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Cancelled orders
    // ------------------------------------------------------------------

    pub fn insert_cancelled_order(&mut self, rec: &CancelledOrder) -> Result<(), StoreError> {
        let history = serde_json::to_string(&rec.strikes_history)
            .map_err(|e| StoreError::Other(format!("encode strikes history: {e}")))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO cancelled_orders
                 (order_id, firm, market_id, strikes_history, cancel_reason, cancelled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &rec.order_id,
                &rec.firm,
                &rec.market_id,
                history,
                &rec.cancel_reason,
                rec.cancelled_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_cancelled_orders(&mut self, limit: usize) -> Result<Vec<CancelledOrder>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT order_id, firm, market_id, strikes_history, cancel_reason, cancelled_at
             FROM cancelled_orders ORDER BY cancelled_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit.clamp(1, 1000) as i64], |row| {
                let history_raw: String = row.get(3)?;
                Ok(CancelledOrder {
                    order_id: row.get(0)?,
                    firm: row.get(1)?,
                    market_id: row.get(2)?,
                    strikes_history: serde_json::from_str(&history_raw).unwrap_or_default(),
                    cancel_reason: row.get(4)?,
                    cancelled_at: dt_col(row, 5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

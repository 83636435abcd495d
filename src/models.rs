//! Core entities and closed status enums.
//!
//! Status transitions are explicit: every update to a bet asserts its
//! `(from, to)` pair against the transition table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position sizing strategy, one per firm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingStrategy {
    KellyConservative,
    FixedFractional,
    Proportional,
    MartingaleModified,
    AntiMartingale,
}

impl SizingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingStrategy::KellyConservative => "kelly_conservative",
            SizingStrategy::FixedFractional => "fixed_fractional",
            SizingStrategy::Proportional => "proportional",
            SizingStrategy::MartingaleModified => "martingale_modified",
            SizingStrategy::AntiMartingale => "anti_martingale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kelly_conservative" => Some(Self::KellyConservative),
            "fixed_fractional" => Some(Self::FixedFractional),
            "proportional" => Some(Self::Proportional),
            "martingale_modified" => Some(Self::MartingaleModified),
            "anti_martingale" => Some(Self::AntiMartingale),
            _ => None,
        }
    }
}

/// One of the five model-backed trading agents. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firm {
    pub name: String,
    pub model_id: String,
    pub color_tag: String,
    pub strategy: SizingStrategy,
}

/// The fixed five-firm roster.
pub fn default_roster() -> Vec<Firm> {
    vec![
        Firm {
            name: "ChatGPT".into(),
            model_id: "openai/gpt-4o".into(),
            color_tag: "#10a37f".into(),
            strategy: SizingStrategy::KellyConservative,
        },
        Firm {
            name: "Claude".into(),
            model_id: "anthropic/claude-sonnet-4".into(),
            color_tag: "#d97757".into(),
            strategy: SizingStrategy::FixedFractional,
        },
        Firm {
            name: "Gemini".into(),
            model_id: "google/gemini-2.5-pro".into(),
            color_tag: "#4285f4".into(),
            strategy: SizingStrategy::Proportional,
        },
        Firm {
            name: "Grok".into(),
            model_id: "x-ai/grok-3".into(),
            color_tag: "#1d9bf0".into(),
            strategy: SizingStrategy::MartingaleModified,
        },
        Firm {
            name: "DeepSeek".into(),
            model_id: "deepseek/deepseek-chat".into(),
            color_tag: "#556bf2".into(),
            strategy: SizingStrategy::AntiMartingale,
        },
    ]
}

/// Per-firm bankroll state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub firm: String,
    pub balance: f64,
    pub initial_balance: f64,
    pub peak_balance: f64,
    pub consecutive_wins: i64,
    pub consecutive_losses: i64,
    pub last_update: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(firm: &str, initial_balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            firm: firm.to_string(),
            balance: initial_balance,
            initial_balance,
            peak_balance: initial_balance,
            consecutive_wins: 0,
            consecutive_losses: 0,
            last_update: now,
        }
    }
}

/// Venue market status after normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Activated,
    Resolved,
    Closed,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Activated => "ACTIVATED",
            MarketStatus::Resolved => "RESOLVED",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Cancelled => "CANCELLED",
        }
    }

    /// The venue reports status either as an enum object or as a plain
    /// string; extract the human name and match case-insensitively.
    pub fn normalise(raw: &serde_json::Value) -> Option<Self> {
        let name = match raw {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(o) => o
                .get("name")
                .or_else(|| o.get("value"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())?,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        // Tolerate "MarketStatus.ACTIVATED" style reprs.
        let name = name.rsplit('.').next().unwrap_or(&name).trim().to_ascii_uppercase();
        match name.as_str() {
            "ACTIVATED" | "ACTIVE" => Some(MarketStatus::Activated),
            "RESOLVED" => Some(MarketStatus::Resolved),
            "CLOSED" => Some(MarketStatus::Closed),
            "CANCELLED" | "CANCELED" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }
}

/// Market category. Sports is excluded from trading by policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Crypto,
    Rates,
    Commodities,
    Inflation,
    Employment,
    Finance,
    Politics,
    Science,
    Sports,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Crypto => "Crypto",
            Category::Rates => "Rates",
            Category::Commodities => "Commodities",
            Category::Inflation => "Inflation",
            Category::Employment => "Employment",
            Category::Finance => "Finance",
            Category::Politics => "Politics",
            Category::Science => "Science",
            Category::Sports => "Sports",
            Category::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "crypto" | "cryptocurrency" => Category::Crypto,
            "rates" | "interest rates" => Category::Rates,
            "commodities" => Category::Commodities,
            "inflation" => Category::Inflation,
            "employment" | "jobs" => Category::Employment,
            "finance" | "financial" => Category::Finance,
            "politics" | "political" => Category::Politics,
            "science" | "tech" | "technology" => Category::Science,
            "sports" | "sport" => Category::Sports,
            _ => Category::Other,
        }
    }
}

/// Normalised market snapshot. Token ids are required for tradability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub title: String,
    pub category: Category,
    pub status: MarketStatus,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub ask_price: Option<f64>,
    pub bid_price: Option<f64>,
    pub volume: f64,
    pub resolution_time: Option<DateTime<Utc>>,
}

impl Market {
    pub fn has_orderbook_liquidity(&self) -> bool {
        matches!(self.ask_price, Some(a) if a > 0.0 && a < 1.0)
            || matches!(self.bid_price, Some(b) if b > 0.0 && b < 1.0)
    }

    /// Symbol key used for collector caching. Markets about the same
    /// underlying share analysis within a cycle.
    pub fn symbol(&self) -> String {
        self.title
            .split_whitespace()
            .next()
            .unwrap_or(&self.market_id)
            .to_ascii_uppercase()
    }
}

/// The five analytic area scores, each in [0, 10].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AreaScores {
    pub sentiment: f64,
    pub news: f64,
    pub technical: f64,
    pub fundamental: f64,
    pub volatility: f64,
}

impl AreaScores {
    pub fn neutral() -> Self {
        Self {
            sentiment: 5.0,
            news: 5.0,
            technical: 5.0,
            fundamental: 5.0,
            volatility: 5.0,
        }
    }

    pub fn all_in_range(&self) -> bool {
        [
            self.sentiment,
            self.news,
            self.technical,
            self.fundamental,
            self.volatility,
        ]
        .iter()
        .all(|s| (0.0..=10.0).contains(s))
    }
}

/// Free-text analysis per area.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaTexts {
    pub sentiment: String,
    pub news: String,
    pub technical: String,
    pub fundamental: String,
    pub volatility: String,
}

/// One evaluation of one market by one firm, saved whether or not a bet
/// followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub firm: String,
    pub market_id: String,
    pub probability: f64,
    pub confidence: f64,
    pub scores: AreaScores,
    pub analyses: AreaTexts,
    pub probability_reasoning: String,
    /// Audit trail when no bet followed this prediction.
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Approved,
    Submitted,
    Filled,
    Failed,
    Cancelled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Approved => "APPROVED",
            BetStatus::Submitted => "SUBMITTED",
            BetStatus::Filled => "FILLED",
            BetStatus::Failed => "FAILED",
            BetStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVED" => Some(Self::Approved),
            "SUBMITTED" => Some(Self::Submitted),
            "FILLED" => Some(Self::Filled),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The allowed `(from, to)` pairs. FILLED and CANCELLED are terminal.
    pub fn can_transition_to(&self, to: BetStatus) -> bool {
        use BetStatus::*;
        matches!(
            (self, to),
            (Approved, Submitted) | (Approved, Failed) | (Submitted, Filled) | (Submitted, Failed) | (Submitted, Cancelled)
        )
    }
}

/// Order side. The engine only ever buys outcome tokens; exits happen via
/// resolution or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        "BUY"
    }
}

/// One review of an open order by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReview {
    pub timestamp: DateTime<Utc>,
    pub price_delta_pct: f64,
    pub age_hours: f64,
    pub ai_contradicts: bool,
    pub strike_issued: bool,
}

/// One executed order intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub prediction_id: String,
    pub firm: String,
    pub market_id: String,
    pub category: Category,
    pub token_id: String,
    pub side: Side,
    /// Quote-currency stake, two decimals.
    pub size: f64,
    /// Submission limit price, three decimals, strictly in (0, 1).
    pub limit_price: f64,
    pub status: BetStatus,
    pub order_id: Option<String>,
    pub execution_timestamp: Option<DateTime<Utc>>,
    pub expected_value: f64,
    /// None until resolved; then 0 (lost) or 1 (won).
    pub actual_result: Option<i64>,
    pub profit_loss: Option<f64>,
    pub consecutive_strikes: i64,
    pub reviews: Vec<OrderReview>,
    pub error_text: Option<String>,
    pub redeemed: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-firm per-UTC-day spending counters. Lazily reset on rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCounter {
    pub firm: String,
    pub date: NaiveDate,
    pub bets_count: i64,
    pub spent: f64,
    pub realized_loss: f64,
}

impl DailyCounter {
    pub fn fresh(firm: &str, date: NaiveDate) -> Self {
        Self {
            firm: firm.to_string(),
            date,
            bets_count: 0,
            spent: 0.0,
            realized_loss: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Running => "RUNNING",
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Partial => "PARTIAL",
            CycleStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "PARTIAL" => Some(Self::Partial),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub markets_fetched: i64,
    pub markets_tradable: i64,
    pub bets_approved: i64,
    pub bets_executed: i64,
    pub bets_failed: i64,
    pub per_category_counts: HashMap<String, i64>,
}

/// A monitor-cancelled order with its full strike history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledOrder {
    pub order_id: String,
    pub firm: String,
    pub market_id: String,
    pub strikes_history: Vec<OrderReview>,
    pub cancel_reason: String,
    pub cancelled_at: DateTime<Utc>,
}

//! Venue wire types.
//!
//! The venue reports status fields loosely (enum object or string); raw
//! JSON is kept where normalisation happens downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing-endpoint summary. Token ids are NOT present here; a detail
/// fetch is required before a market can be traded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Enum-or-string; normalised via `MarketStatus::normalise`.
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub resolution_time: Option<DateTime<Utc>>,
}

/// Full market detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDetail {
    pub market_id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: serde_json::Value,
    #[serde(default)]
    pub yes_token_id: Option<String>,
    #[serde(default)]
    pub no_token_id: Option<String>,
    #[serde(default)]
    pub ask_price: Option<f64>,
    #[serde(default)]
    pub bid_price: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub resolution_time: Option<DateTime<Utc>>,
    /// Set once the market resolves.
    #[serde(default)]
    pub winner_token_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookQuote {
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub mid: Option<f64>,
    #[serde(default)]
    pub spread: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub market_id: String,
    pub token_id: String,
    pub side: String,
    /// Decimal string, at most 3 decimals, strictly inside (0, 1).
    pub price: String,
    /// At most 2 decimals.
    pub amount: f64,
    pub check_approval: bool,
}

/// Success is `errno == 0`, never the absence of an error.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderResponse {
    pub errno: i64,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderResponse {
    pub errno: i64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemResponse {
    pub errno: i64,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub market_id: String,
    pub token_id: String,
    pub size: f64,
    #[serde(default)]
    pub avg_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    /// Quote stablecoin available for trading.
    pub available: f64,
    /// Native token balance paying redemption gas.
    #[serde(default)]
    pub native_gas: f64,
}

//! Signed-order venue client.
//!
//! The engine depends only on this trait; the HTTP implementation lives in
//! `http.rs` and tests substitute their own.

mod http;
pub mod types;

pub use http::HttpVenueClient;
pub use types::*;

use async_trait::async_trait;

use crate::errors::EngineError;

/// Venue errno codes the engine special-cases. Everything else non-zero is
/// a generic business rejection.
pub const ERRNO_AUTH: i64 = 10001;
pub const ERRNO_GEO_BLOCKED: i64 = 10403;
pub const ERRNO_PRICE_DECIMALS: i64 = 10602;

/// Gateway/timeout style codes the venue labels as transient.
const TRANSIENT_ERRNOS: [i64; 3] = [10500, 10503, 10504];

pub fn errno_is_transient(errno: i64) -> bool {
    TRANSIENT_ERRNOS.contains(&errno)
}

/// Decode a non-zero errno into the engine taxonomy.
pub fn decode_errno(errno: i64, message: Option<&str>) -> EngineError {
    let message = message.unwrap_or("").to_string();
    if errno_is_transient(errno) {
        EngineError::Transient(format!("venue errno {errno}: {message}"))
    } else {
        EngineError::VenueBusiness { errno, message }
    }
}

#[async_trait]
pub trait VenueApi: Send + Sync {
    /// One-shot at process start; must succeed before any trading.
    async fn enable_trading(&self) -> Result<(), EngineError>;

    /// Paginated market summaries. `status` is passed through verbatim;
    /// local filtering happens in the fetcher.
    async fn get_markets(
        &self,
        status: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MarketSummary>, EngineError>;

    /// Full detail including token ids. `Ok(None)` on 404 — a market the
    /// listing knows but the detail endpoint does not is silently skipped.
    async fn get_market(&self, market_id: &str) -> Result<Option<MarketDetail>, EngineError>;

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBookQuote, EngineError>;

    async fn place_order(
        &self,
        req: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, EngineError>;

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, EngineError>;

    /// Gas-requiring on-chain redemption of a resolved position.
    async fn redeem(&self, market_id: &str) -> Result<RedeemResponse, EngineError>;

    async fn get_my_trades(&self) -> Result<Vec<TradeFill>, EngineError>;

    async fn get_my_positions(&self) -> Result<Vec<PositionInfo>, EngineError>;

    async fn get_my_balances(&self) -> Result<BalanceInfo, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_classification() {
        assert!(matches!(
            decode_errno(10403, Some("Invalid area")),
            EngineError::VenueBusiness { errno: 10403, .. }
        ));
        assert!(matches!(
            decode_errno(10602, None),
            EngineError::VenueBusiness { errno: 10602, .. }
        ));
        assert!(decode_errno(10503, Some("gateway timeout")).is_retryable());
        assert!(!decode_errno(10001, Some("auth")).is_retryable());
    }
}

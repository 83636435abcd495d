//! Expected value and position sizing.
//!
//! Side selection, the orderbook probe fallback chain, net EV with the
//! payout-time fee, and the five per-firm sizing strategies. Raw sizes
//! leave this module unclamped; the risk guard owns caps and the floor.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::EngineError;
use crate::models::{Market, Portfolio, SizingStrategy};
use crate::retry::RetryPolicy;
use crate::venue::{OrderBookQuote, VenueApi};

/// The venue accepts at most 3 price decimals strictly inside (0, 1).
pub fn round_price(price: f64) -> f64 {
    ((price * 1000.0).round() / 1000.0).clamp(0.001, 0.999)
}

/// Decimal-string form the venue's order endpoint expects.
pub fn format_price(price: f64) -> String {
    format!("{:.3}", round_price(price))
}

/// Amounts carry at most 2 decimals.
pub fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Net EV of staking `size` at cost-per-share `cost` with win probability
/// `p`. The taker fee is charged on the payout at win time only, never on
/// the buy.
pub fn net_ev(size: f64, cost: f64, p: f64, fee: f64) -> f64 {
    let gross_ev = p * (size / cost - size) - (1.0 - p) * size;
    let fee_cost = p * (size / cost) * fee;
    gross_ev - fee_cost
}

/// Per-unit edge; sign decides candidacy independent of size.
fn unit_edge(cost: f64, p: f64, fee: f64) -> f64 {
    net_ev(1.0, cost, p, fee)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SideChoice {
    pub outcome: Outcome,
    pub token_id: String,
    pub buy_price: f64,
    /// Model probability that the chosen side wins.
    pub p_win: f64,
}

/// Probe the orderbook, up to 3 attempts with backoff. Returns the quote
/// only when it carries a usable buy price via the fallback chain (ASK,
/// then MID, then BID + spread). `None` means every probe failed and the
/// event should be skipped.
pub async fn fetch_quote(
    venue: &dyn VenueApi,
    retry: &RetryPolicy,
    token_id: &str,
) -> Option<OrderBookQuote> {
    let book = match retry
        .run(
            "orderbook fetch",
            || venue.get_orderbook(token_id),
            |e: &EngineError| e.is_retryable(),
        )
        .await
    {
        Ok(book) => book,
        Err(e) => {
            warn!(token_id, error = %e, "orderbook unavailable after retries");
            return None;
        }
    };
    buy_price_from_book(&book).map(|_| book)
}

pub fn buy_price_from_book(book: &OrderBookQuote) -> Option<f64> {
    let candidate = book
        .ask
        .or(book.mid)
        .or_else(|| match (book.bid, book.spread) {
            (Some(bid), Some(spread)) => Some(bid + spread),
            _ => None,
        });
    candidate.filter(|p| (0.0..1.0).contains(p) && *p > 0.0)
}

/// Choose the side to buy. YES when `p >= 0.5` (deterministic tie-break),
/// NO otherwise. `book` is the quote for the preferred side's token; the
/// complementary side's cost is estimated from the same book. If the stale
/// book makes both sides look profitable, the larger net edge wins.
pub fn choose_side(
    market: &Market,
    probability: f64,
    book: &OrderBookQuote,
    fee: f64,
) -> Option<SideChoice> {
    let yes_token = market.yes_token_id.clone()?;
    let no_token = market.no_token_id.clone()?;

    let preferred_is_yes = probability >= 0.5;
    let preferred_price = buy_price_from_book(book)?;
    let p_preferred = if preferred_is_yes {
        probability
    } else {
        1.0 - probability
    };

    // Complement cost estimated from the preferred book's bid.
    let other = book
        .bid
        .map(|bid| 1.0 - bid)
        .filter(|p| (0.0..1.0).contains(p) && *p > 0.0);

    let preferred_edge = unit_edge(preferred_price, p_preferred, fee);
    if let Some(other_price) = other {
        let other_edge = unit_edge(other_price, 1.0 - p_preferred, fee);
        if other_edge > 0.0 && preferred_edge > 0.0 && other_edge > preferred_edge {
            warn!(
                market_id = %market.market_id,
                preferred_edge,
                other_edge,
                "both sides net-EV-positive on stale book, taking the larger"
            );
            let (outcome, token_id) = if preferred_is_yes {
                (Outcome::No, no_token)
            } else {
                (Outcome::Yes, yes_token)
            };
            return Some(SideChoice {
                outcome,
                token_id,
                buy_price: other_price,
                p_win: 1.0 - p_preferred,
            });
        }
    }

    let (outcome, token_id) = if preferred_is_yes {
        (Outcome::Yes, yes_token)
    } else {
        (Outcome::No, no_token)
    };
    Some(SideChoice {
        outcome,
        token_id,
        buy_price: preferred_price,
        p_win: p_preferred,
    })
}

/// Strategy coefficients. Values are defaults; env vars override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier (quarter Kelly).
    pub kelly_fraction: f64,
    /// Fixed-fractional bankroll tiers by confidence band.
    pub fixed_low: f64,
    pub fixed_mid: f64,
    pub fixed_high: f64,
    /// Confidence band edges: below the first is low, below the second mid.
    pub fixed_band_low: f64,
    pub fixed_band_high: f64,
    pub proportional_k: f64,
    /// Base stake fraction for the martingale family.
    pub base_fraction: f64,
    pub martingale_mult: f64,
    pub anti_martingale_mult: f64,
    pub max_escalations: i64,
    /// Floor in quote units; below this no bet is emitted.
    pub min_bet: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            fixed_low: 0.005,
            fixed_mid: 0.01,
            fixed_high: 0.02,
            fixed_band_low: 4.0,
            fixed_band_high: 7.0,
            proportional_k: 0.05,
            base_fraction: 0.01,
            martingale_mult: 1.5,
            anti_martingale_mult: 1.3,
            max_escalations: 3,
            min_bet: 1.5,
        }
    }
}

impl SizingConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
        };
        if let Some(v) = read("SIZING_KELLY_FRACTION") {
            cfg.kelly_fraction = v;
        }
        if let Some(v) = read("SIZING_PROPORTIONAL_K") {
            cfg.proportional_k = v;
        }
        if let Some(v) = read("SIZING_MARTINGALE_MULT") {
            cfg.martingale_mult = v;
        }
        if let Some(v) = read("SIZING_ANTI_MARTINGALE_MULT") {
            cfg.anti_martingale_mult = v;
        }
        if let Some(v) = read("SIZING_MIN_BET") {
            cfg.min_bet = v;
        }
        cfg
    }
}

/// Raw desired stake in quote units before the risk guard's caps.
pub fn desired_size(
    strategy: SizingStrategy,
    cfg: &SizingConfig,
    p_win: f64,
    buy_price: f64,
    confidence: f64,
    portfolio: &Portfolio,
) -> f64 {
    let balance = portfolio.balance;
    let size = match strategy {
        SizingStrategy::KellyConservative => {
            let b = (1.0 / buy_price) - 1.0;
            if b <= 0.0 {
                return 0.0;
            }
            let q = 1.0 - p_win;
            let full_kelly = ((b * p_win - q) / b).clamp(0.0, 1.0);
            balance * full_kelly * cfg.kelly_fraction * (confidence / 10.0)
        }
        SizingStrategy::FixedFractional => {
            let fraction = if confidence < cfg.fixed_band_low {
                cfg.fixed_low
            } else if confidence < cfg.fixed_band_high {
                cfg.fixed_mid
            } else {
                cfg.fixed_high
            };
            balance * fraction
        }
        SizingStrategy::Proportional => balance * p_win * (confidence / 10.0) * cfg.proportional_k,
        SizingStrategy::MartingaleModified => {
            let escalations = portfolio.consecutive_losses.min(cfg.max_escalations);
            balance * cfg.base_fraction * cfg.martingale_mult.powi(escalations as i32)
        }
        SizingStrategy::AntiMartingale => {
            let escalations = portfolio.consecutive_wins.min(cfg.max_escalations);
            balance * cfg.base_fraction * cfg.anti_martingale_mult.powi(escalations as i32)
        }
    };
    round_amount(size.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MarketStatus};
    use chrono::Utc;

    fn market() -> Market {
        Market {
            market_id: "m1".into(),
            title: "BTC above 100k".into(),
            category: Category::Crypto,
            status: MarketStatus::Activated,
            yes_token_id: Some("T-yes".into()),
            no_token_id: Some("T-no".into()),
            ask_price: Some(0.40),
            bid_price: Some(0.38),
            volume: 100.0,
            resolution_time: None,
        }
    }

    fn portfolio(balance: f64) -> Portfolio {
        Portfolio::new("ChatGPT", balance, Utc::now())
    }

    #[test]
    fn price_rounding_bounds() {
        assert_eq!(round_price(0.4004), 0.4);
        assert_eq!(round_price(0.0), 0.001);
        assert_eq!(round_price(1.2), 0.999);
        assert_eq!(round_price(0.9996), 0.999);
        assert_eq!(format_price(0.4), "0.400");
    }

    #[test]
    fn net_ev_formula() {
        // p=0.6, c=0.4, fee=3%: unit net edge = 0.6*0.97/0.4 - 1 = 0.455
        let ev = net_ev(1.5, 0.4, 0.6, 0.03);
        assert!((ev - 1.5 * (0.6 * 0.97 / 0.4 - 1.0)).abs() < 1e-9);
        assert!(ev > 0.0);
        // Fair price with fees: no edge left.
        assert!(net_ev(1.0, 0.6, 0.6, 0.03) < 0.0);
    }

    #[test]
    fn side_selection_prefers_yes_at_half() {
        let book = OrderBookQuote {
            ask: Some(0.5),
            bid: Some(0.48),
            mid: Some(0.49),
            spread: Some(0.02),
        };
        let choice = choose_side(&market(), 0.5, &book, 0.03).unwrap();
        assert_eq!(choice.outcome, Outcome::Yes);
        assert_eq!(choice.token_id, "T-yes");
    }

    #[test]
    fn side_selection_no_below_half() {
        let book = OrderBookQuote {
            ask: Some(0.7),
            bid: Some(0.69),
            mid: None,
            spread: None,
        };
        let choice = choose_side(&market(), 0.3, &book, 0.03).unwrap();
        assert_eq!(choice.outcome, Outcome::No);
        assert_eq!(choice.token_id, "T-no");
        assert!((choice.p_win - 0.7).abs() < 1e-9);
    }

    #[test]
    fn fallback_chain_ask_mid_bid() {
        let ask_book = OrderBookQuote {
            ask: Some(0.41),
            bid: Some(0.39),
            mid: Some(0.40),
            spread: Some(0.02),
        };
        assert_eq!(buy_price_from_book(&ask_book), Some(0.41));

        let mid_book = OrderBookQuote {
            ask: None,
            bid: Some(0.39),
            mid: Some(0.40),
            spread: Some(0.02),
        };
        assert_eq!(buy_price_from_book(&mid_book), Some(0.40));

        let bid_book = OrderBookQuote {
            ask: None,
            bid: Some(0.39),
            mid: None,
            spread: Some(0.02),
        };
        assert!((buy_price_from_book(&bid_book).unwrap() - 0.41).abs() < 1e-9);

        assert_eq!(buy_price_from_book(&OrderBookQuote::default()), None);
    }

    #[test]
    fn kelly_scales_with_confidence() {
        let cfg = SizingConfig::default();
        let low = desired_size(
            SizingStrategy::KellyConservative,
            &cfg,
            0.6,
            0.4,
            4.0,
            &portfolio(1000.0),
        );
        let high = desired_size(
            SizingStrategy::KellyConservative,
            &cfg,
            0.6,
            0.4,
            8.0,
            &portfolio(1000.0),
        );
        assert!(high > low);
        assert!(high > 0.0);
    }

    #[test]
    fn kelly_zero_without_edge() {
        let cfg = SizingConfig::default();
        // p below implied probability: Kelly clamps to zero.
        let size = desired_size(
            SizingStrategy::KellyConservative,
            &cfg,
            0.3,
            0.5,
            8.0,
            &portfolio(1000.0),
        );
        assert_eq!(size, 0.0);
    }

    #[test]
    fn fixed_fractional_bands() {
        let cfg = SizingConfig::default();
        let p = portfolio(1000.0);
        assert_eq!(
            desired_size(SizingStrategy::FixedFractional, &cfg, 0.6, 0.4, 2.0, &p),
            5.0
        );
        assert_eq!(
            desired_size(SizingStrategy::FixedFractional, &cfg, 0.6, 0.4, 5.0, &p),
            10.0
        );
        assert_eq!(
            desired_size(SizingStrategy::FixedFractional, &cfg, 0.6, 0.4, 9.0, &p),
            20.0
        );
    }

    #[test]
    fn martingale_escalates_and_caps() {
        let cfg = SizingConfig::default();
        let mut p = portfolio(1000.0);
        let base = desired_size(SizingStrategy::MartingaleModified, &cfg, 0.6, 0.4, 7.0, &p);
        p.consecutive_losses = 2;
        let escalated = desired_size(SizingStrategy::MartingaleModified, &cfg, 0.6, 0.4, 7.0, &p);
        assert!((escalated - base * 1.5f64.powi(2)).abs() < 0.01);

        p.consecutive_losses = 10;
        let capped = desired_size(SizingStrategy::MartingaleModified, &cfg, 0.6, 0.4, 7.0, &p);
        assert!((capped - base * 1.5f64.powi(3)).abs() < 0.01);
    }

    #[test]
    fn anti_martingale_rides_wins() {
        let cfg = SizingConfig::default();
        let mut p = portfolio(1000.0);
        p.consecutive_wins = 1;
        let one = desired_size(SizingStrategy::AntiMartingale, &cfg, 0.6, 0.4, 7.0, &p);
        p.consecutive_wins = 3;
        let three = desired_size(SizingStrategy::AntiMartingale, &cfg, 0.6, 0.4, 7.0, &p);
        assert!(three > one);
    }
}

//! Market fetcher.
//!
//! Walks the venue's paginated listing, pulls full detail for every
//! ACTIVATED candidate, and applies the tradability filter. Token
//! existence is checked before anything that would cost an orderbook
//! call, so untradable markets never trigger extra venue traffic.

use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::models::{Category, Market, MarketStatus};
use crate::venue::{MarketDetail, VenueApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotActivated,
    Resolved,
    NoYesTokenId,
    NoNoTokenId,
    SportsCategory,
    NoLiquidity,
    DetailFetchFailed,
    UnknownStatus,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotActivated => "not_activated",
            RejectReason::Resolved => "resolved",
            RejectReason::NoYesTokenId => "no_yes_token_id",
            RejectReason::NoNoTokenId => "no_no_token_id",
            RejectReason::SportsCategory => "sports_category",
            RejectReason::NoLiquidity => "no_liquidity",
            RejectReason::DetailFetchFailed => "detail_fetch_failed",
            RejectReason::UnknownStatus => "unknown_status",
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub markets: Vec<Market>,
    /// Summaries seen across all pages, before any filtering.
    pub fetched: usize,
    pub rejections: Vec<(String, RejectReason)>,
}

/// Normalise a detail payload into a `Market`.
pub fn normalise_detail(detail: &MarketDetail) -> Option<Market> {
    let status = MarketStatus::normalise(&detail.status)?;
    Some(Market {
        market_id: detail.market_id.clone(),
        title: detail.title.clone(),
        category: detail
            .category
            .as_deref()
            .map(Category::parse)
            .unwrap_or(Category::Other),
        status,
        yes_token_id: detail.yes_token_id.clone().filter(|t| !t.is_empty()),
        no_token_id: detail.no_token_id.clone().filter(|t| !t.is_empty()),
        ask_price: detail.ask_price,
        bid_price: detail.bid_price,
        volume: detail.volume.unwrap_or(0.0),
        resolution_time: detail.resolution_time,
    })
}

/// The tradability invariant. Order matters: token existence first, so
/// an untradable market is rejected before anything liquidity-related.
fn tradability(market: &Market) -> Result<(), RejectReason> {
    match market.status {
        MarketStatus::Activated => {}
        MarketStatus::Resolved => return Err(RejectReason::Resolved),
        _ => return Err(RejectReason::NotActivated),
    }
    if market.yes_token_id.is_none() {
        return Err(RejectReason::NoYesTokenId);
    }
    if market.no_token_id.is_none() {
        return Err(RejectReason::NoNoTokenId);
    }
    if market.category == Category::Sports {
        return Err(RejectReason::SportsCategory);
    }
    if !market.has_orderbook_liquidity() {
        return Err(RejectReason::NoLiquidity);
    }
    Ok(())
}

/// Fetch and filter the venue's open markets. A single market failure is
/// non-fatal; a page-walk failure aborts the cycle.
pub async fn fetch_tradable_markets(
    venue: &dyn VenueApi,
    page_size: usize,
    cap: usize,
) -> Result<FetchOutcome, EngineError> {
    let mut outcome = FetchOutcome::default();
    let mut offset = 0usize;

    while outcome.fetched < cap {
        let page = venue.get_markets("all", page_size, offset).await?;
        if page.is_empty() {
            break;
        }
        let page_len = page.len();
        outcome.fetched += page_len;
        offset += page_len;

        for summary in page {
            // Local status filter first; only ACTIVATED candidates are
            // worth a detail fetch.
            match MarketStatus::normalise(&summary.status) {
                Some(MarketStatus::Activated) => {}
                Some(_) => {
                    outcome
                        .rejections
                        .push((summary.market_id.clone(), RejectReason::NotActivated));
                    continue;
                }
                None => {
                    outcome
                        .rejections
                        .push((summary.market_id.clone(), RejectReason::UnknownStatus));
                    continue;
                }
            }

            let detail = match venue.get_market(&summary.market_id).await {
                Ok(Some(detail)) => detail,
                Ok(None) => {
                    debug!(market_id = %summary.market_id, "listed market has no detail, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(market_id = %summary.market_id, error = %e, "market detail fetch failed");
                    outcome
                        .rejections
                        .push((summary.market_id.clone(), RejectReason::DetailFetchFailed));
                    continue;
                }
            };

            let Some(market) = normalise_detail(&detail) else {
                outcome
                    .rejections
                    .push((summary.market_id.clone(), RejectReason::UnknownStatus));
                continue;
            };

            match tradability(&market) {
                Ok(()) => outcome.markets.push(market),
                Err(reason) => {
                    debug!(
                        market_id = %market.market_id,
                        reason = reason.as_str(),
                        "market rejected"
                    );
                    outcome.rejections.push((market.market_id.clone(), reason));
                }
            }
        }

        if page_len < page_size {
            break;
        }
    }

    // Deterministic ordering for reproducible cycles.
    outcome.markets.sort_by(|a, b| a.market_id.cmp(&b.market_id));

    info!(
        fetched = outcome.fetched,
        tradable = outcome.markets.len(),
        rejected = outcome.rejections.len(),
        "market fetch complete"
    );
    Ok(outcome)
}

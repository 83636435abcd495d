//! Analysis assembler.
//!
//! For a `(firm, market)` pair: pull the five area reports through the
//! per-cycle cache, render the firm's persona prompt, and ask the firm's
//! model for a decision. Collector failures degrade to neutral; model
//! failures after retries skip the pair.

use tracing::debug;

use crate::cache::CycleCache;
use crate::collectors::{Area, AreaReport, CollectorSet};
use crate::errors::EngineError;
use crate::llm::ModelClient;
use crate::models::{Firm, Market};
use crate::retry::RetryPolicy;

/// Gather all five area reports for a symbol, sharing loads across firms
/// via the cycle cache.
pub async fn gather_reports(
    cache: &CycleCache,
    collectors: &CollectorSet,
    symbol: &str,
) -> Vec<AreaReport> {
    let mut reports = Vec::with_capacity(Area::ALL.len());
    for area in Area::ALL {
        let report = cache
            .get_or_load(symbol, area.as_str(), || {
                let collectors = collectors.clone();
                let symbol = symbol.to_string();
                async move { collectors.collect_or_neutral(area, &symbol).await }
            })
            .await;
        reports.push(report);
    }
    reports
}

fn persona(firm: &Firm) -> String {
    format!(
        "You are the research desk of the trading firm \"{}\". You evaluate binary \
         prediction markets and answer ONLY with a JSON object of this exact shape:\n\
         {{\"probability\": <0..1>, \"confidence\": <0..10>, \
         \"scores\": {{\"sentiment\": <0..10>, \"news\": <0..10>, \"technical\": <0..10>, \
         \"fundamental\": <0..10>, \"volatility\": <0..10>}}, \
         \"analyses\": {{\"sentiment\": \"...\", \"news\": \"...\", \"technical\": \"...\", \
         \"fundamental\": \"...\", \"volatility\": \"...\"}}, \
         \"probability_reasoning\": \"...\"}}\n\
         probability is YOUR calibrated estimate that the market resolves YES.",
        firm.name
    )
}

/// Render the user prompt: market facts followed by the five reports.
pub fn build_prompt(market: &Market, reports: &[AreaReport]) -> String {
    let mut prompt = format!(
        "Market: {}\nCategory: {}\nCurrent ask: {}\nCurrent bid: {}\nVolume: {:.0}\n\n",
        market.title,
        market.category.as_str(),
        market
            .ask_price
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "n/a".into()),
        market
            .bid_price
            .map(|p| format!("{p:.3}"))
            .unwrap_or_else(|| "n/a".into()),
        market.volume,
    );
    for report in reports {
        prompt.push_str(&format!(
            "[{} {:.1}/10{}] {}\n",
            report.area.as_str(),
            report.score,
            if report.degraded { ", degraded" } else { "" },
            report.summary,
        ));
    }
    prompt
}

/// Full pipeline for one `(firm, market)` pair up to the raw decision blob.
pub async fn request_decision(
    model: &dyn ModelClient,
    retry: &RetryPolicy,
    cache: &CycleCache,
    collectors: &CollectorSet,
    firm: &Firm,
    market: &Market,
) -> Result<String, EngineError> {
    let reports = gather_reports(cache, collectors, &market.symbol()).await;
    let system = persona(firm);
    let user = build_prompt(market, &reports);

    debug!(firm = %firm.name, market_id = %market.market_id, "requesting model decision");
    retry
        .run(
            "model predict",
            || model.predict(&firm.model_id, &system, &user),
            |e: &EngineError| e.is_retryable(),
        )
        .await
}

/// Live re-evaluation seam for the order monitor: re-runs the full
/// analyse-and-validate pipeline for a `(firm, market)` pair and returns
/// the fresh YES probability.
pub struct PipelineReevaluator {
    pub venue: std::sync::Arc<dyn crate::venue::VenueApi>,
    pub model: std::sync::Arc<dyn ModelClient>,
    pub collectors: CollectorSet,
    pub cache: std::sync::Arc<CycleCache>,
    pub roster: Vec<Firm>,
    pub retry: RetryPolicy,
}

#[async_trait::async_trait]
impl crate::orders::Reevaluator for PipelineReevaluator {
    async fn reevaluate(&self, firm: &str, market_id: &str) -> Option<f64> {
        let firm = self.roster.iter().find(|f| f.name == firm)?;
        let detail = self.venue.get_market(market_id).await.ok().flatten()?;
        let market = crate::markets::normalise_detail(&detail)?;

        let raw = request_decision(
            self.model.as_ref(),
            &self.retry,
            &self.cache,
            &self.collectors,
            firm,
            &market,
        )
        .await
        .ok()?;
        let prediction =
            crate::decision::validate_decision(&firm.name, market_id, &raw, chrono::Utc::now())
                .ok()?;
        Some(prediction.probability)
    }
}

//! Market-data collectors.
//!
//! Five analytic areas feed every prediction. Collectors are best-effort
//! external collaborators: an upstream outage degrades to a neutral
//! report, never an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Sentiment,
    News,
    Technical,
    Fundamental,
    Volatility,
}

impl Area {
    pub const ALL: [Area; 5] = [
        Area::Sentiment,
        Area::News,
        Area::Technical,
        Area::Fundamental,
        Area::Volatility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Area::Sentiment => "sentiment",
            Area::News => "news",
            Area::Technical => "technical",
            Area::Fundamental => "fundamental",
            Area::Volatility => "volatility",
        }
    }
}

/// One area's view of one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaReport {
    pub area: Area,
    pub symbol: String,
    /// 0..=10; 5 is neutral.
    pub score: f64,
    pub summary: String,
    /// True when the collector failed and this is a neutral stand-in.
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

impl AreaReport {
    pub fn neutral(area: Area, symbol: &str, note: &str) -> Self {
        Self {
            area,
            symbol: symbol.to_string(),
            score: 5.0,
            summary: format!("no {} data available: {note}", area.as_str()),
            degraded: true,
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn area(&self) -> Area;
    async fn collect(&self, symbol: &str) -> anyhow::Result<AreaReport>;
}

/// The five collectors, one per area. Missing areas fall back to neutral.
#[derive(Clone, Default)]
pub struct CollectorSet {
    collectors: HashMap<Area, Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new(collectors: Vec<Arc<dyn Collector>>) -> Self {
        let mut map = HashMap::new();
        for c in collectors {
            map.insert(c.area(), c);
        }
        Self { collectors: map }
    }

    pub fn get(&self, area: Area) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(&area)
    }

    /// Collect one area, degrading to neutral on any failure.
    pub async fn collect_or_neutral(&self, area: Area, symbol: &str) -> AreaReport {
        match self.get(area) {
            Some(collector) => match collector.collect(symbol).await {
                Ok(mut report) => {
                    report.score = report.score.clamp(0.0, 10.0);
                    report
                }
                Err(e) => {
                    tracing::warn!(
                        area = area.as_str(),
                        symbol,
                        error = %e,
                        "collector failed, using neutral report"
                    );
                    AreaReport::neutral(area, symbol, &e.to_string())
                }
            },
            None => AreaReport::neutral(area, symbol, "collector not configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FailingCollector;

    #[async_trait]
    impl Collector for FailingCollector {
        fn area(&self) -> Area {
            Area::News
        }
        async fn collect(&self, _symbol: &str) -> anyhow::Result<AreaReport> {
            bail!("upstream 503")
        }
    }

    struct HotCollector;

    #[async_trait]
    impl Collector for HotCollector {
        fn area(&self) -> Area {
            Area::Sentiment
        }
        async fn collect(&self, symbol: &str) -> anyhow::Result<AreaReport> {
            Ok(AreaReport {
                area: Area::Sentiment,
                symbol: symbol.to_string(),
                score: 14.0, // out of range on purpose
                summary: "very bullish".into(),
                degraded: false,
                generated_at: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn failure_degrades_to_neutral() {
        let set = CollectorSet::new(vec![Arc::new(FailingCollector)]);
        let report = set.collect_or_neutral(Area::News, "BTC").await;
        assert!(report.degraded);
        assert_eq!(report.score, 5.0);
        assert!(report.summary.contains("503"));
    }

    #[tokio::test]
    async fn missing_collector_is_neutral() {
        let set = CollectorSet::default();
        let report = set.collect_or_neutral(Area::Technical, "BTC").await;
        assert!(report.degraded);
        assert_eq!(report.score, 5.0);
    }

    #[tokio::test]
    async fn scores_are_clamped() {
        let set = CollectorSet::new(vec![Arc::new(HotCollector)]);
        let report = set.collect_or_neutral(Area::Sentiment, "BTC").await;
        assert_eq!(report.score, 10.0);
        assert!(!report.degraded);
    }
}

//! Shared test fixtures: scriptable venue and model clients plus an
//! engine context wired to a tempfile-backed store.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pentabot::cache::CycleCache;
use pentabot::collectors::CollectorSet;
use pentabot::config::{BankrollMode, Config};
use pentabot::cycle::EngineContext;
use pentabot::errors::EngineError;
use pentabot::llm::ModelClient;
use pentabot::models::{default_roster, Portfolio};
use pentabot::sizing::SizingConfig;
use pentabot::store::Store;
use pentabot::venue::*;

// ---------------------------------------------------------------------------
// Mock venue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockVenue {
    pub summaries: Mutex<Vec<MarketSummary>>,
    pub details: Mutex<HashMap<String, MarketDetail>>,
    pub books: Mutex<HashMap<String, OrderBookQuote>>,
    /// Scripted responses for place_order, consumed in order; when empty a
    /// fresh success with a generated order id is returned.
    pub place_script: Mutex<VecDeque<PlaceOrderResponse>>,
    pub placed: Mutex<Vec<PlaceOrderRequest>>,
    pub cancelled: Mutex<Vec<String>>,
    pub cancel_script: Mutex<VecDeque<i64>>,
    pub trades: Mutex<Vec<TradeFill>>,
    pub redeem_script: Mutex<VecDeque<i64>>,
    pub redeemed: Mutex<Vec<String>>,
    order_counter: AtomicU64,
}

impl MockVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// One tradable Crypto market with the given ask.
    pub fn with_market(self, market_id: &str, ask: f64) -> Self {
        self.add_market(market_id, "Crypto", json!("ACTIVATED"), ask);
        self
    }

    pub fn add_market(&self, market_id: &str, category: &str, status: serde_json::Value, ask: f64) {
        let yes_token = format!("{market_id}-yes");
        let no_token = format!("{market_id}-no");
        self.summaries.lock().push(MarketSummary {
            market_id: market_id.to_string(),
            title: format!("BTC market {market_id}"),
            category: Some(category.to_string()),
            status: status.clone(),
            volume: Some(1000.0),
            resolution_time: None,
        });
        self.details.lock().insert(
            market_id.to_string(),
            MarketDetail {
                market_id: market_id.to_string(),
                title: format!("BTC market {market_id}"),
                category: Some(category.to_string()),
                status,
                yes_token_id: Some(yes_token.clone()),
                no_token_id: Some(no_token.clone()),
                ask_price: Some(ask),
                bid_price: Some((ask - 0.02).max(0.01)),
                volume: Some(1000.0),
                resolution_time: None,
                winner_token_id: None,
            },
        );
        let book = OrderBookQuote {
            ask: Some(ask),
            bid: Some((ask - 0.02).max(0.01)),
            mid: Some((ask - 0.01).max(0.01)),
            spread: Some(0.02),
        };
        self.books.lock().insert(yes_token, book.clone());
        self.books.lock().insert(no_token, book);
    }

    pub fn set_book(&self, token_id: &str, book: OrderBookQuote) {
        self.books.lock().insert(token_id.to_string(), book);
    }

    pub fn set_winner(&self, market_id: &str, winner_token_id: &str) {
        if let Some(detail) = self.details.lock().get_mut(market_id) {
            detail.status = json!("RESOLVED");
            detail.winner_token_id = Some(winner_token_id.to_string());
        }
    }

    pub fn add_fill(&self, order_id: &str, market_id: &str, token_id: &str, price: f64, size: f64) {
        self.trades.lock().push(TradeFill {
            order_id: order_id.to_string(),
            market_id: market_id.to_string(),
            token_id: token_id.to_string(),
            price,
            size,
            timestamp: Utc::now(),
        });
    }

    pub fn script_place(&self, errno: i64, order_id: Option<&str>, message: Option<&str>) {
        self.place_script.lock().push_back(PlaceOrderResponse {
            errno,
            order_id: order_id.map(|s| s.to_string()),
            message: message.map(|s| s.to_string()),
        });
    }
}

#[async_trait]
impl VenueApi for MockVenue {
    async fn enable_trading(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn get_markets(
        &self,
        _status: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MarketSummary>, EngineError> {
        let all = self.summaries.lock();
        Ok(all.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketDetail>, EngineError> {
        Ok(self.details.lock().get(market_id).cloned())
    }

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBookQuote, EngineError> {
        self.books
            .lock()
            .get(token_id)
            .cloned()
            .ok_or_else(|| EngineError::transient(format!("no book for {token_id}")))
    }

    async fn place_order(
        &self,
        req: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, EngineError> {
        self.placed.lock().push(req.clone());
        if let Some(scripted) = self.place_script.lock().pop_front() {
            return Ok(scripted);
        }
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst);
        Ok(PlaceOrderResponse {
            errno: 0,
            order_id: Some(format!("ord-{n}")),
            message: None,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, EngineError> {
        self.cancelled.lock().push(order_id.to_string());
        let errno = self.cancel_script.lock().pop_front().unwrap_or(0);
        Ok(CancelOrderResponse {
            errno,
            message: None,
        })
    }

    async fn redeem(&self, market_id: &str) -> Result<RedeemResponse, EngineError> {
        let errno = self.redeem_script.lock().pop_front().unwrap_or(0);
        if errno == 0 {
            self.redeemed.lock().push(market_id.to_string());
        }
        Ok(RedeemResponse {
            errno,
            tx_hash: (errno == 0).then(|| "0xabc".to_string()),
            message: (errno != 0).then(|| "insufficient gas".to_string()),
        })
    }

    async fn get_my_trades(&self) -> Result<Vec<TradeFill>, EngineError> {
        Ok(self.trades.lock().clone())
    }

    async fn get_my_positions(&self) -> Result<Vec<PositionInfo>, EngineError> {
        Ok(vec![])
    }

    async fn get_my_balances(&self) -> Result<BalanceInfo, EngineError> {
        Ok(BalanceInfo {
            available: 1000.0,
            native_gas: 1.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Mock model client
// ---------------------------------------------------------------------------

pub struct MockModel {
    /// Blob returned for every firm unless overridden per model id.
    pub default_blob: Mutex<String>,
    pub per_model: Mutex<HashMap<String, String>>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: AtomicU64,
}

impl MockModel {
    pub fn returning(blob: &str) -> Self {
        Self {
            default_blob: Mutex::new(blob.to_string()),
            per_model: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn predict(
        &self,
        model_id: &str,
        _system: &str,
        _user: &str,
    ) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(blob) = self.per_model.lock().get(model_id) {
            return Ok(blob.clone());
        }
        Ok(self.default_blob.lock().clone())
    }
}

/// Canonical decision blob.
pub fn decision_blob(probability: &str, confidence: f64) -> String {
    format!(
        r#"{{"probability": {probability}, "confidence": {confidence},
            "scores": {{"sentiment": 7, "news": 7, "technical": 7, "fundamental": 7, "volatility": 7}},
            "analyses": {{"sentiment": "s", "news": "n", "technical": "t", "fundamental": "f", "volatility": "v"}},
            "probability_reasoning": "model reasoning"}}"#
    )
}

// ---------------------------------------------------------------------------
// Context builder
// ---------------------------------------------------------------------------

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: ":memory:".into(),
        venue_base_url: "http://venue.invalid".into(),
        venue_api_key: "test-key".into(),
        wallet_private_key: "test-wallet".into(),
        venue_fee_rate: 0.03,
        llm_base_url: "http://llm.invalid".into(),
        llm_api_key: "test-llm".into(),
        bankroll_mode: BankrollMode::Test,
        system_enabled: true,
        dry_run: false,
        monitor_secret: "secret".into(),
        cycle_deadline: Duration::from_secs(900),
        cycle_interval: Duration::from_secs(86_400),
        monitor_interval: Duration::from_secs(1_800),
        request_timeout: Duration::from_secs(5),
        market_page_size: 20,
        market_cap: 200,
        sizing: SizingConfig::default(),
    }
}

pub struct TestEngine {
    pub ctx: EngineContext,
    pub venue: Arc<MockVenue>,
    pub model: Arc<MockModel>,
    _dir: tempfile::TempDir,
}

/// Engine context on a tempfile store with the five portfolios funded at
/// the TEST-mode initial balance.
pub async fn test_engine(venue: MockVenue, model: MockModel, config: Config) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("engine.db").to_str().unwrap()).unwrap();

    let initial = config.bankroll_mode.initial_balance();
    let now = Utc::now();
    store
        .with_tx(|tx| {
            for firm in default_roster() {
                tx.upsert_portfolio(&Portfolio::new(&firm.name, initial, now))?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let venue = Arc::new(venue);
    let model = Arc::new(model);
    let ctx = EngineContext {
        store,
        venue: venue.clone(),
        model: model.clone(),
        collectors: CollectorSet::default(),
        cache: Arc::new(CycleCache::new()),
        config: Arc::new(config),
        roster: default_roster(),
    };

    TestEngine {
        ctx,
        venue,
        model,
        _dir: dir,
    }
}

/// Keep only the named firm in the roster, so single-firm scenarios stay
/// readable.
pub fn solo_firm(engine: &mut TestEngine, firm: &str) {
    engine.ctx.roster.retain(|f| f.name == firm);
}

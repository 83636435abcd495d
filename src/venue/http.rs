//! HTTP implementation of the venue API.
//!
//! Transport-level failures (timeouts, 429, 5xx) retry with exponential
//! backoff; business rejections come back as decoded errnos and are never
//! retried here. A sliding-window rate limiter keeps the client inside the
//! venue's request budget.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::types::*;
use super::VenueApi;
use crate::errors::EngineError;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// Sliding-window request budget.
struct RateLimiter {
    requests_per_10s: u32,
    current_requests: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new(requests_per_10s: u32) -> Self {
        Self {
            requests_per_10s,
            current_requests: 0,
            window_start: Instant::now(),
        }
    }

    async fn acquire(&mut self) {
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(10) {
            self.current_requests = 0;
            self.window_start = Instant::now();
        }

        if self.current_requests >= self.requests_per_10s {
            let wait = Duration::from_secs(10).saturating_sub(elapsed);
            if wait > Duration::ZERO {
                debug!(wait_ms = wait.as_millis() as u64, "venue rate limit, waiting");
                sleep(wait).await;
                self.current_requests = 0;
                self.window_start = Instant::now();
            }
        }
        self.current_requests += 1;
    }
}

pub struct HttpVenueClient {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: Mutex<RateLimiter>,
}

impl HttpVenueClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("pentabot/0.1")
            .build()
            .map_err(|e| EngineError::config(format!("build venue http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            limiter: Mutex::new(RateLimiter::new(100)),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_RETRIES {
            self.limiter.lock().await.acquire().await;

            let result = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .query(query)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| EngineError::transient(format!("parse {path}: {e}")));
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(EngineError::VenueBusiness {
                        errno: 404,
                        message: format!("{path} not found"),
                    });
                }
                Ok(resp)
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error() =>
                {
                    warn!(path, attempt, status = %resp.status(), "venue throttling, backing off");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EngineError::VenueBusiness {
                        errno: status.as_u16() as i64,
                        message: body.chars().take(400).collect(),
                    });
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "venue request failed");
                }
            }

            if attempt < MAX_RETRIES {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }

        Err(EngineError::transient(format!(
            "max retries exceeded for {path}"
        )))
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        self.limiter.lock().await.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // A POST that never reached the business layer can be retried
            // by the caller's policy; one that did gets decoded upstream.
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(EngineError::transient(format!("{path}: http {status}")));
            }
            return Err(EngineError::VenueBusiness {
                errno: status.as_u16() as i64,
                message: body.chars().take(400).collect(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| EngineError::transient(format!("parse {path}: {e}")))
    }
}

#[async_trait]
impl VenueApi for HttpVenueClient {
    async fn enable_trading(&self) -> Result<(), EngineError> {
        #[derive(serde::Deserialize)]
        struct EnableResponse {
            errno: i64,
            #[serde(default)]
            message: Option<String>,
        }
        let resp: EnableResponse = self.post_json("/trading/enable", &serde_json::json!({})).await?;
        if resp.errno != 0 {
            return Err(super::decode_errno(resp.errno, resp.message.as_deref()));
        }
        Ok(())
    }

    async fn get_markets(
        &self,
        status: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MarketSummary>, EngineError> {
        self.get_json(
            "/markets",
            &[
                ("status", status.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketDetail>, EngineError> {
        match self
            .get_json::<MarketDetail>(&format!("/markets/{market_id}"), &[])
            .await
        {
            Ok(detail) => Ok(Some(detail)),
            Err(EngineError::VenueBusiness { errno: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_orderbook(&self, token_id: &str) -> Result<OrderBookQuote, EngineError> {
        self.get_json("/orderbook", &[("token_id", token_id.to_string())])
            .await
    }

    async fn place_order(
        &self,
        req: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, EngineError> {
        self.post_json("/orders", req).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, EngineError> {
        self.post_json(
            &format!("/orders/{order_id}/cancel"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn redeem(&self, market_id: &str) -> Result<RedeemResponse, EngineError> {
        self.post_json(
            "/redeem",
            &serde_json::json!({ "market_id": market_id }),
        )
        .await
    }

    async fn get_my_trades(&self) -> Result<Vec<TradeFill>, EngineError> {
        self.get_json("/my/trades", &[]).await
    }

    async fn get_my_positions(&self) -> Result<Vec<PositionInfo>, EngineError> {
        self.get_json("/my/positions", &[]).await
    }

    async fn get_my_balances(&self) -> Result<BalanceInfo, EngineError> {
        self.get_json("/my/balances", &[]).await
    }
}

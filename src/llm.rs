//! Model clients.
//!
//! All five firms route through one chat-completion gateway; each firm
//! carries its own model id. Rate-limit responses are classified transient
//! so the caller's retry policy can back off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::EngineError;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One prediction request. Returns the model's raw content blob; the
    /// validator owns all parsing.
    async fn predict(
        &self,
        model_id: &str,
        system: &str,
        user: &str,
    ) -> Result<String, EngineError>;
}

#[derive(Clone)]
pub struct ChatGatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
}

impl ChatGatewayClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        if api_key.trim().is_empty() {
            return Err(EngineError::config("model gateway api key empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::config(format!("build model http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens: 1400,
            temperature: 0.2,
            timeout,
        })
    }
}

#[async_trait]
impl ModelClient for ChatGatewayClient {
    async fn predict(
        &self,
        model_id: &str,
        system: &str,
        user: &str,
    ) -> Result<String, EngineError> {
        let start = Instant::now();

        let req = ChatCompletionRequest {
            model: model_id.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EngineError::transient(format!(
                "model gateway {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }
        if !status.is_success() {
            return Err(EngineError::schema(format!(
                "model gateway {}: {}",
                status.as_u16(),
                body.chars().take(400).collect::<String>()
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::schema(format!("model gateway json: {e}")))?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        debug!(
            model = model_id,
            latency_ms = start.elapsed().as_millis() as u64,
            tokens = ?parsed.usage.as_ref().and_then(|u| u.total_tokens),
            "model call complete"
        );
        Ok(content)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

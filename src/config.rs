//! Environment-driven configuration.
//!
//! Parsed once at startup. Missing or invalid mandatory values abort the
//! process with a non-zero exit; everything else has a sane default.

use crate::errors::EngineError;
use crate::sizing::SizingConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankrollMode {
    Test,
    Production,
}

impl BankrollMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEST" => Some(Self::Test),
            "PRODUCTION" | "PROD" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BankrollMode::Test => "TEST",
            BankrollMode::Production => "PRODUCTION",
        }
    }

    /// Initial per-firm bankroll in quote units.
    pub fn initial_balance(&self) -> f64 {
        match self {
            BankrollMode::Test => 50.0,
            BankrollMode::Production => 5000.0,
        }
    }

    /// Hard daily spend cap per firm; None means uncapped.
    pub fn daily_spend_cap(&self) -> Option<f64> {
        match self {
            BankrollMode::Test => Some(5.0),
            BankrollMode::Production => None,
        }
    }

    pub fn daily_bet_cap(&self) -> i64 {
        match self {
            BankrollMode::Test => 10,
            BankrollMode::Production => 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,

    pub venue_base_url: String,
    pub venue_api_key: String,
    pub wallet_private_key: String,
    /// Venue taker fee charged on payout at win time.
    pub venue_fee_rate: f64,

    pub llm_base_url: String,
    pub llm_api_key: String,

    pub bankroll_mode: BankrollMode,
    pub system_enabled: bool,
    pub dry_run: bool,
    pub monitor_secret: String,

    pub cycle_deadline: Duration,
    pub cycle_interval: Duration,
    pub monitor_interval: Duration,
    pub request_timeout: Duration,

    pub market_page_size: usize,
    pub market_cap: usize,

    pub sizing: SizingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        let venue_api_key = require("VENUE_API_KEY")?;
        let wallet_private_key = require("WALLET_PRIVATE_KEY")?;
        let llm_api_key = require("OPENROUTER_API_KEY")?;
        let monitor_secret = require("MONITOR_SECRET")?;

        let bankroll_mode = match env::var("BANKROLL_MODE") {
            Ok(v) => BankrollMode::parse(&v)
                .ok_or_else(|| EngineError::config(format!("BANKROLL_MODE invalid: {v:?}")))?,
            Err(_) => BankrollMode::Test,
        };

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_or("PORT", 8080)?,
            database_path: env_or("DATABASE_PATH", "pentabot.db"),
            venue_base_url: env_or("VENUE_BASE_URL", "https://api.venue.example"),
            venue_api_key,
            wallet_private_key,
            venue_fee_rate: parse_or("VENUE_FEE_RATE", 0.03)?,
            llm_base_url: env_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            llm_api_key,
            bankroll_mode,
            system_enabled: flag_or("SYSTEM_ENABLED", true),
            dry_run: flag_or("DRY_RUN", false),
            monitor_secret,
            cycle_deadline: Duration::from_secs(parse_or("CYCLE_DEADLINE_SECS", 900)?),
            cycle_interval: Duration::from_secs(parse_or("CYCLE_INTERVAL_SECS", 86_400)?),
            monitor_interval: Duration::from_secs(parse_or("MONITOR_INTERVAL_SECS", 1_800)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 30)?),
            market_page_size: parse_or("MARKET_PAGE_SIZE", 20)?,
            market_cap: parse_or("MARKET_CAP", 200)?,
            sizing: SizingConfig::from_env(),
        })
    }

    /// Which secrets are present, without ever exposing their values.
    /// Reported on `/health`.
    pub fn configured_key_flags(&self) -> serde_json::Value {
        serde_json::json!({
            "venue_api_key": !self.venue_api_key.is_empty(),
            "wallet_private_key": !self.wallet_private_key.is_empty(),
            "llm_api_key": !self.llm_api_key.is_empty(),
            "monitor_secret": !self.monitor_secret.is_empty(),
        })
    }
}

fn require(key: &str) -> Result<String, EngineError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EngineError::config(format!("{key} missing (set env var)"))),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn flag_or(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, EngineError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|_| EngineError::config(format!("{key} invalid: {v:?}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bankroll_modes() {
        assert_eq!(BankrollMode::parse("test"), Some(BankrollMode::Test));
        assert_eq!(
            BankrollMode::parse("PRODUCTION"),
            Some(BankrollMode::Production)
        );
        assert_eq!(BankrollMode::parse("staging"), None);
        assert_eq!(BankrollMode::Test.initial_balance(), 50.0);
        assert_eq!(BankrollMode::Test.daily_spend_cap(), Some(5.0));
        assert_eq!(BankrollMode::Production.daily_spend_cap(), None);
    }
}

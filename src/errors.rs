//! Engine error taxonomy.
//!
//! Only the kinds the control flow actually branches on get a variant.
//! Everything else rides through `anyhow` context at the call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal at startup; the process exits non-zero.
    #[error("configuration error: {0}")]
    Config(String),

    /// Timeout, lock, rate limit. Caller may retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable business rejection decoded from a venue errno.
    #[error("venue error {errno}: {message}")]
    VenueBusiness { errno: i64, message: String },

    /// Model output could not be normalised into a prediction.
    #[error("decision rejected: {0}")]
    Schema(String),

    /// Store invariant violation; the current transaction rolled back.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Unexpected storage failure that is neither transient nor integrity.
    #[error("storage error: {0}")]
    Storage(String),
}

// Tier vetoes and cycle deadline overruns are expected outcomes, not
// errors: they travel as `RiskVerdict::Rejected` and `CycleStatus::Partial`
// rather than through this enum.

impl EngineError {
    /// Whether a retry with backoff can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        EngineError::Transient(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        EngineError::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        // Connect failures and timeouts are worth another attempt; anything
        // that produced a response body is classified by the caller.
        if e.is_timeout() || e.is_connect() {
            EngineError::Transient(e.to_string())
        } else {
            EngineError::Transient(format!("http: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(EngineError::transient("timeout").is_retryable());
        assert!(!EngineError::VenueBusiness {
            errno: 10403,
            message: "Invalid area".into()
        }
        .is_retryable());
        assert!(!EngineError::Schema("bad probability".into()).is_retryable());
    }
}

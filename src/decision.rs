//! Decision validator.
//!
//! Model JSON is untrusted: fields go missing, probabilities arrive as
//! percentages or strings, scores arrive as anything. All parsing and
//! defaulting lives here; a model's shape never leaks past this module.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{AreaScores, AreaTexts, Prediction};

/// Normalise a raw model blob into a canonical Prediction.
pub fn validate_decision(
    firm: &str,
    market_id: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<Prediction, EngineError> {
    let value = extract_json(raw)?;
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::schema("decision is not a JSON object"))?;

    let probability = parse_probability(
        obj.get("probability")
            .ok_or_else(|| EngineError::schema("probability missing"))?,
    )?;

    let confidence = match obj.get("confidence") {
        Some(v) => {
            let c = parse_number(v).ok_or_else(|| EngineError::schema("confidence not numeric"))?;
            if !(0.0..=10.0).contains(&c) {
                return Err(EngineError::schema(format!("confidence out of range: {c}")));
            }
            c
        }
        None => return Err(EngineError::schema("confidence missing")),
    };

    let scores_obj = obj.get("scores").and_then(|v| v.as_object());
    let scores = AreaScores {
        sentiment: parse_score(scores_obj.and_then(|s| s.get("sentiment")))?,
        news: parse_score(scores_obj.and_then(|s| s.get("news")))?,
        technical: parse_score(scores_obj.and_then(|s| s.get("technical")))?,
        fundamental: parse_score(scores_obj.and_then(|s| s.get("fundamental")))?,
        volatility: parse_score(scores_obj.and_then(|s| s.get("volatility")))?,
    };

    let analyses_obj = obj
        .get("analyses")
        .and_then(|v| v.as_object())
        .ok_or_else(|| EngineError::schema("analyses missing"))?;
    let analyses = AreaTexts {
        sentiment: required_text(analyses_obj.get("sentiment"), "analyses.sentiment")?,
        news: required_text(analyses_obj.get("news"), "analyses.news")?,
        technical: required_text(analyses_obj.get("technical"), "analyses.technical")?,
        fundamental: required_text(analyses_obj.get("fundamental"), "analyses.fundamental")?,
        volatility: required_text(analyses_obj.get("volatility"), "analyses.volatility")?,
    };

    let probability_reasoning = required_text(
        obj.get("probability_reasoning"),
        "probability_reasoning",
    )?;

    Ok(Prediction {
        id: Uuid::new_v4().to_string(),
        firm: firm.to_string(),
        market_id: market_id.to_string(),
        probability,
        confidence,
        scores,
        analyses,
        probability_reasoning,
        skip_reason: None,
        created_at: now,
    })
}

/// Pull the JSON object out of the blob, tolerating markdown fences and
/// leading prose.
fn extract_json(raw: &str) -> Result<Value, EngineError> {
    let trimmed = raw.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    // ```json ... ``` fences
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Ok(v);
            }
        }
    }

    // First-brace to last-brace slice.
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[open..=close]) {
                return Ok(v);
            }
        }
    }

    Err(EngineError::schema("no parseable JSON in model output"))
}

fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Probability normalisation: values in (1, 100] are treated as percent.
/// `1` stays a probability; `100` becomes `1.0`; anything outside [0, 100]
/// rejects.
pub fn parse_probability(v: &Value) -> Result<f64, EngineError> {
    let n = parse_number(v)
        .ok_or_else(|| EngineError::schema(format!("probability not numeric: {v}")))?;
    if !n.is_finite() {
        return Err(EngineError::schema("probability not finite"));
    }
    let p = if n > 1.0 && n <= 100.0 { n / 100.0 } else { n };
    if !(0.0..=1.0).contains(&p) {
        return Err(EngineError::schema(format!("probability out of range: {n}")));
    }
    Ok(p)
}

/// Missing scores default to neutral 5; present scores must land in [0, 10].
fn parse_score(v: Option<&Value>) -> Result<f64, EngineError> {
    let Some(v) = v else { return Ok(5.0) };
    if v.is_null() {
        return Ok(5.0);
    }
    let n = parse_number(v).ok_or_else(|| EngineError::schema(format!("score not numeric: {v}")))?;
    if !(0.0..=10.0).contains(&n) {
        return Err(EngineError::schema(format!("score out of range: {n}")));
    }
    Ok(n)
}

/// Texts must be present; empty strings are allowed.
fn required_text(v: Option<&Value>, field: &str) -> Result<String, EngineError> {
    match v {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(EngineError::schema(format!("{field} missing"))),
        Some(other) => Ok(other.to_string()),
    }
}

// =============================================================================
// Decision contract — what the external decision service receives and returns
// =============================================================================

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// Direction of a trade decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Call,
    Put,
    Hold,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Immutable decision returned by a [`DecisionEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub symbol: String,
    pub action: TradeAction,
    /// Number of candle intervals to hold (1–3).
    pub duration: u32,
    /// Suggested stake in account currency.
    pub stake: f64,
    /// 0–100.
    pub confidence: u8,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_analysis: Option<String>,
}

/// Input to a decision call.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub symbol: String,
    /// Most recent closed candles, ascending by epoch.
    pub candles: Vec<Candle>,
    pub balance: f64,
    pub timeframe_minutes: f64,
}

/// Opaque, stateless, fallible decision service.
///
/// Implementations perform no retries and hold no per-call state; the caller
/// owns timeouts and re-enqueueing.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<TradeDecision>;
}

// ---------------------------------------------------------------------------
// Response validation
// ---------------------------------------------------------------------------

/// Loosely-typed decision payload as produced by the service.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    stake: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    technical_analysis: Option<String>,
}

/// Parse and validate a JSON decision body for `symbol`.
///
/// Code fences around the JSON are tolerated. Duration is clamped to 1–3 and
/// confidence to 0–100; a non-finite or negative stake is rejected.
pub fn parse_decision(symbol: &str, text: &str) -> Result<TradeDecision> {
    let body = strip_code_fence(text);
    let raw: RawDecision = serde_json::from_str(body).context("decision is not valid JSON")?;

    let action = match raw.action.trim().to_uppercase().as_str() {
        "CALL" => TradeAction::Call,
        "PUT" => TradeAction::Put,
        "HOLD" => TradeAction::Hold,
        other => bail!("unknown decision action: {other}"),
    };

    let stake = raw.stake.unwrap_or(0.0);
    if !stake.is_finite() || stake < 0.0 {
        bail!("invalid stake in decision: {stake}");
    }

    let duration = raw.duration.filter(|d| d.is_finite()).unwrap_or(1.0).round().clamp(1.0, 3.0) as u32;
    let confidence = raw
        .confidence
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
        .round()
        .clamp(0.0, 100.0) as u8;

    Ok(TradeDecision {
        symbol: symbol.to_string(),
        action,
        duration,
        stake,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
        technical_analysis: raw.technical_analysis.filter(|t| !t.trim().is_empty()),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

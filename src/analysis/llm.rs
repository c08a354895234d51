// =============================================================================
// Chat-completion decision engine
// =============================================================================
//
// Sends the candle window to an OpenAI-compatible chat-completions endpoint in
// JSON mode and validates the reply into a `TradeDecision`. The call carries
// its own HTTP timeout, but the analysis queue's wall-clock timeout is the
// authoritative bound.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::decision::{parse_decision, DecisionEngine, DecisionRequest, TradeDecision};
use crate::market_data::Candle;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const HTTP_TIMEOUT_SECS: u64 = 90;

/// Connection settings for the decision service.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl LlmSettings {
    /// Read `DECISION_API_URL`, `DECISION_API_KEY` and `DECISION_MODEL`.
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("DECISION_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into()),
            api_key: std::env::var("DECISION_API_KEY").unwrap_or_default(),
            model: std::env::var("DECISION_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    content: Option<String>,
}

pub struct LlmDecisionEngine {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl LlmDecisionEngine {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("failed to build decision HTTP client")?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl DecisionEngine for LlmDecisionEngine {
    async fn decide(&self, request: DecisionRequest) -> Result<TradeDecision> {
        let prompt = build_prompt(&request);
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a price-action binary options trader. Respond with JSON only.",
                },
                ChatMessage { role: "user", content: &prompt },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.2,
        };

        debug!(symbol = %request.symbol, candles = request.candles.len(), "calling decision service");

        let resp = self
            .client
            .post(&self.settings.api_url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("decision service request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("decision service error {status}: {text}");
        }

        let data: ChatResponse = resp.json().await.context("decision response parse error")?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("decision service returned empty content")?;

        parse_decision(&request.symbol, &content)
    }
}

/// One line per candle: `T:HH:MM|O:..|H:..|L:..|C:..`.
fn format_candles(candles: &[Candle]) -> String {
    candles
        .iter()
        .map(|c| {
            let time = DateTime::<Utc>::from_timestamp(c.epoch, 0)
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            format!("T:{time}|O:{}|H:{}|L:{}|C:{}", c.open, c.high, c.low, c.close)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(request: &DecisionRequest) -> String {
    format!(
        "Trading {symbol} on the {tf}-minute timeframe. Account balance: {balance:.2}.\n\
         Last {n} candles (OHLC only, oldest first):\n{ohlc}\n\n\
         Read market structure, wick rejection, body momentum and key levels from the \
         candle geometry alone. Judge the latest closed candle in the context of the \
         previous ones. Size the stake from the balance: under 100 risk 10-15%, \
         over 100 risk 5-8%, over 1000 risk 2-4%.\n\n\
         Reply with JSON: {{\"action\": \"CALL\"|\"PUT\"|\"HOLD\", \
         \"duration\": 1|2|3 (number of candles to hold), \"stake\": number, \
         \"confidence\": 0-100, \"reasoning\": short setup name, \
         \"technical_analysis\": detailed read of the candles}}",
        symbol = request.symbol,
        tf = request.timeframe_minutes,
        balance = request.balance,
        n = request.candles.len(),
        ohlc = format_candles(&request.candles),
    )
}

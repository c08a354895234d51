// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable lives here. Persistence uses an atomic tmp + rename pattern to
// prevent corruption on crash. All fields carry `#[serde(default)]` so that
// adding new fields never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market_data::candle_buffer::MAX_CANDLES;
use crate::market_data::symbols::is_supported_timeframe;
use crate::types::TradingMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["R_100".to_string(), "R_50".to_string(), "1HZ100V".to_string()]
}

fn default_timeframe_secs() -> u32 {
    60
}

fn default_ws_url() -> String {
    "wss://ws.binaryws.com/websockets/v3".to_string()
}

fn default_app_id() -> u32 {
    1089
}

fn default_max_candles() -> usize {
    MAX_CANDLES
}

fn default_history_count() -> u32 {
    50
}

fn default_min_analysis_candles() -> usize {
    5
}

fn default_backfill_analysis_candles() -> usize {
    10
}

fn default_decision_window() -> usize {
    20
}

fn default_analysis_timeout_secs() -> u64 {
    60
}

fn default_cooldown_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_min_stake() -> f64 {
    0.35
}

fn default_price_ceiling_buffer() -> f64 {
    100.0
}

// =============================================================================
// AnalysisParams
// =============================================================================

/// Pacing and windowing for the analysis queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Windows shorter than this are never enqueued.
    #[serde(default = "default_min_analysis_candles")]
    pub min_candles: usize,

    /// A backfill leaving at least this many candles triggers one analysis.
    #[serde(default = "default_backfill_analysis_candles")]
    pub backfill_min_candles: usize,

    /// Most recent candles sent to the decision service.
    #[serde(default = "default_decision_window")]
    pub decision_window: usize,

    /// Wall-clock bound on one decision call.
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause between consecutive decision calls.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            min_candles: default_min_analysis_candles(),
            backfill_min_candles: default_backfill_analysis_candles(),
            decision_window: default_decision_window(),
            timeout_secs: default_analysis_timeout_secs(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Whether decisions are turned into orders.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Symbols to stream and analyse.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candle interval in seconds (60, 180 or 300).
    #[serde(default = "default_timeframe_secs")]
    pub timeframe_secs: u32,

    // --- Session -------------------------------------------------------------

    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_app_id")]
    pub app_id: u32,

    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Delay between cancelling candle subscriptions and re-subscribing on a
    /// timeframe switch.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    // --- Candles -------------------------------------------------------------

    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    #[serde(default = "default_history_count")]
    pub history_count: u32,

    // --- Orders --------------------------------------------------------------

    #[serde(default = "default_min_stake")]
    pub min_stake: f64,

    /// Added to the stake to form the buy price ceiling.
    #[serde(default = "default_price_ceiling_buffer")]
    pub price_ceiling_buffer: f64,

    #[serde(default)]
    pub analysis: AnalysisParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            symbols: default_symbols(),
            timeframe_secs: default_timeframe_secs(),
            ws_url: default_ws_url(),
            app_id: default_app_id(),
            keepalive_secs: default_keepalive_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            max_candles: default_max_candles(),
            history_count: default_history_count(),
            min_stake: default_min_stake(),
            price_ceiling_buffer: default_price_ceiling_buffer(),
            analysis: AnalysisParams::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.sanitise();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            timeframe_secs = config.timeframe_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `PULSE_SYMBOLS` and `PULSE_TIMEFRAME_SECS` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("PULSE_SYMBOLS") {
            let symbols: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                self.symbols = symbols;
            }
        }
        if let Ok(tf) = std::env::var("PULSE_TIMEFRAME_SECS") {
            match tf.trim().parse::<u32>() {
                Ok(secs) => self.timeframe_secs = secs,
                Err(e) => warn!(value = %tf, error = %e, "ignoring invalid PULSE_TIMEFRAME_SECS"),
            }
        }
        if let Ok(app_id) = std::env::var("DERIV_APP_ID") {
            match app_id.trim().parse::<u32>() {
                Ok(id) => self.app_id = id,
                Err(e) => warn!(value = %app_id, error = %e, "ignoring invalid DERIV_APP_ID"),
            }
        }
        self.sanitise();
    }

    /// Full session URL including the application id.
    pub fn session_url(&self) -> String {
        format!("{}?app_id={}", self.ws_url, self.app_id)
    }

    fn sanitise(&mut self) {
        if !is_supported_timeframe(self.timeframe_secs) {
            warn!(
                timeframe_secs = self.timeframe_secs,
                "unsupported timeframe, falling back to 60s"
            );
            self.timeframe_secs = default_timeframe_secs();
        }
        if !(1..=MAX_CANDLES).contains(&self.max_candles) {
            warn!(
                max_candles = self.max_candles,
                limit = MAX_CANDLES,
                "max_candles out of range, clamping"
            );
            self.max_candles = self.max_candles.clamp(1, MAX_CANDLES);
        }
        let mut seen = std::collections::HashSet::new();
        self.symbols.retain(|s| seen.insert(s.clone()));
    }
}

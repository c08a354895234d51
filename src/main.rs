// =============================================================================
// Pulse Trader — Main Entry Point
// =============================================================================
//
// The engine always starts with automated trading Paused. Trading has to be
// started explicitly through the control API once a session is live.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod contract_tracker;
mod deriv;
mod execution;
mod log_feed;
mod market_data;
mod router;
mod runtime_config;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::{AnalysisQueue, DecisionEngine, LlmDecisionEngine, LlmSettings};
use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::deriv::{ConnectionManager, Outbox};
use crate::execution::TradeExecutor;
use crate::router::MessageRouter;
use crate::runtime_config::RuntimeConfig;
use crate::types::TradingMode;

const CONFIG_PATH: &str = "runtime_config.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Pulse Trader starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    // SAFETY: never resume trading automatically.
    config.trading_mode = TradingMode::Paused;

    info!(
        symbols = ?config.symbols,
        timeframe_secs = config.timeframe_secs,
        trading_mode = %config.trading_mode,
        "Engine configured"
    );

    // ── 2. Build shared state & components ───────────────────────────────
    let (min_stake, price_ceiling_buffer) = (config.min_stake, config.price_ceiling_buffer);
    let state = Arc::new(AppState::new(config));
    let outbox = Arc::new(Outbox::new());

    let executor = Arc::new(TradeExecutor::new(
        Arc::clone(&outbox),
        min_stake,
        price_ceiling_buffer,
    ));

    let settings = LlmSettings::from_env();
    if settings.api_key.is_empty() {
        warn!("DECISION_API_KEY is not set, decision calls will fail");
    }
    let engine: Arc<dyn DecisionEngine> = Arc::new(LlmDecisionEngine::new(settings)?);

    let queue = Arc::new(AnalysisQueue::new(Arc::clone(&state), engine, executor));
    let worker = queue.spawn();

    let router = Arc::new(MessageRouter::new(
        Arc::clone(&state),
        Arc::clone(&queue),
        Arc::clone(&outbox),
    ));
    let connection = Arc::new(ConnectionManager::new(
        Arc::clone(&state),
        Arc::clone(&outbox),
        router,
        Arc::clone(&queue),
    ));

    // ── 3. API server ────────────────────────────────────────────────────
    let ctx = ApiContext::new(Arc::clone(&state), Arc::clone(&connection), CONFIG_PATH);
    let app = api::rest::router(ctx);

    let bind_addr = std::env::var("PULSE_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    // ── 4. Optional auto-connect ─────────────────────────────────────────
    match std::env::var("DERIV_API_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            if let Err(e) = connection.connect(&token).await {
                error!(error = %e, "Auto-connect failed; use the control API to retry");
            }
        }
        _ => info!("DERIV_API_TOKEN not set, waiting for a connect request"),
    }

    // ── 5. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    connection.disconnect();
    worker.abort();
    server.abort();

    let final_config = state.runtime_config.read().clone();
    if let Err(e) = final_config.save(CONFIG_PATH) {
        error!(error = %e, "Failed to save config on shutdown");
    }

    info!("Pulse Trader stopped");
    Ok(())
}

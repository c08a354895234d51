// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. `health` is public; everything else
// requires a Bearer token checked by the `AuthBearer` extractor.
//
// Reads return copies built from the shared state. Control endpoints go
// through the connection manager so upstream subscriptions stay in sync.
// =============================================================================

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::api::ApiContext;
use crate::log_feed::LogLevel;
use crate::market_data::symbols::AVAILABLE_SYMBOLS;
use crate::types::TradingMode;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// =============================================================================
// Router construction
// =============================================================================

pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/logs", get(logs))
        .route("/api/v1/contracts", get(contracts))
        .route("/api/v1/symbols", get(symbols).post(add_symbol))
        .route("/api/v1/symbols/:symbol", delete(remove_symbol))
        .route("/api/v1/timeframe", post(set_timeframe))
        .route("/api/v1/control/connect", post(control_connect))
        .route("/api/v1/control/disconnect", post(control_disconnect))
        .route("/api/v1/control/trading", post(control_trading))
        // ── WebSocket feed ──────────────────────────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connection: String,
    session_open: bool,
    state_version: u64,
    server_time: i64,
}

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connection: ctx.state.connection_state().to_string(),
        session_open: ctx.connection.has_session(),
        state_version: ctx.state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Reads (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.build_snapshot())
}

async fn logs(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.log_feed.entries())
}

async fn contracts(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    let contracts = &ctx.state.contracts;
    Json(serde_json::json!({
        "open": contracts.open_contracts(),
        "settled": contracts.settled_contracts(),
        "realized_pnl": contracts.realized_pnl(),
    }))
}

#[derive(Serialize)]
struct SymbolEntry {
    symbol: &'static str,
    display_name: &'static str,
    active: bool,
}

async fn symbols(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    let active = ctx.state.active_symbols();
    let entries: Vec<SymbolEntry> = AVAILABLE_SYMBOLS
        .iter()
        .map(|&(symbol, display_name)| SymbolEntry {
            symbol,
            display_name,
            active: active.iter().any(|s| s == symbol),
        })
        .collect();
    Json(entries)
}

// =============================================================================
// Subscriptions (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct SymbolRequest {
    symbol: String,
}

async fn add_symbol(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<SymbolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = req.symbol.trim();
    let added = ctx
        .connection
        .add_symbol(symbol)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    if added {
        info!(symbol, "symbol added via API");
        ctx.persist_config();
    }
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "added": added,
        "active_symbols": ctx.state.active_symbols(),
    })))
}

async fn remove_symbol(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Path(symbol): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !ctx.connection.remove_symbol(&symbol) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("symbol not active: {symbol}"),
        ));
    }
    info!(symbol = %symbol, "symbol removed via API");
    ctx.persist_config();
    Ok(Json(serde_json::json!({
        "symbol": symbol,
        "removed": true,
        "active_symbols": ctx.state.active_symbols(),
    })))
}

#[derive(Deserialize)]
struct TimeframeRequest {
    seconds: u32,
}

async fn set_timeframe(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<TimeframeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let changed = ctx
        .connection
        .change_timeframe(req.seconds)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    if changed {
        ctx.persist_config();
    }
    Ok(Json(serde_json::json!({
        "timeframe_secs": ctx.state.timeframe_secs(),
        "changed": changed,
    })))
}

// =============================================================================
// Session & trading control (authenticated)
// =============================================================================

#[derive(Deserialize, Default)]
struct ConnectRequest {
    #[serde(default)]
    token: Option<String>,
}

async fn control_connect(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    body: Option<Json<ConnectRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let token = body
        .and_then(|Json(req)| req.token)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| std::env::var("DERIV_API_TOKEN").ok())
        .unwrap_or_default();
    if token.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing API token"));
    }

    ctx.connection.connect(&token).await.map_err(|e| {
        warn!(error = %e, "connect via API failed");
        api_error(StatusCode::BAD_GATEWAY, format!("{e:#}"))
    })?;

    Ok(Json(serde_json::json!({
        "connection": ctx.state.connection_state().to_string(),
    })))
}

async fn control_disconnect(_auth: AuthBearer, State(ctx): State<ApiContext>) -> impl IntoResponse {
    ctx.connection.disconnect();
    Json(serde_json::json!({
        "connection": ctx.state.connection_state().to_string(),
    }))
}

#[derive(Deserialize)]
struct TradingRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: TradingMode,
    message: &'static str,
}

async fn control_trading(
    _auth: AuthBearer,
    State(ctx): State<ApiContext>,
    Json(req): Json<TradingRequest>,
) -> impl IntoResponse {
    let (mode, level, message) = if req.enabled {
        (TradingMode::Live, LogLevel::Success, "Automated trading started")
    } else {
        (TradingMode::Paused, LogLevel::Warning, "Automated trading stopped")
    };

    if ctx.state.trading_enabled() != req.enabled {
        ctx.state.set_trading_mode(mode);
        ctx.state.log(level, message);
    }

    Json(ControlResponse {
        trading_mode: mode,
        message,
    })
}

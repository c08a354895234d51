// =============================================================================
// Central Application State — Pulse Trading Engine
// =============================================================================
//
// The single source of truth for the engine. Inbound session messages, the
// analysis worker and the control API all mutate it through short,
// non-awaiting critical sections; the dashboard only ever sees read-only
// snapshots built from it.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for every mutable collection.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::contract_tracker::{ContractTracker, OpenContract, SettledContract};
use crate::log_feed::{LogEntry, LogFeed, LogLevel};
use crate::market_data::{CandleAggregator, StreamSnapshot};
use crate::runtime_config::RuntimeConfig;
use crate::types::{AccountInfo, ConnectionState, TradingMode};

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Incremented on every meaningful mutation. The WebSocket feed uses this
    /// to detect changes and push updates.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market data ─────────────────────────────────────────────────────
    pub aggregator: RwLock<CandleAggregator>,

    // ── Positions ───────────────────────────────────────────────────────
    pub contracts: ContractTracker,

    // ── Account / session ───────────────────────────────────────────────
    pub account: RwLock<AccountInfo>,
    pub connection: RwLock<ConnectionState>,

    // ── Event feed ──────────────────────────────────────────────────────
    pub log_feed: LogFeed,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let aggregator = CandleAggregator::new(config.timeframe_secs, config.max_candles);
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            aggregator: RwLock::new(aggregator),
            contracts: ContractTracker::new(),
            account: RwLock::new(AccountInfo::default()),
            connection: RwLock::new(ConnectionState::Disconnected),
            log_feed: LogFeed::default(),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Event feed ──────────────────────────────────────────────────────

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log_feed.push(level, message);
        self.increment_version();
    }

    // ── Config accessors ────────────────────────────────────────────────

    /// Selected candle interval in seconds.
    pub fn timeframe_secs(&self) -> u32 {
        self.runtime_config.read().timeframe_secs
    }

    pub fn trading_enabled(&self) -> bool {
        self.runtime_config.read().trading_mode == TradingMode::Live
    }

    pub fn set_trading_mode(&self, mode: TradingMode) {
        self.runtime_config.write().trading_mode = mode;
        self.increment_version();
    }

    /// Symbols that should be streaming whenever the session is live.
    pub fn active_symbols(&self) -> Vec<String> {
        self.runtime_config.read().symbols.clone()
    }

    /// Returns `false` if the symbol was already active.
    pub fn add_active_symbol(&self, symbol: &str) -> bool {
        let mut config = self.runtime_config.write();
        if config.symbols.iter().any(|s| s == symbol) {
            return false;
        }
        config.symbols.push(symbol.to_string());
        drop(config);
        self.increment_version();
        true
    }

    /// Returns `false` if the symbol was not active.
    pub fn remove_active_symbol(&self, symbol: &str) -> bool {
        let mut config = self.runtime_config.write();
        let before = config.symbols.len();
        config.symbols.retain(|s| s != symbol);
        let removed = config.symbols.len() != before;
        drop(config);
        if removed {
            self.increment_version();
        }
        removed
    }

    // ── Session / account ───────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection.write() = state;
        self.increment_version();
    }

    pub fn balance(&self) -> f64 {
        self.account.read().balance
    }

    pub fn currency(&self) -> String {
        self.account.read().currency.clone()
    }

    pub fn set_account(&self, balance: f64, currency: &str, login_id: &str) {
        {
            let mut account = self.account.write();
            account.balance = balance;
            account.currency = currency.to_string();
            account.login_id = Some(login_id.to_string());
        }
        self.increment_version();
    }

    pub fn set_balance(&self, balance: f64, currency: Option<&str>) {
        {
            let mut account = self.account.write();
            account.balance = balance;
            if let Some(c) = currency.filter(|c| !c.is_empty()) {
                account.currency = c.to_string();
            }
        }
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Read-only projection of the whole engine for the presentation layer.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read().clone();
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            connection: self.connection_state(),
            account: self.account.read().clone(),
            trading_mode: config.trading_mode,
            timeframe_secs: config.timeframe_secs,
            active_symbols: config.symbols,
            streams: self.aggregator.read().snapshot(),
            open_contracts: self.contracts.open_contracts(),
            settled_contracts: self.contracts.settled_contracts(),
            realized_pnl: self.contracts.realized_pnl(),
            logs: self.log_feed.entries(),
        }
    }
}

/// Complete, serialisable view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub connection: ConnectionState,
    pub account: AccountInfo,
    pub trading_mode: TradingMode,
    pub timeframe_secs: u32,
    pub active_symbols: Vec<String>,
    pub streams: Vec<StreamSnapshot>,
    pub open_contracts: Vec<OpenContract>,
    pub settled_contracts: Vec<SettledContract>,
    pub realized_pnl: f64,
    pub logs: Vec<LogEntry>,
}

// =============================================================================
// Subscription Registry — which symbols stream, and keeping upstream in sync
// =============================================================================
//
// The active symbol list lives in the runtime config so it survives restarts.
// Changes made while the session is live are applied upstream immediately;
// otherwise they are only recorded and take effect on the next authorisation.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::analysis::AnalysisQueue;
use crate::app_state::AppState;
use crate::deriv::{OutboundRequest, Outbox};
use crate::log_feed::LogLevel;
use crate::market_data::symbols::{display_name, is_available};
use crate::types::ConnectionState;

/// Start streaming `symbol`: fresh stream state, then backfill + subscribe.
pub fn subscribe_symbol(state: &AppState, outbox: &Outbox, symbol: &str) {
    let (granularity, count) = {
        let config = state.runtime_config.read();
        (config.timeframe_secs, config.history_count)
    };
    state.aggregator.write().subscribe(symbol);
    state.increment_version();
    if !outbox.send(OutboundRequest::CandleHistory {
        symbol: symbol.to_string(),
        count,
        granularity,
    }) {
        warn!(symbol, "history request not sent: no open session");
    }
}

pub struct SubscriptionRegistry {
    state: Arc<AppState>,
    outbox: Arc<Outbox>,
    queue: Arc<AnalysisQueue>,
}

impl SubscriptionRegistry {
    pub fn new(state: Arc<AppState>, outbox: Arc<Outbox>, queue: Arc<AnalysisQueue>) -> Self {
        Self { state, outbox, queue }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.state.active_symbols()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.state.active_symbols().iter().any(|s| s == symbol)
    }

    /// Activate `symbol`. Returns `Ok(false)` if it was already active.
    pub fn add(&self, symbol: &str) -> Result<bool> {
        if !is_available(symbol) {
            bail!("unknown symbol: {symbol}");
        }
        if !self.state.add_active_symbol(symbol) {
            return Ok(false);
        }

        if self.is_live() {
            subscribe_symbol(&self.state, &self.outbox, symbol);
            self.state.log(
                LogLevel::Info,
                format!("Subscribed to {}", display_name(symbol)),
            );
        } else {
            debug!(symbol, "symbol recorded, subscribes on next session");
        }
        Ok(true)
    }

    /// Deactivate `symbol` and drop its stream state. Returns `false` if it
    /// was not active.
    pub fn remove(&self, symbol: &str) -> bool {
        if !self.state.remove_active_symbol(symbol) {
            return false;
        }

        let mut aggregator = self.state.aggregator.write();
        let stream = aggregator.unsubscribe(symbol);
        if self.is_live() {
            match stream.map(|s| s.subscription_id) {
                Some(Some(subscription_id)) => {
                    self.outbox.send(OutboundRequest::Forget { subscription_id });
                }
                Some(None) => {
                    debug!(symbol, "subscription id not known yet, cancelling on history reply");
                    aggregator.defer_forget(symbol);
                }
                None => {}
            }
        }
        drop(aggregator);
        self.queue.remove(symbol);

        self.state.log(
            LogLevel::Info,
            format!("Removed {}", display_name(symbol)),
        );
        true
    }

    /// Backfill + subscribe every active symbol.
    pub fn subscribe_all(&self) {
        for symbol in self.state.active_symbols() {
            subscribe_symbol(&self.state, &self.outbox, &symbol);
        }
    }

    fn is_live(&self) -> bool {
        self.state.connection_state() == ConnectionState::Live
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("symbols", &self.symbols())
            .finish()
    }
}

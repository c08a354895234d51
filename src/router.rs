// =============================================================================
// Message Router — routes each inbound message to the component that owns it
// =============================================================================
//
// Every inbound frame is handled to completion before the next one, so the
// candle buffers and the open-contract set only ever have one writer.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::analysis::AnalysisQueue;
use crate::app_state::AppState;
use crate::contract_tracker::{ContractEvent, ContractUpdate};
use crate::deriv::subscriptions::subscribe_symbol;
use crate::deriv::{InboundMessage, OutboundRequest, Outbox};
use crate::log_feed::LogLevel;
use crate::market_data::Candle;
use crate::types::ConnectionState;

pub struct MessageRouter {
    state: Arc<AppState>,
    queue: Arc<AnalysisQueue>,
    outbox: Arc<Outbox>,
}

impl MessageRouter {
    pub fn new(state: Arc<AppState>, queue: Arc<AnalysisQueue>, outbox: Arc<Outbox>) -> Self {
        Self { state, queue, outbox }
    }

    pub fn handle(&self, message: InboundMessage) {
        match message {
            InboundMessage::Authorized {
                balance,
                currency,
                login_id,
            } => self.on_authorized(balance, &currency, &login_id),
            InboundMessage::Error {
                code,
                message,
                msg_type,
                symbol,
            } => self.on_error(&code, &message, msg_type.as_deref(), symbol.as_deref()),
            InboundMessage::History {
                symbol,
                granularity,
                candles,
                subscription_id,
            } => self.on_history(&symbol, granularity, candles, subscription_id),
            InboundMessage::Ohlc {
                symbol,
                granularity,
                candle,
            } => self.on_ohlc(&symbol, granularity, candle),
            InboundMessage::Contract(update) => self.on_contract(update),
            InboundMessage::Balance { balance, currency } => {
                self.state.set_balance(balance, currency.as_deref())
            }
            InboundMessage::Bought {
                contract_id,
                buy_price,
                symbol,
                contract_type,
            } => {
                if let ContractEvent::Opened(_) =
                    self.state
                        .contracts
                        .on_accepted(contract_id, &symbol, &contract_type, buy_price)
                {
                    self.state.log(
                        LogLevel::Success,
                        format!("Bought {contract_type} {symbol} #{contract_id} for {buy_price:.2}"),
                    );
                }
            }
            InboundMessage::Pong => debug!("keepalive acknowledged"),
            InboundMessage::Other(kind) => debug!(kind = %kind, "unhandled message kind"),
        }
    }

    /// Session established: subscribe account streams and every active symbol.
    fn on_authorized(&self, balance: f64, currency: &str, login_id: &str) {
        self.state.set_account(balance, currency, login_id);
        self.state.set_connection_state(ConnectionState::Live);
        self.state.log(
            LogLevel::Success,
            format!("Authorized as {login_id} ({balance:.2} {currency})"),
        );

        self.outbox.send(OutboundRequest::SubscribeBalance);
        self.outbox.send(OutboundRequest::SubscribeContracts);
        for symbol in self.state.active_symbols() {
            subscribe_symbol(&self.state, &self.outbox, &symbol);
        }
    }

    fn on_error(&self, code: &str, message: &str, msg_type: Option<&str>, symbol: Option<&str>) {
        if code == crate::deriv::messages::MARKET_CLOSED_CODE {
            if let Some(symbol) = symbol {
                self.state.aggregator.write().mark_error(symbol);
                self.state.increment_version();
            }
            debug!(symbol = ?symbol, "market closed");
            return;
        }

        self.state.log(
            LogLevel::Error,
            format!("{} error {code}: {message}", msg_type.unwrap_or("session")),
        );
    }

    fn on_history(
        &self,
        symbol: &str,
        granularity: u32,
        candles: Vec<Candle>,
        subscription_id: Option<String>,
    ) {
        if self.state.aggregator.write().take_pending_forget(symbol) {
            if let Some(subscription_id) = subscription_id {
                debug!(symbol, subscription_id = %subscription_id, "cancelling stream of removed symbol");
                self.outbox.send(OutboundRequest::Forget { subscription_id });
            }
            return;
        }

        let received = candles.len();
        let outcome = {
            let mut aggregator = self.state.aggregator.write();
            let outcome = aggregator.apply_backfill(symbol, granularity, candles);
            if let (Some(_), Some(id)) = (&outcome, subscription_id) {
                aggregator.set_subscription_id(symbol, id);
            }
            outcome
        };
        let Some(outcome) = outcome else {
            return;
        };
        self.state.increment_version();
        info!(
            symbol,
            received,
            len = outcome.len,
            carried_over = outcome.carried_over,
            "backfill merged"
        );
        self.state
            .log(LogLevel::Info, format!("Loaded {} candles for {symbol}", outcome.len));

        let backfill_min = self.state.runtime_config.read().analysis.backfill_min_candles;
        if self.state.trading_enabled() && outcome.len >= backfill_min {
            self.queue.enqueue(symbol, outcome.window, outcome.generation);
        }
    }

    fn on_contract(&self, update: ContractUpdate) {
        match self.state.contracts.apply(update) {
            ContractEvent::Settled(settled) => {
                let level = if settled.profit > 0.0 {
                    LogLevel::Success
                } else {
                    LogLevel::Error
                };
                self.state.log(
                    level,
                    format!(
                        "{} {} settled: {:+.2} {}",
                        settled.contract_type, settled.symbol, settled.profit, settled.currency
                    ),
                );
            }
            ContractEvent::Opened(_) | ContractEvent::Updated(_) => {
                self.state.increment_version();
            }
            ContractEvent::Ignored => {}
        }
    }

    fn on_ohlc(&self, symbol: &str, granularity: u32, candle: Candle) {
        let closed = self.state.aggregator.write().apply_tick(symbol, granularity, candle);
        self.state.increment_version();

        let Some(closed) = closed else {
            return;
        };
        debug!(
            symbol,
            epoch = closed.candle.epoch,
            close = closed.candle.close,
            "candle closed"
        );
        self.state.log(
            LogLevel::Info,
            format!("{symbol} candle closed at {}", closed.candle.close),
        );
        if self.state.trading_enabled() {
            self.queue.enqueue(symbol, closed.window, closed.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DecisionEngine, DecisionRequest, TradeAction, TradeDecision};
    use crate::contract_tracker::ContractStatus;
    use crate::deriv::parse_message;
    use crate::deriv::subscriptions::SubscriptionRegistry;
    use crate::execution::TradeExecutor;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::TradingMode;
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct HoldEngine;

    #[async_trait]
    impl DecisionEngine for HoldEngine {
        async fn decide(&self, request: DecisionRequest) -> Result<TradeDecision> {
            Ok(TradeDecision {
                symbol: request.symbol,
                action: TradeAction::Hold,
                duration: 1,
                stake: 1.0,
                confidence: 50,
                reasoning: "flat".into(),
                technical_analysis: None,
            })
        }
    }

    struct Harness {
        state: Arc<AppState>,
        queue: Arc<AnalysisQueue>,
        router: MessageRouter,
        sent: mpsc::UnboundedReceiver<OutboundRequest>,
    }

    fn harness(mode: TradingMode) -> Harness {
        let mut config = RuntimeConfig::default();
        config.trading_mode = mode;
        config.symbols = vec!["R_100".into()];
        let state = Arc::new(AppState::new(config));
        let outbox = Arc::new(Outbox::new());
        let (tx, sent) = mpsc::unbounded_channel();
        outbox.attach(tx);
        let executor = Arc::new(TradeExecutor::new(Arc::clone(&outbox), 0.35, 100.0));
        let queue = Arc::new(AnalysisQueue::new(Arc::clone(&state), Arc::new(HoldEngine), executor));
        let router = MessageRouter::new(Arc::clone(&state), Arc::clone(&queue), outbox);
        Harness {
            state,
            queue,
            router,
            sent,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundRequest>) -> Vec<OutboundRequest> {
        let mut out = Vec::new();
        while let Ok(r) = rx.try_recv() {
            out.push(r);
        }
        out
    }

    fn candle(epoch: i64, close: f64) -> Candle {
        Candle {
            epoch,
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    fn feed(router: &MessageRouter, frame: &str) {
        router.handle(parse_message(frame).unwrap());
    }

    #[test]
    fn authorize_goes_live_and_subscribes() {
        let mut h = harness(TradingMode::Paused);
        feed(
            &h.router,
            r#"{"msg_type":"authorize","authorize":{"balance":"1000.50","currency":"USD","loginid":"VRTC1"}}"#,
        );

        assert_eq!(h.state.connection_state(), ConnectionState::Live);
        assert_eq!(h.state.balance(), 1000.5);
        let sent = drain(&mut h.sent);
        assert_eq!(sent[0], OutboundRequest::SubscribeBalance);
        assert_eq!(sent[1], OutboundRequest::SubscribeContracts);
        assert_eq!(
            sent[2],
            OutboundRequest::CandleHistory {
                symbol: "R_100".into(),
                count: 50,
                granularity: 60
            }
        );
        assert!(h.state.aggregator.read().stream("R_100").is_some());
    }

    #[test]
    fn end_to_end_backfill_replace_and_close() {
        let h = harness(TradingMode::Paused);
        subscribe_symbol(&h.state, &Outbox::new(), "R_100");

        let history: Vec<Candle> = (0..50).map(|i| candle(i * 60, 100.0 + i as f64)).collect();
        h.router.handle(InboundMessage::History {
            symbol: "R_100".into(),
            granularity: 60,
            candles: history,
            subscription_id: Some("sub-1".into()),
        });
        {
            let agg = h.state.aggregator.read();
            let stream = agg.stream("R_100").unwrap();
            assert_eq!(stream.candles.len(), 50);
            assert_eq!(stream.subscription_id.as_deref(), Some("sub-1"));
        }

        for close in [150.0, 151.0, 152.0] {
            h.router.handle(InboundMessage::Ohlc {
                symbol: "R_100".into(),
                granularity: 60,
                candle: candle(49 * 60, close),
            });
        }
        let closes_before = h
            .state
            .log_feed
            .entries()
            .iter()
            .filter(|e| e.message.contains("candle closed"))
            .count();
        assert_eq!(closes_before, 0);

        h.router.handle(InboundMessage::Ohlc {
            symbol: "R_100".into(),
            granularity: 60,
            candle: candle(50 * 60, 153.0),
        });
        let agg = h.state.aggregator.read();
        let stream = agg.stream("R_100").unwrap();
        assert_eq!(stream.candles.len(), 51);
        assert_eq!(stream.last_price, 153.0);
        drop(agg);

        let closes: Vec<String> = h
            .state
            .log_feed
            .entries()
            .into_iter()
            .filter(|e| e.message.contains("candle closed"))
            .map(|e| e.message)
            .collect();
        assert_eq!(closes, vec!["R_100 candle closed at 152".to_string()]);
        // paused: nothing queued
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[test]
    fn close_enqueues_when_trading() {
        let h = harness(TradingMode::Live);
        subscribe_symbol(&h.state, &Outbox::new(), "R_100");

        // short backfill: below the backfill trigger, no analysis yet
        h.router.handle(InboundMessage::History {
            symbol: "R_100".into(),
            granularity: 60,
            candles: (0..8).map(|i| candle(i * 60, 1.0)).collect(),
            subscription_id: None,
        });
        assert_eq!(h.queue.pending_len(), 0);

        h.router.handle(InboundMessage::Ohlc {
            symbol: "R_100".into(),
            granularity: 60,
            candle: candle(8 * 60, 1.0),
        });
        assert_eq!(h.queue.pending_symbols(), vec!["R_100"]);
    }

    #[test]
    fn long_backfill_triggers_analysis_when_trading() {
        let h = harness(TradingMode::Live);
        subscribe_symbol(&h.state, &Outbox::new(), "R_100");
        h.router.handle(InboundMessage::History {
            symbol: "R_100".into(),
            granularity: 60,
            candles: (0..12).map(|i| candle(i * 60, 1.0)).collect(),
            subscription_id: None,
        });
        assert_eq!(h.queue.pending_len(), 1);
    }

    fn history_frame(symbol: &str, granularity: u32, epochs: &[i64], subscription_id: &str) -> String {
        let candles: Vec<serde_json::Value> = epochs
            .iter()
            .map(|&epoch| serde_json::json!({"epoch": epoch, "open": 1, "high": 1, "low": 1, "close": 1}))
            .collect();
        serde_json::json!({
            "msg_type": "candles",
            "echo_req": {"ticks_history": symbol, "granularity": granularity},
            "candles": candles,
            "subscription": {"id": subscription_id},
        })
        .to_string()
    }

    #[test]
    fn history_for_previous_timeframe_is_dropped() {
        let h = harness(TradingMode::Live);
        h.state.runtime_config.write().timeframe_secs = 180;
        h.state.aggregator.write().reset(180);
        subscribe_symbol(&h.state, &Outbox::new(), "R_100");

        // Reply to the 60s request that was in flight across the switch.
        let stale: Vec<i64> = (0..50).map(|i| 18_000 + i * 60).collect();
        feed(&h.router, &history_frame("R_100", 60, &stale, "old-sub"));
        {
            let agg = h.state.aggregator.read();
            let stream = agg.stream("R_100").unwrap();
            assert!(stream.candles.is_empty());
            assert!(stream.subscription_id.is_none());
        }
        assert_eq!(h.queue.pending_len(), 0);

        let fresh: Vec<i64> = (0..24).map(|i| 20_700 - (23 - i) * 180).collect();
        feed(&h.router, &history_frame("R_100", 180, &fresh, "new-sub"));
        let agg = h.state.aggregator.read();
        let stream = agg.stream("R_100").unwrap();
        let epochs: Vec<i64> = stream.candles.to_vec().iter().map(|c| c.epoch).collect();
        assert_eq!(epochs, fresh);
        assert!(epochs.iter().all(|e| e % 180 == 0));
        assert_eq!(stream.subscription_id.as_deref(), Some("new-sub"));
        drop(agg);
        assert_eq!(h.queue.pending_len(), 1);
    }

    #[test]
    fn late_history_for_removed_symbol_is_forgotten() {
        let mut h = harness(TradingMode::Live);
        h.state.set_connection_state(ConnectionState::Live);
        let registry = SubscriptionRegistry::new(
            Arc::clone(&h.state),
            Arc::new(Outbox::new()),
            Arc::clone(&h.queue),
        );
        registry.subscribe_all();
        assert!(registry.remove("R_100"));

        let epochs: Vec<i64> = (0..12).map(|i| i * 60).collect();
        feed(&h.router, &history_frame("R_100", 60, &epochs, "late-sub"));
        assert_eq!(
            drain(&mut h.sent),
            vec![OutboundRequest::Forget {
                subscription_id: "late-sub".into()
            }]
        );
        assert!(h.state.aggregator.read().stream("R_100").is_none());
        assert_eq!(h.queue.pending_len(), 0);

        // Only the first reply carries the stream to cancel.
        feed(&h.router, &history_frame("R_100", 60, &epochs, "late-sub"));
        assert!(drain(&mut h.sent).is_empty());
    }

    #[test]
    fn market_closed_is_quiet_other_errors_surface() {
        let h = harness(TradingMode::Paused);
        subscribe_symbol(&h.state, &Outbox::new(), "R_100");

        feed(
            &h.router,
            r#"{"msg_type":"ticks_history","echo_req":{"ticks_history":"R_100"},"error":{"code":"MarketIsClosed","message":"closed"}}"#,
        );
        assert!(h.state.log_feed.is_empty());
        assert_eq!(
            h.state.aggregator.read().stream("R_100").unwrap().status,
            crate::market_data::StreamStatus::Error
        );

        feed(
            &h.router,
            r#"{"msg_type":"buy","error":{"code":"InsufficientBalance","message":"no funds"}}"#,
        );
        let logs = h.state.log_feed.entries();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
        assert!(logs[0].message.contains("InsufficientBalance"));
    }

    #[test]
    fn settlement_flow_records_profit_once() {
        let h = harness(TradingMode::Paused);
        let open = ContractUpdate {
            contract_id: 7,
            is_final: false,
            contract_type: "CALL".into(),
            symbol: "R_100".into(),
            buy_price: 10.0,
            entry_price: 100.0,
            profit: 1.0,
            currency: "USD".into(),
            display_name: "Volatility 100 Index".into(),
        };
        let mut settled = open.clone();
        settled.is_final = true;
        settled.profit = -10.0;

        h.router.handle(InboundMessage::Contract(open));
        assert!(h.state.contracts.is_open(7));
        h.router.handle(InboundMessage::Contract(settled.clone()));
        h.router.handle(InboundMessage::Contract(settled));

        assert!(!h.state.contracts.is_open(7));
        let history = h.state.contracts.settled_contracts();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ContractStatus::Lost);
        assert_eq!(h.state.contracts.realized_pnl(), -10.0);
    }

    #[test]
    fn buy_response_opens_contract() {
        let h = harness(TradingMode::Live);
        h.router.handle(InboundMessage::Bought {
            contract_id: 42,
            buy_price: 3.46,
            symbol: "R_50".into(),
            contract_type: "PUT".into(),
        });
        assert!(h.state.contracts.is_open(42));
        assert_eq!(h.state.log_feed.entries()[0].level, LogLevel::Success);
    }
}

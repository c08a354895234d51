// =============================================================================
// Analysis Queue — coalescing, single-flight decision worker
// =============================================================================
//
// Pending work is a FIFO of symbols with at most one entry per symbol. A newer
// window for a symbol that is still waiting overwrites the older one in place.
//
// One worker task drains the queue: pop, decide (bounded by a timeout), apply,
// cool down, repeat. Only one decision call is ever outstanding, so bursts of
// closes across many symbols are serialised and paced.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::{DecisionEngine, DecisionRequest, TradeAction, TradeDecision};
use crate::app_state::AppState;
use crate::execution::{ExecutionResult, TradeExecutor};
use crate::log_feed::LogLevel;
use crate::market_data::Candle;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub symbol: String,
    /// Closed candles, ascending by epoch.
    pub window: Vec<Candle>,
    /// Stream generation the window was taken from.
    pub generation: u64,
}

pub struct AnalysisQueue {
    pending: Mutex<VecDeque<AnalysisRequest>>,
    in_flight: AtomicBool,
    wake: Notify,
    state: Arc<AppState>,
    engine: Arc<dyn DecisionEngine>,
    executor: Arc<TradeExecutor>,
}

impl AnalysisQueue {
    pub fn new(state: Arc<AppState>, engine: Arc<dyn DecisionEngine>, executor: Arc<TradeExecutor>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
            wake: Notify::new(),
            state,
            engine,
            executor,
        }
    }

    /// Queue `window` for analysis. Returns `false` when the window is too
    /// short to analyse.
    pub fn enqueue(&self, symbol: &str, window: Vec<Candle>, generation: u64) -> bool {
        let min_candles = self.state.runtime_config.read().analysis.min_candles;
        if window.len() < min_candles {
            debug!(symbol, len = window.len(), min_candles, "window too short, not queued");
            return false;
        }

        {
            let mut pending = self.pending.lock();
            match pending.iter_mut().find(|r| r.symbol == symbol) {
                Some(existing) => {
                    debug!(symbol, len = window.len(), "coalesced pending analysis");
                    existing.window = window;
                    existing.generation = generation;
                }
                None => pending.push_back(AnalysisRequest {
                    symbol: symbol.to_string(),
                    window,
                    generation,
                }),
            }
        }

        self.wake.notify_one();
        true
    }

    /// Drop all pending work. An in-flight call is left to finish; its result
    /// is discarded by the generation check if its stream was reset.
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "pending analyses cleared");
        }
    }

    /// Drop the pending entry for `symbol`, if any.
    pub fn remove(&self, symbol: &str) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|r| r.symbol != symbol);
        pending.len() != before
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    #[cfg(test)]
    pub fn pending_symbols(&self) -> Vec<String> {
        self.pending.lock().iter().map(|r| r.symbol.clone()).collect()
    }

    /// `true` while a decision call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Start the worker. Abort the returned handle to stop it.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run().await })
    }

    async fn run(&self) {
        info!("analysis worker started");
        loop {
            let next = self.pending.lock().pop_front();
            let Some(request) = next else {
                self.wake.notified().await;
                continue;
            };

            self.process(request).await;

            let cooldown_ms = self.state.runtime_config.read().analysis.cooldown_ms;
            tokio::time::sleep(Duration::from_millis(cooldown_ms)).await;
        }
    }

    async fn process(&self, request: AnalysisRequest) {
        let AnalysisRequest {
            symbol,
            mut window,
            generation,
        } = request;

        if !self.state.aggregator.write().set_analyzing(&symbol, generation, true) {
            debug!(symbol = %symbol, generation, "stream reset before analysis, skipped");
            return;
        }
        self.state.increment_version();

        let (decision_window, timeout_secs) = {
            let config = self.state.runtime_config.read();
            (config.analysis.decision_window, config.analysis.timeout_secs)
        };
        if window.len() > decision_window {
            window.drain(..window.len() - decision_window);
        }

        let timeframe_secs = self.state.timeframe_secs();
        let request = DecisionRequest {
            symbol: symbol.clone(),
            candles: window,
            balance: self.state.balance(),
            timeframe_minutes: f64::from(timeframe_secs) / 60.0,
        };

        self.in_flight.store(true, Ordering::SeqCst);
        let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), self.engine.decide(request)).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match outcome {
            Ok(Ok(decision)) => self.apply(&symbol, generation, decision),
            Ok(Err(e)) => self
                .state
                .log(LogLevel::Error, format!("Analysis failed for {symbol}: {e:#}")),
            Err(_) => self.state.log(
                LogLevel::Error,
                format!("Analysis timed out for {symbol} after {timeout_secs}s"),
            ),
        }

        self.state.aggregator.write().set_analyzing(&symbol, generation, false);
        self.state.increment_version();
    }

    fn apply(&self, symbol: &str, generation: u64, decision: TradeDecision) {
        if !self
            .state
            .aggregator
            .write()
            .record_decision(symbol, generation, decision.clone())
        {
            warn!(symbol, generation, action = %decision.action, "stale decision discarded");
            return;
        }

        self.state.log(
            LogLevel::Decision,
            format!(
                "{symbol}: {} ({}%) {}",
                decision.action, decision.confidence, decision.reasoning
            ),
        );

        if decision.action == TradeAction::Hold {
            return;
        }
        if !self.state.trading_enabled() {
            debug!(symbol, action = %decision.action, "trading paused, decision not executed");
            return;
        }

        let timeframe_secs = self.state.timeframe_secs();
        let currency = self.state.currency();
        match self.executor.execute(&decision, timeframe_secs, &currency) {
            ExecutionResult::Submitted(order) => self.state.log(
                LogLevel::Info,
                format!(
                    "Order sent: {} {} stake {:.2} {} for {}m",
                    order.contract_type, order.symbol, order.amount, order.currency, order.duration_minutes
                ),
            ),
            ExecutionResult::Error(err) => {
                self.state
                    .log(LogLevel::Error, format!("Order for {symbol} not sent: {err}"))
            }
            ExecutionResult::Skipped(_) => {}
        }
    }
}

impl std::fmt::Debug for AnalysisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisQueue")
            .field("pending", &self.pending_len())
            .field("in_flight", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deriv::{OutboundRequest, Outbox};
    use crate::runtime_config::RuntimeConfig;
    use crate::types::TradingMode;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct MockEngine {
        action: TradeAction,
        delay: Duration,
        fail: bool,
        active: AtomicUsize,
        max_active: AtomicUsize,
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl MockEngine {
        fn new(action: TradeAction, delay: Duration) -> Self {
            Self {
                action,
                delay,
                fail: false,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(String, usize)> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl DecisionEngine for MockEngine {
        async fn decide(&self, request: DecisionRequest) -> Result<TradeDecision> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.seen
                .lock()
                .push((request.symbol.clone(), request.candles.len()));
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                bail!("service unavailable");
            }
            Ok(TradeDecision {
                symbol: request.symbol,
                action: self.action,
                duration: 2,
                stake: 1.5,
                confidence: 70,
                reasoning: "test".into(),
                technical_analysis: None,
            })
        }
    }

    fn window(n: usize) -> Vec<Candle> {
        (0..n as i64)
            .map(|i| Candle {
                epoch: 60 * i,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
            })
            .collect()
    }

    struct Harness {
        state: Arc<AppState>,
        engine: Arc<MockEngine>,
        queue: Arc<AnalysisQueue>,
        orders: mpsc::UnboundedReceiver<OutboundRequest>,
    }

    fn harness(engine: MockEngine, mode: TradingMode) -> Harness {
        let mut config = RuntimeConfig::default();
        config.trading_mode = mode;
        let state = Arc::new(AppState::new(config));
        let outbox = Arc::new(Outbox::new());
        let (tx, orders) = mpsc::unbounded_channel();
        outbox.attach(tx);
        let executor = Arc::new(TradeExecutor::new(outbox, 0.35, 100.0));
        let engine = Arc::new(engine);
        let queue = Arc::new(AnalysisQueue::new(
            Arc::clone(&state),
            engine.clone() as Arc<dyn DecisionEngine>,
            executor,
        ));
        Harness {
            state,
            engine,
            queue,
            orders,
        }
    }

    fn subscribe(state: &AppState, symbol: &str) -> u64 {
        state.aggregator.write().subscribe(symbol)
    }

    #[tokio::test(start_paused = true)]
    async fn short_window_is_rejected() {
        let h = harness(MockEngine::new(TradeAction::Hold, Duration::ZERO), TradingMode::Paused);
        assert!(!h.queue.enqueue("R_100", window(4), 1));
        assert_eq!(h.queue.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_entry_is_coalesced() {
        let h = harness(MockEngine::new(TradeAction::Hold, Duration::from_secs(1)), TradingMode::Paused);
        let gen = subscribe(&h.state, "R_100");
        assert!(h.queue.enqueue("R_100", window(5), gen));
        assert!(h.queue.enqueue("R_100", window(7), gen));
        assert_eq!(h.queue.pending_len(), 1);

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;
        worker.abort();

        assert_eq!(h.engine.seen(), vec![("R_100".to_string(), 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_call_in_flight_in_fifo_order() {
        let h = harness(MockEngine::new(TradeAction::Hold, Duration::from_secs(3)), TradingMode::Paused);
        let symbols = ["R_100", "R_50", "R_25", "1HZ100V"];
        for s in symbols {
            let gen = subscribe(&h.state, s);
            h.queue.enqueue(s, window(30), gen);
        }

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.queue.is_busy());
        assert_eq!(h.queue.pending_len(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        worker.abort();

        assert_eq!(h.engine.max_active.load(Ordering::SeqCst), 1);
        let seen = h.engine.seen();
        let order: Vec<&str> = seen.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, symbols);
        // windows are trimmed to the most recent 20
        assert!(seen.iter().all(|(_, len)| *len == 20));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_and_worker_continues() {
        let h = harness(MockEngine::new(TradeAction::Hold, Duration::from_secs(120)), TradingMode::Paused);
        let gen = subscribe(&h.state, "R_100");
        h.queue.enqueue("R_100", window(10), gen);

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(61)).await;

        let logs = h.state.log_feed.entries();
        assert!(logs
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("timed out")));
        assert!(!h.state.aggregator.read().stream("R_100").unwrap().analyzing);
        assert!(!h.queue.is_busy());

        h.queue.enqueue("R_100", window(10), gen);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.engine.seen().len(), 2);
        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_logged_without_retry() {
        let mut engine = MockEngine::new(TradeAction::Call, Duration::from_millis(10));
        engine.fail = true;
        let h = harness(engine, TradingMode::Live);
        let gen = subscribe(&h.state, "R_100");
        h.queue.enqueue("R_100", window(10), gen);

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        worker.abort();

        assert_eq!(h.engine.seen().len(), 1);
        assert!(h
            .state
            .log_feed
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("service unavailable")));
    }

    #[tokio::test(start_paused = true)]
    async fn call_is_executed_when_trading() {
        let mut h = harness(MockEngine::new(TradeAction::Call, Duration::from_millis(10)), TradingMode::Live);
        let gen = subscribe(&h.state, "R_100");
        h.queue.enqueue("R_100", window(10), gen);

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        worker.abort();

        match h.orders.try_recv() {
            Ok(OutboundRequest::Buy(order)) => {
                assert_eq!(order.symbol, "R_100");
                assert_eq!(order.amount, 1.5);
                assert_eq!(order.duration_minutes, 2);
            }
            other => panic!("expected buy, got {other:?}"),
        }
        let stream_decision = h.state.aggregator.read().stream("R_100").unwrap().last_decision.clone();
        assert_eq!(stream_decision.map(|d| d.action), Some(TradeAction::Call));
    }

    #[tokio::test(start_paused = true)]
    async fn hold_and_paused_are_not_executed() {
        let mut hold = harness(MockEngine::new(TradeAction::Hold, Duration::from_millis(10)), TradingMode::Live);
        let gen = subscribe(&hold.state, "R_100");
        hold.queue.enqueue("R_100", window(10), gen);
        let worker = hold.queue.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        worker.abort();
        assert!(hold.orders.try_recv().is_err());
        assert!(hold.state.aggregator.read().stream("R_100").unwrap().last_decision.is_some());

        let mut paused = harness(MockEngine::new(TradeAction::Put, Duration::from_millis(10)), TradingMode::Paused);
        let gen = subscribe(&paused.state, "R_50");
        paused.queue.enqueue("R_50", window(10), gen);
        let worker = paused.queue.spawn();
        tokio::time::sleep(Duration::from_secs(2)).await;
        worker.abort();
        assert!(paused.orders.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_decision_is_discarded() {
        let mut h = harness(MockEngine::new(TradeAction::Call, Duration::from_secs(5)), TradingMode::Live);
        let gen = subscribe(&h.state, "R_100");
        h.queue.enqueue("R_100", window(10), gen);

        let worker = h.queue.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.queue.is_busy());

        // timeframe switch while the call is outstanding
        h.state.aggregator.write().reset(180);
        subscribe(&h.state, "R_100");

        tokio::time::sleep(Duration::from_secs(10)).await;
        worker.abort();

        assert!(h.orders.try_recv().is_err());
        let stream = h.state.aggregator.read().stream("R_100").cloned().unwrap();
        assert!(stream.last_decision.is_none());
        assert!(!stream.analyzing);
        assert!(!h
            .state
            .log_feed
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Decision));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_pending_work() {
        let h = harness(MockEngine::new(TradeAction::Hold, Duration::ZERO), TradingMode::Paused);
        h.queue.enqueue("R_100", window(10), 1);
        h.queue.enqueue("R_50", window(10), 2);
        assert_eq!(h.queue.pending_symbols(), vec!["R_100", "R_50"]);
        assert!(h.queue.remove("R_100"));
        assert!(!h.queue.remove("R_100"));
        assert_eq!(h.queue.pending_symbols(), vec!["R_50"]);
        h.queue.clear();
        assert_eq!(h.queue.pending_len(), 0);
    }
}

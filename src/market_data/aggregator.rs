// =============================================================================
// Candle Aggregator — per-symbol stream state and candle-close detection
// =============================================================================
//
// Reconciles two inbound event kinds per symbol:
//   1. Backfill snapshots (ordered historical batch).
//   2. Incremental live updates for the forming interval.
//
// A live update whose epoch is newer than the forming candle closes that
// candle and yields exactly one `CandleClosed`. The first update after a
// fresh subscribe never closes anything.
//
// Every stream carries a generation number assigned on subscribe. Work that
// was started against an older generation (e.g. an analysis call in flight
// across an unsubscribe or timeframe switch) is rejected on the way back in.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::TradeDecision;
use crate::market_data::candle_buffer::{Candle, CandleBuffer, TickOutcome};
use crate::market_data::symbols::display_name;

// ---------------------------------------------------------------------------
// Stream state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Waiting,
    Active,
    Error,
}

/// Authoritative state for one subscribed symbol.
#[derive(Debug, Clone)]
pub struct SymbolStream {
    pub symbol: String,
    pub display_name: String,
    pub candles: CandleBuffer,
    pub last_price: f64,
    pub analyzing: bool,
    pub status: StreamStatus,
    pub last_decision: Option<TradeDecision>,
    pub generation: u64,
    /// Upstream id of the live candle subscription, once known.
    pub subscription_id: Option<String>,
}

impl SymbolStream {
    fn new(symbol: &str, max_candles: usize, generation: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            display_name: display_name(symbol),
            candles: CandleBuffer::new(max_candles),
            last_price: 0.0,
            analyzing: false,
            status: StreamStatus::Waiting,
            last_decision: None,
            generation,
            subscription_id: None,
        }
    }
}

/// Read-only copy of a stream for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub symbol: String,
    pub display_name: String,
    pub candles: Vec<Candle>,
    pub last_price: f64,
    pub analyzing: bool,
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<TradeDecision>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Emitted once per completed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleClosed {
    pub symbol: String,
    /// The candle that just completed.
    pub candle: Candle,
    /// Buffer contents up to and including `candle` (forming candle excluded).
    pub window: Vec<Candle>,
    pub generation: u64,
}

/// Result of merging a backfill snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillOutcome {
    pub len: usize,
    pub carried_over: usize,
    pub window: Vec<Candle>,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

pub struct CandleAggregator {
    streams: HashMap<String, SymbolStream>,
    granularity: u32,
    max_candles: usize,
    next_generation: u64,
    /// Symbols removed before their history reply brought a subscription id.
    pending_forget: HashSet<String>,
}

impl CandleAggregator {
    pub fn new(granularity: u32, max_candles: usize) -> Self {
        Self {
            streams: HashMap::new(),
            granularity,
            max_candles,
            next_generation: 1,
            pending_forget: HashSet::new(),
        }
    }

    /// Currently selected candle interval in seconds.
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// Start (or restart) a stream for `symbol` in the `Waiting` state.
    /// Returns the new generation.
    pub fn subscribe(&mut self, symbol: &str) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending_forget.remove(symbol);
        self.streams.insert(
            symbol.to_string(),
            SymbolStream::new(symbol, self.max_candles, generation),
        );
        debug!(symbol, generation, "stream initialised");
        generation
    }

    /// Remove the stream for `symbol`, returning its final state.
    pub fn unsubscribe(&mut self, symbol: &str) -> Option<SymbolStream> {
        self.streams.remove(symbol)
    }

    pub fn set_subscription_id(&mut self, symbol: &str, subscription_id: String) {
        if let Some(stream) = self.streams.get_mut(symbol) {
            stream.subscription_id = Some(subscription_id);
        }
    }

    /// Remember that the live subscription for `symbol` must be cancelled
    /// once its id is known.
    pub fn defer_forget(&mut self, symbol: &str) {
        self.pending_forget.insert(symbol.to_string());
    }

    /// `true` once per deferred cancellation, while `symbol` stays unsubscribed.
    pub fn take_pending_forget(&mut self, symbol: &str) -> bool {
        !self.streams.contains_key(symbol) && self.pending_forget.remove(symbol)
    }

    /// Drop every stream and switch to `granularity`.
    pub fn reset(&mut self, granularity: u32) {
        self.streams.clear();
        self.pending_forget.clear();
        self.granularity = granularity;
    }

    /// Merge a historical snapshot. Snapshots for another timeframe or for
    /// symbols that are no longer subscribed are ignored.
    pub fn apply_backfill(
        &mut self,
        symbol: &str,
        granularity: u32,
        candles: Vec<Candle>,
    ) -> Option<BackfillOutcome> {
        if granularity != self.granularity {
            debug!(
                symbol,
                granularity,
                selected = self.granularity,
                "backfill for stale timeframe discarded"
            );
            return None;
        }
        let Some(stream) = self.streams.get_mut(symbol) else {
            debug!(symbol, "backfill for unsubscribed symbol ignored");
            return None;
        };

        let carried_over = stream.candles.merge_backfill(candles);
        stream.last_price = stream.candles.last().map_or(0.0, |c| c.close);
        stream.status = StreamStatus::Active;

        Some(BackfillOutcome {
            len: stream.candles.len(),
            carried_over,
            window: stream.candles.closed_window(),
            generation: stream.generation,
        })
    }

    /// Apply a live update. Returns the close event when the update started a
    /// new interval after an existing one.
    pub fn apply_tick(&mut self, symbol: &str, granularity: u32, candle: Candle) -> Option<CandleClosed> {
        if granularity != self.granularity {
            debug!(
                symbol,
                granularity,
                selected = self.granularity,
                "live update for stale timeframe discarded"
            );
            return None;
        }
        let Some(stream) = self.streams.get_mut(symbol) else {
            debug!(symbol, "live update for unsubscribed symbol ignored");
            return None;
        };

        match stream.candles.apply_tick(candle) {
            TickOutcome::Outdated => {
                debug!(symbol, epoch = candle.epoch, "outdated live update dropped");
                None
            }
            TickOutcome::Replaced => {
                stream.last_price = candle.close;
                stream.status = StreamStatus::Active;
                None
            }
            TickOutcome::Opened { closed } => {
                stream.last_price = candle.close;
                stream.status = StreamStatus::Active;
                closed.map(|closed| CandleClosed {
                    symbol: symbol.to_string(),
                    candle: closed,
                    window: stream.candles.closed_window(),
                    generation: stream.generation,
                })
            }
        }
    }

    pub fn mark_error(&mut self, symbol: &str) {
        if let Some(stream) = self.streams.get_mut(symbol) {
            stream.status = StreamStatus::Error;
        }
    }

    /// Set the analyzing flag if `generation` is still current.
    pub fn set_analyzing(&mut self, symbol: &str, generation: u64, analyzing: bool) -> bool {
        match self.current_mut(symbol, generation) {
            Some(stream) => {
                stream.analyzing = analyzing;
                true
            }
            None => false,
        }
    }

    /// Record a decision if `generation` is still current.
    pub fn record_decision(&mut self, symbol: &str, generation: u64, decision: TradeDecision) -> bool {
        match self.current_mut(symbol, generation) {
            Some(stream) => {
                stream.last_decision = Some(decision);
                true
            }
            None => false,
        }
    }

    pub fn stream(&self, symbol: &str) -> Option<&SymbolStream> {
        self.streams.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Read-only copies of every stream, ordered by symbol.
    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        let mut out: Vec<StreamSnapshot> = self
            .streams
            .values()
            .map(|s| StreamSnapshot {
                symbol: s.symbol.clone(),
                display_name: s.display_name.clone(),
                candles: s.candles.to_vec(),
                last_price: s.last_price,
                analyzing: s.analyzing,
                status: s.status,
                last_decision: s.last_decision.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    fn current_mut(&mut self, symbol: &str, generation: u64) -> Option<&mut SymbolStream> {
        self.streams
            .get_mut(symbol)
            .filter(|s| s.generation == generation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

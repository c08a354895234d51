use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Default number of candles retained per symbol.
pub const MAX_CANDLES: usize = 60;

/// A single OHLC candle keyed by its interval start (UNIX seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// What a live update did to the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Same interval as the forming candle: replaced in place.
    Replaced,
    /// A new interval started. `closed` carries the candle that just
    /// completed, or `None` when the buffer was empty before the update.
    Opened { closed: Option<Candle> },
    /// The update is older than the forming candle and was dropped.
    Outdated,
}

// ---------------------------------------------------------------------------
// CandleBuffer -- ordered, deduplicated, capped candle history
// ---------------------------------------------------------------------------

/// Ordered candle history for a single symbol.
///
/// Invariants: epochs strictly increasing, no duplicates, length never exceeds
/// `max_candles`. The last entry is the forming candle once live updates have
/// started.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles + 1),
            max_candles: max_candles.max(1),
        }
    }

    /// Merge a historical snapshot into the buffer.
    ///
    /// Candles already held with an epoch after the snapshot's last epoch
    /// arrived as live updates while the backfill was in flight; they are
    /// kept after the snapshot. Everything else is replaced by the snapshot.
    ///
    /// Returns the number of live candles carried over.
    pub fn merge_backfill(&mut self, mut history: Vec<Candle>) -> usize {
        history.sort_by_key(|c| c.epoch);
        // Keep the last occurrence of a duplicated epoch.
        history.reverse();
        history.dedup_by_key(|c| c.epoch);
        history.reverse();

        let last_history_epoch = history.last().map_or(0, |c| c.epoch);
        let newer_live: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.epoch > last_history_epoch)
            .copied()
            .collect();
        let carried = newer_live.len();

        self.candles = history.into_iter().chain(newer_live).collect();
        self.trim();
        carried
    }

    /// Apply a live update for the forming interval.
    pub fn apply_tick(&mut self, candle: Candle) -> TickOutcome {
        let outcome = match self.candles.back_mut() {
            Some(last) if last.epoch == candle.epoch => {
                *last = candle;
                TickOutcome::Replaced
            }
            Some(last) if last.epoch > candle.epoch => TickOutcome::Outdated,
            Some(last) => {
                let closed = *last;
                self.candles.push_back(candle);
                TickOutcome::Opened {
                    closed: Some(closed),
                }
            }
            None => {
                self.candles.push_back(candle);
                TickOutcome::Opened { closed: None }
            }
        };
        self.trim();
        outcome
    }

    /// Everything except the forming candle, oldest first.
    pub fn closed_window(&self) -> Vec<Candle> {
        let n = self.candles.len().saturating_sub(1);
        self.candles.iter().take(n).copied().collect()
    }

    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn trim(&mut self) {
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new(MAX_CANDLES)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

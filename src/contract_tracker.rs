// =============================================================================
// Contract Tracker — open-position set driven by settlement pushes
// =============================================================================
//
// Life-cycle:
//   accepted / first non-final push  ->  Open
//   non-final push                   ->  Open (price / profit updated in place)
//   final push                       ->  removed from the open set, recorded as
//                                        Won or Lost by the sign of its profit
//
// A final push is the only path that removes an open contract, and it takes
// effect once per contract id: duplicates and late non-final pushes for a
// settled id are ignored.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Maximum number of settled contracts retained for display.
const MAX_SETTLED: usize = 100;
/// How many settled ids are remembered for duplicate-push suppression.
const MAX_SETTLED_IDS: usize = 1_000;

// ---------------------------------------------------------------------------
// Contract model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Open,
    Won,
    Lost,
}

/// A position that has not settled yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenContract {
    pub contract_id: u64,
    pub symbol: String,
    pub contract_type: String,
    pub buy_price: f64,
    pub entry_price: f64,
    pub status: ContractStatus,
    pub profit: f64,
}

/// Realised outcome of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettledContract {
    pub contract_id: u64,
    pub symbol: String,
    pub contract_type: String,
    pub display_name: String,
    pub buy_price: f64,
    pub profit: f64,
    pub currency: String,
    pub status: ContractStatus,
    pub settled_at: String,
}

/// Settlement push, already normalised (malformed numerics are 0.0).
#[derive(Debug, Clone, PartialEq)]
pub struct ContractUpdate {
    pub contract_id: u64,
    pub is_final: bool,
    pub contract_type: String,
    pub symbol: String,
    pub buy_price: f64,
    pub entry_price: f64,
    pub profit: f64,
    pub currency: String,
    pub display_name: String,
}

/// What applying an update did.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractEvent {
    Opened(OpenContract),
    Updated(OpenContract),
    Settled(SettledContract),
    /// Already settled; nothing changed.
    Ignored,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    open: Vec<OpenContract>,
    settled: VecDeque<SettledContract>,
    settled_ids: HashSet<u64>,
    /// Insertion order of `settled_ids`, oldest first.
    settled_order: VecDeque<u64>,
    realized_pnl: f64,
}

impl Inner {
    fn remember_settled(&mut self, contract_id: u64) {
        if !self.settled_ids.insert(contract_id) {
            return;
        }
        self.settled_order.push_back(contract_id);
        while self.settled_order.len() > MAX_SETTLED_IDS {
            if let Some(evicted) = self.settled_order.pop_front() {
                self.settled_ids.remove(&evicted);
            }
        }
    }
}

#[derive(Default)]
pub struct ContractTracker {
    inner: RwLock<Inner>,
}

impl ContractTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract from an accepted order. No-op if the id is already
    /// known (a settlement push may have raced ahead of the buy response).
    pub fn on_accepted(&self, contract_id: u64, symbol: &str, contract_type: &str, buy_price: f64) -> ContractEvent {
        let mut inner = self.inner.write();
        if inner.settled_ids.contains(&contract_id) {
            return ContractEvent::Ignored;
        }
        if let Some(existing) = inner.open.iter().find(|c| c.contract_id == contract_id) {
            return ContractEvent::Updated(existing.clone());
        }

        let contract = OpenContract {
            contract_id,
            symbol: symbol.to_string(),
            contract_type: contract_type.to_string(),
            buy_price,
            entry_price: 0.0,
            status: ContractStatus::Open,
            profit: 0.0,
        };
        info!(contract_id, symbol, contract_type, buy_price, "contract accepted");
        inner.open.push(contract.clone());
        ContractEvent::Opened(contract)
    }

    /// Apply a settlement push.
    pub fn apply(&self, update: ContractUpdate) -> ContractEvent {
        let mut inner = self.inner.write();
        if inner.settled_ids.contains(&update.contract_id) {
            debug!(contract_id = update.contract_id, "push for settled contract ignored");
            return ContractEvent::Ignored;
        }

        if update.is_final {
            let previous = inner
                .open
                .iter()
                .position(|c| c.contract_id == update.contract_id)
                .map(|idx| inner.open.remove(idx));

            let status = if update.profit > 0.0 {
                ContractStatus::Won
            } else {
                ContractStatus::Lost
            };
            let settled = SettledContract {
                contract_id: update.contract_id,
                symbol: pick(&update.symbol, previous.as_ref().map(|c| c.symbol.as_str())),
                contract_type: pick(&update.contract_type, previous.as_ref().map(|c| c.contract_type.as_str())),
                display_name: update.display_name,
                buy_price: if update.buy_price != 0.0 {
                    update.buy_price
                } else {
                    previous.as_ref().map_or(0.0, |c| c.buy_price)
                },
                profit: update.profit,
                currency: update.currency,
                status,
                settled_at: Utc::now().to_rfc3339(),
            };

            inner.remember_settled(update.contract_id);
            inner.realized_pnl += settled.profit;
            inner.settled.push_front(settled.clone());
            inner.settled.truncate(MAX_SETTLED);

            info!(
                contract_id = settled.contract_id,
                profit = settled.profit,
                realized_pnl = inner.realized_pnl,
                "contract settled"
            );
            return ContractEvent::Settled(settled);
        }

        let contract = OpenContract {
            contract_id: update.contract_id,
            symbol: update.symbol,
            contract_type: update.contract_type,
            buy_price: update.buy_price,
            entry_price: update.entry_price,
            status: ContractStatus::Open,
            profit: update.profit,
        };

        match inner.open.iter_mut().find(|c| c.contract_id == contract.contract_id) {
            Some(existing) => {
                *existing = contract.clone();
                ContractEvent::Updated(contract)
            }
            None => {
                debug!(contract_id = contract.contract_id, "contract opened from push");
                inner.open.push(contract.clone());
                ContractEvent::Opened(contract)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn open_contracts(&self) -> Vec<OpenContract> {
        self.inner.read().open.clone()
    }

    /// Most recent settled contracts, newest first.
    pub fn settled_contracts(&self) -> Vec<SettledContract> {
        self.inner.read().settled.iter().cloned().collect()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.inner.read().realized_pnl
    }

    #[cfg(test)]
    pub fn is_open(&self, contract_id: u64) -> bool {
        self.inner.read().open.iter().any(|c| c.contract_id == contract_id)
    }
}

fn pick(primary: &str, fallback: Option<&str>) -> String {
    if primary.is_empty() {
        fallback.unwrap_or_default().to_string()
    } else {
        primary.to_string()
    }
}

impl std::fmt::Debug for ContractTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ContractTracker")
            .field("open_contracts", &inner.open.len())
            .field("settled_contracts", &inner.settled.len())
            .field("realized_pnl", &inner.realized_pnl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(contract_id: u64, is_final: bool, profit: f64) -> ContractUpdate {
        ContractUpdate {
            contract_id,
            is_final,
            contract_type: "CALL".into(),
            symbol: "R_100".into(),
            buy_price: 10.0,
            entry_price: 1234.5,
            profit,
            currency: "USD".into(),
            display_name: "Volatility 100 Index".into(),
        }
    }

    #[test]
    fn open_then_final_push_settles_once() {
        let tracker = ContractTracker::new();
        assert!(matches!(tracker.apply(push(7, false, 0.5)), ContractEvent::Opened(_)));
        assert!(tracker.is_open(7));

        match tracker.apply(push(7, true, -10.0)) {
            ContractEvent::Settled(s) => {
                assert_eq!(s.status, ContractStatus::Lost);
                assert_eq!(s.profit, -10.0);
            }
            other => panic!("expected settlement, got {other:?}"),
        }
        assert!(!tracker.is_open(7));
        assert_eq!(tracker.realized_pnl(), -10.0);

        // Duplicate final and late non-final pushes change nothing.
        assert_eq!(tracker.apply(push(7, true, -10.0)), ContractEvent::Ignored);
        assert_eq!(tracker.apply(push(7, false, 3.0)), ContractEvent::Ignored);
        assert_eq!(tracker.realized_pnl(), -10.0);
        assert_eq!(tracker.settled_contracts().len(), 1);
        assert!(tracker.open_contracts().is_empty());
    }

    #[test]
    fn non_final_push_updates_in_place() {
        let tracker = ContractTracker::new();
        tracker.apply(push(1, false, 0.1));
        tracker.apply(push(2, false, 0.2));
        assert!(matches!(tracker.apply(push(1, false, 4.2)), ContractEvent::Updated(_)));

        let open = tracker.open_contracts();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].contract_id, 1);
        assert_eq!(open[0].profit, 4.2);
    }

    #[test]
    fn accepted_order_is_tracked_and_settles_as_win() {
        let tracker = ContractTracker::new();
        assert!(matches!(tracker.on_accepted(9, "R_50", "PUT", 5.0), ContractEvent::Opened(_)));
        assert!(matches!(tracker.on_accepted(9, "R_50", "PUT", 5.0), ContractEvent::Updated(_)));

        let mut fin = push(9, true, 4.75);
        fin.symbol.clear();
        fin.contract_type.clear();
        match tracker.apply(fin) {
            ContractEvent::Settled(s) => {
                assert_eq!(s.status, ContractStatus::Won);
                assert_eq!(s.symbol, "R_50");
                assert_eq!(s.contract_type, "PUT");
            }
            other => panic!("expected settlement, got {other:?}"),
        }
    }

    #[test]
    fn settled_id_memory_is_bounded() {
        let tracker = ContractTracker::new();
        let total = (MAX_SETTLED_IDS + 5) as u64;
        for id in 0..total {
            tracker.apply(push(id, true, 1.0));
        }

        let inner = tracker.inner.read();
        assert_eq!(inner.settled_ids.len(), MAX_SETTLED_IDS);
        assert_eq!(inner.settled_order.len(), MAX_SETTLED_IDS);
        assert!(!inner.settled_ids.contains(&0));
        assert!(inner.settled_ids.contains(&(total - 1)));
        assert_eq!(inner.settled.len(), MAX_SETTLED);
        drop(inner);

        // Recent duplicates are still suppressed.
        assert_eq!(tracker.apply(push(total - 1, true, 1.0)), ContractEvent::Ignored);
    }

    #[test]
    fn final_push_for_unseen_contract_is_recorded() {
        let tracker = ContractTracker::new();
        assert!(matches!(tracker.apply(push(3, true, 2.0)), ContractEvent::Settled(_)));
        assert_eq!(tracker.realized_pnl(), 2.0);
    }
}

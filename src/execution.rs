// =============================================================================
// Trade Executor — turns a directional decision into a sized order
// =============================================================================
//
//   stake    = max(min_stake, round(decision.stake, 2))
//   duration = round(decision.duration * timeframe_minutes)   (minutes)
//   ceiling  = stake + price-ceiling buffer
//
// Submission is fire-and-forget: the request is handed to the session outbox
// and the outcome arrives later as a buy response and settlement pushes.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::{TradeAction, TradeDecision};
use crate::deriv::{OutboundRequest, Outbox};

// ---------------------------------------------------------------------------
// Order model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// A buy request ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub contract_type: ContractType,
    pub symbol: String,
    pub duration_minutes: u32,
    pub amount: f64,
    pub currency: String,
    /// Maximum acceptable purchase price.
    pub price_ceiling: f64,
}

/// Outcome of an execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Order handed to the open session.
    Submitted(OrderRequest),
    /// Nothing to do (HOLD decision).
    Skipped(String),
    /// No session to submit through.
    Error(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted(o) => write!(
                f,
                "Submitted({} {} stake={} duration={}m)",
                o.contract_type, o.symbol, o.amount, o.duration_minutes
            ),
            Self::Skipped(reason) => write!(f, "Skipped({reason})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Stake rounded to cents, floored at `min_stake`.
pub fn stake_for(requested: f64, min_stake: f64) -> f64 {
    if !requested.is_finite() {
        return min_stake;
    }
    let rounded = (requested * 100.0).round() / 100.0;
    rounded.max(min_stake)
}

/// Order duration in whole minutes for `candles` intervals of
/// `timeframe_secs` each. Never below one minute.
pub fn duration_minutes(candles: u32, timeframe_secs: u32) -> u32 {
    let minutes = f64::from(candles) * f64::from(timeframe_secs) / 60.0;
    (minutes.round() as u32).max(1)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    outbox: Arc<Outbox>,
    min_stake: f64,
    price_ceiling_buffer: f64,
}

impl TradeExecutor {
    pub fn new(outbox: Arc<Outbox>, min_stake: f64, price_ceiling_buffer: f64) -> Self {
        Self {
            outbox,
            min_stake,
            price_ceiling_buffer,
        }
    }

    /// Build the order for `decision` without sending it.
    pub fn build_order(&self, decision: &TradeDecision, timeframe_secs: u32, currency: &str) -> Option<OrderRequest> {
        let contract_type = match decision.action {
            TradeAction::Call => ContractType::Call,
            TradeAction::Put => ContractType::Put,
            TradeAction::Hold => return None,
        };
        let amount = stake_for(decision.stake, self.min_stake);
        Some(OrderRequest {
            contract_type,
            symbol: decision.symbol.clone(),
            duration_minutes: duration_minutes(decision.duration, timeframe_secs),
            amount,
            currency: currency.to_string(),
            price_ceiling: amount + self.price_ceiling_buffer,
        })
    }

    /// Submit `decision` through the session. Does not wait for the outcome.
    pub fn execute(&self, decision: &TradeDecision, timeframe_secs: u32, currency: &str) -> ExecutionResult {
        let Some(order) = self.build_order(decision, timeframe_secs, currency) else {
            return ExecutionResult::Skipped("HOLD".to_string());
        };

        info!(
            symbol = %order.symbol,
            contract_type = %order.contract_type,
            stake = order.amount,
            duration_minutes = order.duration_minutes,
            candles = decision.duration,
            price_ceiling = order.price_ceiling,
            "submitting order"
        );

        if self.outbox.send(OutboundRequest::Buy(order.clone())) {
            ExecutionResult::Submitted(order)
        } else {
            warn!(symbol = %order.symbol, "order not submitted: no open session");
            ExecutionResult::Error("no open session".to_string())
        }
    }
}

impl std::fmt::Debug for TradeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeExecutor")
            .field("min_stake", &self.min_stake)
            .field("price_ceiling_buffer", &self.price_ceiling_buffer)
            .finish()
    }
}

// =============================================================================
// Outbound requests — everything the engine sends over the session
// =============================================================================

use serde_json::{json, Value};

use crate::execution::OrderRequest;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRequest {
    Authorize { token: String },
    SubscribeBalance,
    SubscribeContracts,
    /// Backfill the latest `count` candles and subscribe to live updates.
    CandleHistory { symbol: String, count: u32, granularity: u32 },
    /// Cancel one subscription by id.
    Forget { subscription_id: String },
    /// Cancel every live candle subscription.
    ForgetAllCandles,
    Buy(OrderRequest),
    Ping,
}

impl OutboundRequest {
    /// Wire representation.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Authorize { token } => json!({ "authorize": token }),
            Self::SubscribeBalance => json!({ "balance": 1, "subscribe": 1 }),
            Self::SubscribeContracts => json!({ "proposal_open_contract": 1, "subscribe": 1 }),
            Self::CandleHistory { symbol, count, granularity } => json!({
                "ticks_history": symbol,
                "adjust_start_time": 1,
                "count": count,
                "end": "latest",
                "style": "candles",
                "granularity": granularity,
                "subscribe": 1,
            }),
            Self::Forget { subscription_id } => json!({ "forget": subscription_id }),
            Self::ForgetAllCandles => json!({ "forget_all": "candles" }),
            Self::Buy(order) => json!({
                "buy": 1,
                "price": order.price_ceiling,
                "parameters": {
                    "contract_type": order.contract_type.to_string(),
                    "symbol": order.symbol,
                    "duration": order.duration_minutes,
                    "duration_unit": "m",
                    "basis": "stake",
                    "amount": order.amount,
                    "currency": order.currency,
                },
            }),
            Self::Ping => json!({ "ping": 1 }),
        }
    }

    /// Short label for logs. Never includes credentials.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::SubscribeBalance => "balance",
            Self::SubscribeContracts => "proposal_open_contract",
            Self::CandleHistory { .. } => "ticks_history",
            Self::Forget { .. } => "forget",
            Self::ForgetAllCandles => "forget_all",
            Self::Buy(_) => "buy",
            Self::Ping => "ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ContractType;

    #[test]
    fn history_request_shape() {
        let req = OutboundRequest::CandleHistory {
            symbol: "R_100".into(),
            count: 50,
            granularity: 180,
        };
        let v = req.to_json();
        assert_eq!(v["ticks_history"], "R_100");
        assert_eq!(v["count"], 50);
        assert_eq!(v["granularity"], 180);
        assert_eq!(v["style"], "candles");
        assert_eq!(v["end"], "latest");
        assert_eq!(v["subscribe"], 1);
    }

    #[test]
    fn buy_request_shape() {
        let req = OutboundRequest::Buy(OrderRequest {
            contract_type: ContractType::Put,
            symbol: "R_50".into(),
            duration_minutes: 6,
            amount: 3.46,
            currency: "EUR".into(),
            price_ceiling: 103.46,
        });
        let v = req.to_json();
        assert_eq!(v["buy"], 1);
        assert_eq!(v["price"], 103.46);
        assert_eq!(v["parameters"]["contract_type"], "PUT");
        assert_eq!(v["parameters"]["duration"], 6);
        assert_eq!(v["parameters"]["duration_unit"], "m");
        assert_eq!(v["parameters"]["basis"], "stake");
        assert_eq!(v["parameters"]["currency"], "EUR");
    }

    #[test]
    fn forget_requests() {
        assert_eq!(OutboundRequest::ForgetAllCandles.to_json(), json!({ "forget_all": "candles" }));
        let one = OutboundRequest::Forget {
            subscription_id: "c1d2e3".into(),
        };
        assert_eq!(one.to_json(), json!({ "forget": "c1d2e3" }));
    }

    #[test]
    fn kind_hides_token() {
        let req = OutboundRequest::Authorize { token: "secret".into() };
        assert_eq!(req.kind(), "authorize");
    }
}

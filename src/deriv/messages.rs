// =============================================================================
// Inbound messages — one wire format, many kinds
// =============================================================================
//
// Every frame is a JSON object. A top-level `error` object wins over
// `msg_type`; otherwise `msg_type` selects the variant. Numeric fields may be
// JSON numbers or numeric strings.
// =============================================================================

use anyhow::{Context, Result};
use serde_json::Value;

use crate::contract_tracker::ContractUpdate;
use crate::market_data::Candle;

/// Error code for a market that is temporarily closed. Expected, not surfaced.
pub const MARKET_CLOSED_CODE: &str = "MarketIsClosed";

/// Granularity the upstream assumes when a history request omits it.
const DEFAULT_HISTORY_GRANULARITY: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Authorized {
        balance: f64,
        currency: String,
        login_id: String,
    },
    Error {
        code: String,
        message: String,
        msg_type: Option<String>,
        /// Symbol of the originating history request, if any.
        symbol: Option<String>,
    },
    History {
        symbol: String,
        /// Candle interval echoed back from the originating request.
        granularity: u32,
        candles: Vec<Candle>,
        /// Id of the live candle subscription opened alongside the snapshot.
        subscription_id: Option<String>,
    },
    Ohlc {
        symbol: String,
        granularity: u32,
        candle: Candle,
    },
    Contract(ContractUpdate),
    Balance {
        balance: f64,
        currency: Option<String>,
    },
    Bought {
        contract_id: u64,
        buy_price: f64,
        symbol: String,
        contract_type: String,
    },
    Pong,
    /// Recognised but irrelevant, or a kind the engine does not consume.
    Other(String),
}

/// Parse a single text frame.
pub fn parse_message(text: &str) -> Result<InboundMessage> {
    let root: Value = serde_json::from_str(text).context("failed to parse frame JSON")?;

    if let Some(err) = root.get("error") {
        return Ok(InboundMessage::Error {
            code: err["code"].as_str().unwrap_or("Unknown").to_string(),
            message: err["message"].as_str().unwrap_or_default().to_string(),
            msg_type: root["msg_type"].as_str().map(str::to_string),
            symbol: root["echo_req"]["ticks_history"].as_str().map(str::to_string),
        });
    }

    let msg_type = root["msg_type"].as_str().context("missing field msg_type")?;
    match msg_type {
        "authorize" => parse_authorize(&root["authorize"]),
        "history" | "candles" => parse_history(&root),
        "ohlc" => parse_ohlc(&root["ohlc"]),
        "proposal_open_contract" => Ok(parse_contract(&root["proposal_open_contract"])
            .map_or_else(|| InboundMessage::Other(msg_type.to_string()), InboundMessage::Contract)),
        "balance" => Ok(InboundMessage::Balance {
            balance: parse_f64_or_zero(&root["balance"]["balance"]),
            currency: root["balance"]["currency"].as_str().map(str::to_string),
        }),
        "buy" => parse_buy(&root),
        "ping" => Ok(InboundMessage::Pong),
        other => Ok(InboundMessage::Other(other.to_string())),
    }
}

fn parse_authorize(auth: &Value) -> Result<InboundMessage> {
    Ok(InboundMessage::Authorized {
        balance: parse_f64(&auth["balance"], "authorize.balance")?,
        currency: auth["currency"].as_str().unwrap_or("USD").to_string(),
        login_id: auth["loginid"].as_str().unwrap_or_default().to_string(),
    })
}

fn parse_history(root: &Value) -> Result<InboundMessage> {
    let symbol = root["echo_req"]["ticks_history"]
        .as_str()
        .context("missing field echo_req.ticks_history")?
        .to_string();
    let granularity = match &root["echo_req"]["granularity"] {
        Value::Null => DEFAULT_HISTORY_GRANULARITY,
        raw => u32::try_from(parse_i64(raw, "echo_req.granularity")?)
            .context("echo_req.granularity out of range")?,
    };

    let candles = match root["candles"].as_array() {
        Some(raw) => raw
            .iter()
            .map(|c| {
                Ok(Candle {
                    epoch: parse_i64(&c["epoch"], "candles.epoch")?,
                    open: parse_f64(&c["open"], "candles.open")?,
                    high: parse_f64(&c["high"], "candles.high")?,
                    low: parse_f64(&c["low"], "candles.low")?,
                    close: parse_f64(&c["close"], "candles.close")?,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(InboundMessage::History {
        symbol,
        granularity,
        candles,
        subscription_id: root["subscription"]["id"].as_str().map(str::to_string),
    })
}

fn parse_ohlc(ohlc: &Value) -> Result<InboundMessage> {
    let symbol = ohlc["symbol"].as_str().context("missing field ohlc.symbol")?.to_string();
    let granularity = parse_i64(&ohlc["granularity"], "ohlc.granularity")?;
    let granularity = u32::try_from(granularity).context("ohlc.granularity out of range")?;

    let candle = Candle {
        epoch: parse_i64(&ohlc["open_time"], "ohlc.open_time")?,
        open: parse_f64(&ohlc["open"], "ohlc.open")?,
        high: parse_f64(&ohlc["high"], "ohlc.high")?,
        low: parse_f64(&ohlc["low"], "ohlc.low")?,
        close: parse_f64(&ohlc["close"], "ohlc.close")?,
    };

    Ok(InboundMessage::Ohlc {
        symbol,
        granularity,
        candle,
    })
}

/// `None` for the empty object sent when no contract is open.
fn parse_contract(poc: &Value) -> Option<ContractUpdate> {
    let contract_id = parse_u64(&poc["contract_id"])?;
    Some(ContractUpdate {
        contract_id,
        is_final: parse_flag(&poc["is_sold"]),
        contract_type: poc["contract_type"].as_str().unwrap_or_default().to_string(),
        symbol: poc["underlying"]
            .as_str()
            .or_else(|| poc["underlying_symbol"].as_str())
            .unwrap_or_default()
            .to_string(),
        buy_price: parse_f64_or_zero(&poc["buy_price"]),
        entry_price: parse_f64_or_zero(&poc["entry_spot"]),
        profit: parse_f64_or_zero(&poc["profit"]),
        currency: poc["currency"].as_str().unwrap_or_default().to_string(),
        display_name: poc["display_name"].as_str().unwrap_or_default().to_string(),
    })
}

fn parse_buy(root: &Value) -> Result<InboundMessage> {
    let buy = &root["buy"];
    let params = &root["echo_req"]["parameters"];
    Ok(InboundMessage::Bought {
        contract_id: parse_u64(&buy["contract_id"]).context("missing field buy.contract_id")?,
        buy_price: parse_f64_or_zero(&buy["buy_price"]),
        symbol: params["symbol"].as_str().unwrap_or_default().to_string(),
        contract_type: params["contract_type"].as_str().unwrap_or_default().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Numbers may arrive as JSON numbers or numeric strings.
fn parse_f64(val: &Value, name: &str) -> Result<f64> {
    let parsed = match val {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}"))?,
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64"))?,
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    };
    if !parsed.is_finite() {
        anyhow::bail!("field {name} is not finite");
    }
    Ok(parsed)
}

fn parse_i64(val: &Value, name: &str) -> Result<i64> {
    match val {
        Value::Number(n) => n.as_i64().with_context(|| format!("field {name} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("failed to parse {name} as integer: {s}")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Settlement numerics: anything malformed becomes 0.0.
fn parse_f64_or_zero(val: &Value) -> f64 {
    parse_f64(val, "").unwrap_or(0.0)
}

fn parse_u64(val: &Value) -> Option<u64> {
    match val {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_flag(val: &Value) -> bool {
    match val {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_wins() {
        let json = r#"{
            "echo_req": { "ticks_history": "frxEURUSD" },
            "error": { "code": "MarketIsClosed", "message": "This market is presently closed." },
            "msg_type": "history"
        }"#;
        let msg = parse_message(json).expect("parse");
        let InboundMessage::Error { code, symbol, msg_type, .. } = msg else {
            panic!("expected error");
        };
        assert_eq!(code, MARKET_CLOSED_CODE);
        assert_eq!(symbol.as_deref(), Some("frxEURUSD"));
        assert_eq!(msg_type.as_deref(), Some("history"));
    }

    #[test]
    fn authorize() {
        let json = r#"{"authorize":{"balance":10000.5,"currency":"EUR","loginid":"VRTC123"},"msg_type":"authorize"}"#;
        assert_eq!(
            parse_message(json).unwrap(),
            InboundMessage::Authorized {
                balance: 10000.5,
                currency: "EUR".into(),
                login_id: "VRTC123".into(),
            }
        );
    }

    #[test]
    fn candle_history() {
        let json = r#"{
            "candles": [
                {"epoch": 1700000000, "open": 100.1, "high": 101, "low": 99.5, "close": 100.7},
                {"epoch": 1700000060, "open": "100.7", "high": "102", "low": "100", "close": "101.9"}
            ],
            "echo_req": {"ticks_history": "R_100", "granularity": 60},
            "msg_type": "candles",
            "subscription": {"id": "c1d2e3"}
        }"#;
        let InboundMessage::History {
            symbol,
            granularity,
            candles,
            subscription_id,
        } = parse_message(json).unwrap()
        else {
            panic!("expected history");
        };
        assert_eq!(symbol, "R_100");
        assert_eq!(granularity, 60);
        assert_eq!(subscription_id.as_deref(), Some("c1d2e3"));
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 101.9);
    }

    #[test]
    fn history_granularity_is_echoed() {
        let tagged = r#"{"candles":[],"echo_req":{"ticks_history":"R_50","granularity":"180"},"msg_type":"candles"}"#;
        let bare = r#"{"candles":[],"echo_req":{"ticks_history":"R_50"},"msg_type":"candles"}"#;
        for (json, expected) in [(tagged, 180), (bare, 60)] {
            let InboundMessage::History { granularity, .. } = parse_message(json).unwrap() else {
                panic!("expected history");
            };
            assert_eq!(granularity, expected);
        }
    }

    #[test]
    fn live_ohlc_with_string_prices() {
        let json = r#"{
            "ohlc": {
                "symbol": "R_50", "granularity": 180, "open_time": 1700000100, "epoch": 1700000123,
                "open": "250.10", "high": "251.00", "low": "249.80", "close": "250.55"
            },
            "msg_type": "ohlc"
        }"#;
        let InboundMessage::Ohlc { symbol, granularity, candle } = parse_message(json).unwrap() else {
            panic!("expected ohlc");
        };
        assert_eq!(symbol, "R_50");
        assert_eq!(granularity, 180);
        assert_eq!(candle.epoch, 1_700_000_100);
        assert_eq!(candle.close, 250.55);
    }

    #[test]
    fn malformed_candle_rejects_frame() {
        let json = r#"{"ohlc":{"symbol":"R_50","granularity":60,"open_time":1,"open":"abc","high":1,"low":1,"close":1},"msg_type":"ohlc"}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn settlement_push_normalises_bad_numbers() {
        let json = r#"{
            "proposal_open_contract": {
                "contract_id": 4242, "is_sold": 1, "contract_type": "CALL", "underlying": "R_100",
                "buy_price": "10.00", "entry_spot": "n/a", "profit": "-10.00", "currency": "USD",
                "display_name": "Volatility 100 Index"
            },
            "msg_type": "proposal_open_contract"
        }"#;
        let InboundMessage::Contract(update) = parse_message(json).unwrap() else {
            panic!("expected contract");
        };
        assert_eq!(update.contract_id, 4242);
        assert!(update.is_final);
        assert_eq!(update.entry_price, 0.0);
        assert_eq!(update.profit, -10.0);
        assert_eq!(update.symbol, "R_100");
    }

    #[test]
    fn empty_contract_push_is_other() {
        let json = r#"{"proposal_open_contract":{},"msg_type":"proposal_open_contract"}"#;
        assert!(matches!(parse_message(json).unwrap(), InboundMessage::Other(_)));
    }

    #[test]
    fn buy_response() {
        let json = r#"{
            "buy": {"contract_id": 99, "buy_price": 3.46, "longcode": "Win payout if ..."},
            "echo_req": {"buy": 1, "price": 103.46, "parameters": {"contract_type": "CALL", "symbol": "R_100"}},
            "msg_type": "buy"
        }"#;
        assert_eq!(
            parse_message(json).unwrap(),
            InboundMessage::Bought {
                contract_id: 99,
                buy_price: 3.46,
                symbol: "R_100".into(),
                contract_type: "CALL".into(),
            }
        );
    }

    #[test]
    fn balance_and_ping() {
        let bal = r#"{"balance":{"balance":"512.25","currency":"USD"},"msg_type":"balance"}"#;
        assert_eq!(
            parse_message(bal).unwrap(),
            InboundMessage::Balance {
                balance: 512.25,
                currency: Some("USD".into())
            }
        );
        assert_eq!(parse_message(r#"{"ping":"pong","msg_type":"ping"}"#).unwrap(), InboundMessage::Pong);
    }

    #[test]
    fn unknown_kind_is_other() {
        assert_eq!(
            parse_message(r#"{"msg_type":"forget_all","forget_all":[]}"#).unwrap(),
            InboundMessage::Other("forget_all".into())
        );
        assert!(parse_message("{}").is_err());
    }
}

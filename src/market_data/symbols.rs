/// Instruments offered for trading, with their display names.
pub const AVAILABLE_SYMBOLS: &[(&str, &str)] = &[
    ("R_100", "Volatility 100"),
    ("R_75", "Volatility 75"),
    ("R_50", "Volatility 50"),
    ("R_25", "Volatility 25"),
    ("R_10", "Volatility 10"),
    ("1HZ100V", "Vol. 100 (1s)"),
    ("1HZ75V", "Vol. 75 (1s)"),
    ("1HZ50V", "Vol. 50 (1s)"),
    ("1HZ25V", "Vol. 25 (1s)"),
    ("1HZ10V", "Vol. 10 (1s)"),
    ("frxEURUSD", "EUR/USD"),
    ("frxGBPUSD", "GBP/USD"),
    ("frxUSDJPY", "USD/JPY"),
    ("frxXAUUSD", "Gold/USD"),
    ("cryBTCUSD", "BTC/USD"),
];

/// Candle intervals (seconds) the engine supports.
pub const SUPPORTED_TIMEFRAMES: &[u32] = &[60, 180, 300];

/// Display name for `symbol`, falling back to the id itself.
pub fn display_name(symbol: &str) -> String {
    AVAILABLE_SYMBOLS
        .iter()
        .find(|(id, _)| *id == symbol)
        .map_or_else(|| symbol.to_string(), |(_, name)| (*name).to_string())
}

/// `true` if `symbol` is in the instrument catalogue.
pub fn is_available(symbol: &str) -> bool {
    AVAILABLE_SYMBOLS.iter().any(|(id, _)| *id == symbol)
}

pub fn is_supported_timeframe(seconds: u32) -> bool {
    SUPPORTED_TIMEFRAMES.contains(&seconds)
}

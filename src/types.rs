// =============================================================================
// Shared types used across the Pulse trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether automated trading is enabled (orders submitted) or paused
/// (analysis results are displayed only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// Lifecycle of the single market-data session.
///
/// `Disconnected -> Connecting -> Authenticating -> Live -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Live,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Account details reported by the authorize and balance messages.
///
/// The currency is authoritative from the latest message that carried one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub balance: f64,
    pub currency: String,
    #[serde(default)]
    pub login_id: Option<String>,
}

impl Default for AccountInfo {
    fn default() -> Self {
        Self {
            balance: 0.0,
            currency: "USD".to_string(),
            login_id: None,
        }
    }
}

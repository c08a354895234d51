// =============================================================================
// Log Feed — capped, categorised event log for the presentation layer
// =============================================================================
//
// Newest entries first. Every append is mirrored to `tracing` so the operator
// console and the dashboard feed tell the same story.
// =============================================================================

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Maximum number of entries retained.
pub const MAX_LOG_ENTRIES: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Decision,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: String,
    /// ISO 8601 timestamp.
    pub at: String,
    pub level: LogLevel,
    pub message: String,
}

pub struct LogFeed {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Error => error!(feed = "error", "{message}"),
            LogLevel::Warning => warn!(feed = "warning", "{message}"),
            LogLevel::Info => info!(feed = "info", "{message}"),
            LogLevel::Success => info!(feed = "success", "{message}"),
            LogLevel::Decision => info!(feed = "decision", "{message}"),
        }

        let entry = LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now().to_rfc3339(),
            level,
            message,
        };

        let mut entries = self.entries.write();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(MAX_LOG_ENTRIES)
    }
}

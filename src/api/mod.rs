pub mod auth;
pub mod rest;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::deriv::ConnectionManager;

/// Shared handles for every API handler.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<AppState>,
    pub connection: Arc<ConnectionManager>,
    /// Where control changes are persisted.
    pub config_path: PathBuf,
}

impl ApiContext {
    pub fn new(state: Arc<AppState>, connection: Arc<ConnectionManager>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            state,
            connection,
            config_path: config_path.into(),
        }
    }

    /// Best-effort save of the current runtime config.
    pub fn persist_config(&self) {
        let config = self.state.runtime_config.read().clone();
        if let Err(e) = config.save(&self.config_path) {
            tracing::warn!(error = %e, "failed to persist runtime config");
        }
    }
}

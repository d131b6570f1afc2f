//! Shared state for the HTTP facade

use crate::config::GatewayConfig;
use std::sync::Arc;

/// Handed to every axum handler. Holds only what the facade needs: the
/// storage/downloads directories and the config they were derived from.
pub struct SharedState {
    pub config: Arc<GatewayConfig>,
}

impl SharedState {
    pub fn new(config: Arc<GatewayConfig>) -> Arc<Self> {
        Arc::new(Self { config })
    }

    pub fn storage_dir(&self) -> std::path::PathBuf {
        self.config.listener.storage_dir.clone()
    }

    pub fn downloads_dir(&self) -> std::path::PathBuf {
        self.config.http.downloads_dir.clone()
    }
}

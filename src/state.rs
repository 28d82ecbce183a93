//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::receive::UploadRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploads: UploadRegistry,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let uploads = UploadRegistry::new(config.storage.max_concurrent_uploads);
        Self {
            inner: Arc::new(AppStateInner { config, uploads }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the registry of uploads in progress
    pub fn uploads(&self) -> &UploadRegistry {
        &self.inner.uploads
    }
}

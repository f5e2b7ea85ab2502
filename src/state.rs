//! Application state for the inference server
//!
//! Holds the configuration and the model registry shared by all handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::detector::ModelLoader;
use crate::registry::ModelRegistry;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Loaded models
    pub registry: ModelRegistry,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    /// Create state with an empty registry; models are loaded separately
    pub fn new(config: ServerConfig, loader: Arc<dyn ModelLoader>) -> Self {
        let registry = ModelRegistry::new(config.models_root.clone(), config.weights_file.clone(), loader);
        Self {
            config,
            registry,
            started_at: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;

//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::game::{MapCatalog, RunHandle};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<MapCatalog>,
    /// The only way handlers reach the run
    pub run: RunHandle,
    /// Flips to `true` once the server is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: MapCatalog,
        run: RunHandle,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            run,
            shutdown,
        }
    }
}

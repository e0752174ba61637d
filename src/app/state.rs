//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::control::ControllerHandle;
use crate::ws::BridgeRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub controller: ControllerHandle,
    pub bridges: Arc<BridgeRegistry>,
}

impl AppState {
    pub fn new(config: Config, controller: ControllerHandle) -> Self {
        Self {
            config: Arc::new(config),
            controller,
            bridges: Arc::new(BridgeRegistry::new()),
        }
    }
}

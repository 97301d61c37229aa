//! Application state management
//! This module defines the state shared by every bridge command.

use std::sync::Arc;

use log::info;

use crate::config::bridge_config::BridgeSettings;
use crate::core::SessionManager;
use crate::core::bluetooth::BluetoothAdapter;

/// State owned by the host and passed to every command
#[derive(Clone)]
pub struct AppState {
    /// The session manager instance
    pub session_manager: Arc<SessionManager>,
}

impl AppState {
    /// Creates a new AppState instance
    pub fn new(adapter: Option<Arc<dyn BluetoothAdapter>>, settings: BridgeSettings) -> Self {
        info!("Initializing SessionManager...");
        Self {
            session_manager: Arc::new(SessionManager::new(adapter, settings)),
        }
    }

    /// Gets a reference to the session manager
    pub fn get_session_manager_arc(&self) -> Arc<SessionManager> {
        self.session_manager.clone()
    }
}

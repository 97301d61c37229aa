//! Core functionality for the bridge
//! This module contains the session state machines behind the command surface

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BridgeError, BridgeEvent, ConnectionStatus, Device, SessionManager};

pub mod bridge_config;
pub mod session_config;

pub use bridge_config::BridgeSettings;
pub use session_config::SessionConfig;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DISCONNECT_TIMEOUT_MS, DEFAULT_EVENT_CHANNEL_CAPACITY,
};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "bridge_config.json";

/// Process-level tunables for the bridge, independent of any session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Time allowed for a connect attempt before it fails with `ConnectFailed`.
    pub connect_timeout_ms: u64,

    /// Time a disconnect waits for an in-flight connect or close to settle.
    pub disconnect_timeout_ms: u64,

    /// Extra delay after stopping discovery before `stopScan` resolves.
    /// Some stacks still deliver a few results right after the stop request.
    pub stop_scan_settle_ms: u64,

    /// Queue depth for each event subscriber.
    pub event_channel_capacity: usize,

    /// Allow discovery while a connection is being made or is open, and vice versa.
    pub allow_scan_while_connected: bool,

    /// Log level for the bridge logger ("error" through "trace").
    pub log_level: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            disconnect_timeout_ms: DEFAULT_DISCONNECT_TIMEOUT_MS,
            stop_scan_settle_ms: 0,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            allow_scan_while_connected: false,
            log_level: "info".to_string(),
        }
    }
}

impl BridgeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn stop_scan_settle(&self) -> Duration {
        Duration::from_millis(self.stop_scan_settle_ms)
    }

    pub fn log_level(&self) -> log::Level {
        self.log_level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info", self.log_level);
            log::Level::Info
        })
    }

    /// Loads the settings from `config_dir`, falling back to defaults when no file exists.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current settings into `config_dir`.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bridge config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Bridge config saved to {:?}.", file_path);
        Ok(())
    }
}

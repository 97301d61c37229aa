use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use easy_bluetooth_bridge_lib::config::BridgeSettings;
use easy_bluetooth_bridge_lib::core::bluetooth::LoopbackAdapter;
use easy_bluetooth_bridge_lib::logging::BridgeLogger;
use easy_bluetooth_bridge_lib::state::AppState;
use log::info;
use tokio::io::BufReader;
use tokio::sync::mpsc;

/// Stdio bridge: one JSON request per line on stdin, responses, events and
/// log records as JSON lines on stdout. Optional argument: config directory.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = std::env::args().nth(1).map(PathBuf::from);
    let settings = match &config_dir {
        Some(dir) => BridgeSettings::load_config(dir)
            .await
            .with_context(|| format!("Failed to load bridge config from {:?}", dir))?,
        None => BridgeSettings::default(),
    };

    let level = settings.log_level();
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    let logs = match BridgeLogger::init(level, Some(log_tx)) {
        Ok(()) => Some(log_rx),
        Err(_) => {
            // Only fall back to env_logger when the bridge logger could not be installed
            let _ = env_logger::builder()
                .filter_level(level.to_level_filter())
                .try_init();
            None
        }
    };

    info!("Starting bridge with {:?}", settings);
    let app_state = AppState::new(Some(Arc::new(LoopbackAdapter::new())), settings);

    easy_bluetooth_bridge_lib::run(
        app_state,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        logs,
    )
    .await
}

//! Session manager for the bridge
//! This module provides the main interface for bluetooth operations

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::bridge_config::BridgeSettings;
use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::adapter::BluetoothAdapter;
use crate::core::bluetooth::commands::WriteCommand;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::error::{BridgeError, Result};
use crate::core::bluetooth::events::{EventBus, EventSubscriber};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::{ConnectionStatus, Device};
use crate::utils::lock;

/// Everything built by `configure`; dropped by `stop_session`.
#[derive(Clone)]
struct Session {
    config: Arc<SessionConfig>,
    connection: ConnectionManager,
    scanner: BluetoothScanner,
    /// Held across a policy check and the transition it guards, so a scan and
    /// a connect cannot both start when they exclude each other.
    transitions: Arc<Mutex<()>>,
}

/// Owns one connection, one scanner and the event bus for a host.
pub struct SessionManager {
    adapter: Option<Arc<dyn BluetoothAdapter>>,
    settings: BridgeSettings,
    events: EventBus,
    session: Mutex<Option<Session>>,
}

impl SessionManager {
    /// Creates a new SessionManager. `adapter` is `None` on hosts without a radio.
    pub fn new(adapter: Option<Arc<dyn BluetoothAdapter>>, settings: BridgeSettings) -> Self {
        let events = EventBus::new(settings.event_channel_capacity);
        if adapter.is_none() {
            warn!("No Bluetooth adapter available; adapter operations will fail");
        }
        Self {
            adapter,
            settings,
            events,
            session: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    pub fn is_configured(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// The configuration currently in effect
    pub fn config(&self) -> Option<SessionConfig> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.config.as_ref().clone())
    }

    fn adapter(&self) -> Result<Arc<dyn BluetoothAdapter>> {
        self.adapter.clone().ok_or(BridgeError::AdapterUnavailable)
    }

    fn session(&self) -> Result<Session> {
        lock(&self.session).clone().ok_or(BridgeError::NotConfigured)
    }

    /// Apply a configuration. Reconfiguring requires the connection to be Disconnected;
    /// a running scan is stopped first.
    pub async fn configure(&self, config: SessionConfig) -> Result<SessionConfig> {
        let adapter = self.adapter()?;
        config.validate()?;

        let previous = lock(&self.session).clone();
        if let Some(previous) = previous {
            ensure_disconnected(&previous)?;
            if previous.scanner.is_scanning() {
                info!("Stopping scan before reconfiguring");
                if let Err(e) = previous.scanner.stop_scan().await {
                    warn!("Failed to stop scan during reconfigure: {}", e);
                }
            }
        }

        let config = Arc::new(config);
        let session = Session {
            connection: ConnectionManager::new(
                adapter.clone(),
                config.clone(),
                self.events.clone(),
                self.settings.connect_timeout(),
                self.settings.disconnect_timeout(),
            ),
            scanner: BluetoothScanner::new(
                adapter,
                self.events.clone(),
                config.device_name.clone(),
                self.settings.stop_scan_settle(),
            ),
            config: config.clone(),
            transitions: Arc::new(Mutex::new(())),
        };

        {
            let mut slot = lock(&self.session);
            if let Some(current) = slot.as_ref() {
                ensure_disconnected(current)?;
            }
            *slot = Some(session);
        }

        info!("Session configured: {:?}", config);
        Ok(config.as_ref().clone())
    }

    /// Scan until stopped (or until the adapter finishes) and return the devices found.
    pub async fn start_scan(&self) -> Result<Vec<Device>> {
        let session = self.session()?;
        let ticket = {
            let _transitions = lock(&session.transitions);
            let status = session.connection.status();
            if !self.settings.allow_scan_while_connected && status.is_active() {
                return Err(BridgeError::InvalidState(format!("cannot scan while {status}")));
            }
            session.scanner.begin_scan()?
        };
        session.scanner.run_scan(ticket).await
    }

    pub async fn stop_scan(&self) -> Result<Vec<Device>> {
        self.session()?.scanner.stop_scan().await
    }

    pub async fn connect(&self, address: &str, name: Option<&str>) -> Result<Device> {
        let session = self.session()?;
        let device = Device::from_parts(address, name)?;
        let ticket = {
            let _transitions = lock(&session.transitions);
            if !self.settings.allow_scan_while_connected && session.scanner.is_scanning() {
                return Err(BridgeError::InvalidState(
                    "cannot connect while scanning".to_string(),
                ));
            }
            session.connection.begin_connect(device)?
        };
        session.connection.finish_connect(ticket).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session()?.connection.disconnect().await
    }

    pub fn status(&self) -> Result<ConnectionStatus> {
        Ok(self.session()?.connection.status())
    }

    pub fn remote_device(&self) -> Option<Device> {
        lock(&self.session)
            .as_ref()
            .and_then(|session| session.connection.remote_device())
    }

    /// Send text without a delimiter
    pub async fn write(&self, text: &str) -> Result<()> {
        self.send(WriteCommand::Text(text.to_string())).await
    }

    /// Send text followed by the configured delimiter
    pub async fn write_line(&self, text: &str) -> Result<()> {
        self.send(WriteCommand::Line(text.to_string())).await
    }

    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.send(WriteCommand::Bytes(bytes.to_vec())).await
    }

    async fn send(&self, command: WriteCommand) -> Result<()> {
        self.session()?.connection.write(command).await
    }

    /// Release the transport and forget the configuration.
    pub async fn stop_session(&self) -> Result<()> {
        let session = lock(&self.session)
            .take()
            .ok_or(BridgeError::NotConfigured)?;
        info!("Stopping session");

        if session.scanner.is_scanning() {
            if let Err(e) = session.scanner.stop_scan().await {
                warn!("Failed to stop scan while stopping session: {}", e);
            }
        }
        session.connection.disconnect().await
    }

    pub async fn is_adapter_enabled(&self) -> Result<bool> {
        Ok(self.adapter()?.is_enabled().await?)
    }

    pub async fn enable_adapter(&self) -> Result<()> {
        if self.adapter()?.set_enabled(true).await? {
            Ok(())
        } else {
            Err(BridgeError::transport("Could not enable bluetooth adapter."))
        }
    }

    pub async fn disable_adapter(&self) -> Result<()> {
        if self.adapter()?.set_enabled(false).await? {
            Ok(())
        } else {
            Err(BridgeError::transport("Could not disable bluetooth adapter."))
        }
    }

    pub async fn list_bonded_devices(&self) -> Result<Vec<Device>> {
        let devices = self.adapter()?.bonded_devices().await?;
        info!("Found {} bonded device(s)", devices.len());
        Ok(devices)
    }
}

fn ensure_disconnected(session: &Session) -> Result<()> {
    let status = session.connection.status();
    if status == ConnectionStatus::Disconnected {
        Ok(())
    } else {
        Err(BridgeError::InvalidState(format!("cannot reconfigure while {status}")))
    }
}

//! Bridge commands
//! This module defines all the commands that can be invoked by the host runtime,
//! plus the JSON envelope they travel in.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::constants::{
    EVENT_DATA_READ, EVENT_DEVICE_FOUND, EVENT_DEVICE_NAME, EVENT_STATUS_CHANGE,
};
use crate::core::bluetooth::{BridgeError, ConnectionStatus, Device, ErrorKind};
use crate::state::AppState;

/// Failure reported back to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<BridgeError> for CommandError {
    fn from(error: BridgeError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Commands understood by [`dispatch`]. Legacy method names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum BridgeCommand {
    #[serde(alias = "init")]
    Configure { config: Value },
    StartScan,
    StopScan,
    Connect {
        address: String,
        #[serde(default)]
        name: Option<String>,
    },
    Disconnect,
    GetStatus,
    Write { data: String },
    #[serde(alias = "writeln")]
    WriteLine { data: String },
    #[serde(alias = "writeIntArray")]
    WriteBytes { data: Vec<i64> },
    #[serde(alias = "stopService")]
    StopSession,
    #[serde(alias = "isAdapterEnable")]
    IsAdapterEnabled,
    #[serde(alias = "enable")]
    EnableAdapter,
    #[serde(alias = "disable")]
    DisableAdapter,
    #[serde(alias = "getBoundedDevices")]
    ListBondedDevices,
    GetConstants,
}

/// One request line: `{"id": 7, "command": "connect", "address": "..."}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Ok(Value),
    Error(CommandError),
}

/// Reply to a request: `{"id": 7, "ok": ...}` or `{"id": 7, "error": {"kind", "message"}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Applies a session configuration
///
/// # Returns
/// The accepted configuration, echoed back
pub async fn configure(app_state: &AppState, config: Value) -> CommandResult<SessionConfig> {
    let config = SessionConfig::from_json(config)?;
    Ok(app_state.session_manager.configure(config).await?)
}

/// Scans for devices with real-time updates through events
///
/// # Returns
/// Every device found once the scan is stopped or completes. Emits
/// "deviceFound" for each sighting meanwhile.
pub async fn start_scan(app_state: &AppState) -> CommandResult<Vec<Device>> {
    Ok(app_state.session_manager.start_scan().await?)
}

pub async fn stop_scan(app_state: &AppState) -> CommandResult<()> {
    app_state.session_manager.stop_scan().await?;
    Ok(())
}

/// Connects to a device
///
/// # Arguments
/// * `address` - Hardware address of the device
/// * `name` - Name shown in errors, if known
pub async fn connect(
    app_state: &AppState,
    address: &str,
    name: Option<&str>,
) -> CommandResult<Device> {
    Ok(app_state.session_manager.connect(address, name).await?)
}

/// Disconnects from the currently connected device
pub async fn disconnect(app_state: &AppState) -> CommandResult<()> {
    Ok(app_state.session_manager.disconnect().await?)
}

pub fn get_status(app_state: &AppState) -> CommandResult<ConnectionStatus> {
    Ok(app_state.session_manager.status()?)
}

pub async fn write(app_state: &AppState, data: &str) -> CommandResult<()> {
    Ok(app_state.session_manager.write(data).await?)
}

pub async fn write_line(app_state: &AppState, data: &str) -> CommandResult<()> {
    Ok(app_state.session_manager.write_line(data).await?)
}

/// Writes integers as raw bytes; each value keeps only its low eight bits.
pub async fn write_bytes(app_state: &AppState, data: &[i64]) -> CommandResult<()> {
    let bytes: Vec<u8> = data.iter().map(|value| *value as u8).collect();
    Ok(app_state.session_manager.write_bytes(&bytes).await?)
}

pub async fn stop_session(app_state: &AppState) -> CommandResult<()> {
    Ok(app_state.session_manager.stop_session().await?)
}

pub async fn is_adapter_enabled(app_state: &AppState) -> CommandResult<bool> {
    Ok(app_state.session_manager.is_adapter_enabled().await?)
}

pub async fn enable_adapter(app_state: &AppState) -> CommandResult<()> {
    Ok(app_state.session_manager.enable_adapter().await?)
}

pub async fn disable_adapter(app_state: &AppState) -> CommandResult<()> {
    Ok(app_state.session_manager.disable_adapter().await?)
}

pub async fn list_bonded_devices(app_state: &AppState) -> CommandResult<Vec<Device>> {
    Ok(app_state.session_manager.list_bonded_devices().await?)
}

/// Event names the host subscribes to
pub fn get_constants() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("EVENT_DATA_READ", EVENT_DATA_READ),
        ("EVENT_DEVICE_FOUND", EVENT_DEVICE_FOUND),
        ("EVENT_DEVICE_NAME", EVENT_DEVICE_NAME),
        ("EVENT_STATUS_CHANGE", EVENT_STATUS_CHANGE),
    ])
}

fn reply<T: Serialize>(result: CommandResult<T>) -> Outcome {
    match result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| CommandError {
            kind: ErrorKind::InvalidRequest,
            message: e.to_string(),
        })
    }) {
        Ok(value) => Outcome::Ok(value),
        Err(error) => Outcome::Error(error),
    }
}

/// Run one command against the session
pub async fn dispatch(app_state: &AppState, request: Request) -> Response {
    debug!("Dispatching {:?}", request.command);
    let outcome = match request.command {
        BridgeCommand::Configure { config } => reply(configure(app_state, config).await),
        BridgeCommand::StartScan => reply(start_scan(app_state).await),
        BridgeCommand::StopScan => reply(stop_scan(app_state).await),
        BridgeCommand::Connect { address, name } => {
            reply(connect(app_state, &address, name.as_deref()).await)
        }
        BridgeCommand::Disconnect => reply(disconnect(app_state).await),
        BridgeCommand::GetStatus => reply(get_status(app_state)),
        BridgeCommand::Write { data } => reply(write(app_state, &data).await),
        BridgeCommand::WriteLine { data } => reply(write_line(app_state, &data).await),
        BridgeCommand::WriteBytes { data } => reply(write_bytes(app_state, &data).await),
        BridgeCommand::StopSession => reply(stop_session(app_state).await),
        BridgeCommand::IsAdapterEnabled => reply(is_adapter_enabled(app_state).await),
        BridgeCommand::EnableAdapter => reply(enable_adapter(app_state).await),
        BridgeCommand::DisableAdapter => reply(disable_adapter(app_state).await),
        BridgeCommand::ListBondedDevices => reply(list_bonded_devices(app_state).await),
        BridgeCommand::GetConstants => reply(Ok(get_constants())),
    };
    if let Outcome::Error(error) = &outcome {
        warn!("Command {:?} failed: {}", request.id, error.message);
    }
    Response {
        id: request.id,
        outcome,
    }
}

/// Parse one JSON request line and run it
pub async fn handle_line(app_state: &AppState, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(app_state, request).await,
        Err(e) => {
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|value| value.get("id").and_then(Value::as_u64));
            warn!("Rejecting malformed request: {}", e);
            Response {
                id,
                outcome: Outcome::Error(CommandError {
                    kind: ErrorKind::InvalidRequest,
                    message: e.to_string(),
                }),
            }
        }
    }
}

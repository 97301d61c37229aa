//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of a remote device, produced at discovery or bond enumeration time.
/// Never mutated; a newer snapshot with the same address supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Hardware address (`AA:BB:CC:DD:EE:FF`), unique per device
    pub address: String,
    /// Friendly name, empty when the remote did not report one
    #[serde(default)]
    pub name: String,
    /// The signal strength (RSSI) at the time of the snapshot
    #[serde(default)]
    pub rssi: i16,
    /// Service UUIDs advertised by the device
    #[serde(default)]
    pub uuids: BTreeSet<Uuid>,
}

impl Device {
    /// Creates a new Device snapshot without advertised services
    pub fn new(address: impl Into<String>, name: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            rssi,
            uuids: BTreeSet::new(),
        }
    }

    pub fn with_uuids(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.uuids = uuids.into_iter().collect();
        self
    }
}

/// Status of the single connection owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionStatus {
    /// Name reported to the host runtime
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
        }
    }

    /// Whether the connection holds, or is acquiring, a transport
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Discovery lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

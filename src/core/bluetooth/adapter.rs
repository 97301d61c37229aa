//! Seam between the session and the platform Bluetooth stack.
//!
//! The platform radio and the RFCOMM socket are external collaborators; a
//! host embeds the bridge by implementing [`BluetoothAdapter`] on top of its
//! own stack.

use std::fmt;
use std::io;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::types::Device;

pub type TransportReader = Box<dyn AsyncRead + Send + Unpin>;
pub type TransportWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stream of discovery results. The stream ending means the adapter finished
/// the scan on its own.
pub type DiscoveryStream = BoxStream<'static, Device>;

/// An established byte-stream connection to a remote device.
pub struct Transport {
    /// The device snapshot as resolved by the adapter
    pub remote: Device,
    pub reader: TransportReader,
    pub writer: TransportWriter,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Local Bluetooth radio controller.
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Whether the radio is powered on
    async fn is_enabled(&self) -> io::Result<bool>;

    /// Request the radio to be powered on or off. Returns false when the
    /// platform refused the request.
    async fn set_enabled(&self, enabled: bool) -> io::Result<bool>;

    /// Devices paired at the OS level
    async fn bonded_devices(&self) -> io::Result<Vec<Device>>;

    /// Begin discovery of nearby devices
    async fn start_discovery(&self) -> io::Result<DiscoveryStream>;

    /// Cancel an ongoing discovery. Must be harmless when none is running.
    async fn stop_discovery(&self) -> io::Result<()>;

    /// Open a stream connection to `device`. May never complete; callers bound it.
    async fn connect(&self, device: &Device, config: &SessionConfig) -> io::Result<Transport>;
}

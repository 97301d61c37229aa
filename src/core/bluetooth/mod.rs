//! Bluetooth session functionality for the bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, framing and delivering data read from the remote device.

pub mod adapter;
pub mod codec;
mod commands;
mod connection;
pub mod constants;
mod device;
pub mod error;
pub mod events;
pub mod loopback;
mod manager;
mod notification;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::{BluetoothAdapter, DiscoveryStream, Transport};
pub use codec::{Decoded, FrameCodec, FrameDecoder};
pub use commands::{WriteCommand, WriteQueue};
pub use connection::ConnectionManager;
pub use constants::*; // Re-export all constants
pub use device::normalize_address;
pub use error::{BridgeError, ErrorKind, Result};
pub use events::{BridgeEvent, EventBus, EventSubscriber};
pub use loopback::{ConnectBehavior, LoopbackAdapter};
pub use manager::SessionManager;
pub use notification::{NotificationHandler, StreamEnd};
pub use scanner::BluetoothScanner;
pub use types::{ConnectionStatus, Device, ScanState};

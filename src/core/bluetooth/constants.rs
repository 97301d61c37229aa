//! Constants used throughout the bridge
//! This module contains event names, timeouts and other default values.

/// Event emitted for every device sighted during a scan
pub const EVENT_DEVICE_FOUND: &str = "deviceFound";

/// Event emitted for every delimited record read from the connection
pub const EVENT_DATA_READ: &str = "dataRead";

/// Event emitted when the connection status changes
pub const EVENT_STATUS_CHANGE: &str = "statusChange";

/// Event emitted with the remote device name once connected
pub const EVENT_DEVICE_NAME: &str = "deviceName";

/// Default time allowed for a connect attempt to settle, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Default time a disconnect waits for an in-flight connect to settle, in milliseconds
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u64 = 2000;

/// Default queue depth per event subscriber
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Upper bound for a single transport read, whatever the configured buffer size
pub const MAX_READ_CHUNK: usize = 64 * 1024;

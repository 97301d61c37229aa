//! Error taxonomy reported through every bridge command.

use serde::Serialize;

use crate::core::bluetooth::types::Device;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bluetooth adapter not found")]
    AdapterUnavailable,
    #[error("Session has not been configured, call configure first")]
    NotConfigured,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("A scan is already in progress")]
    AlreadyScanning,
    #[error("Unable to connect to {} [{}]: {reason}", device.name, device.address)]
    ConnectFailed { device: Device, reason: String },
    #[error("Not connected")]
    NotConnected,
    #[error("Frame of {len} bytes exceeds buffer size of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Kind of a failure, as reported to the host runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AdapterUnavailable,
    NotConfigured,
    InvalidConfig,
    InvalidRequest,
    InvalidAddress,
    InvalidState,
    AlreadyScanning,
    ConnectFailed,
    NotConnected,
    FrameTooLarge,
    Cancelled,
    TransportError,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdapterUnavailable => ErrorKind::AdapterUnavailable,
            Self::NotConfigured => ErrorKind::NotConfigured,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::AlreadyScanning => ErrorKind::AlreadyScanning,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Transport(_) => ErrorKind::TransportError,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(std::io::Error::other(message.into()))
    }
}

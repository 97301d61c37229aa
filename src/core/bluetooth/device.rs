//! Bluetooth device address handling and related functionality

use std::sync::LazyLock;

use regex::Regex;

use crate::core::bluetooth::error::BridgeError;
use crate::core::bluetooth::types::Device;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("address pattern is valid")
});

/// Validates a hardware address and returns it in canonical upper-case form.
pub fn normalize_address(address: &str) -> Result<String, BridgeError> {
    let trimmed = address.trim();
    if ADDRESS_RE.is_match(trimmed) {
        Ok(trimmed.to_uppercase())
    } else {
        Err(BridgeError::InvalidAddress(address.to_string()))
    }
}

impl Device {
    /// Builds the snapshot a caller hands to `connect`, checking the address first.
    pub fn from_parts(address: &str, name: Option<&str>) -> Result<Self, BridgeError> {
        let address = normalize_address(address)?;
        Ok(Device::new(address, name.unwrap_or_default(), 0))
    }

    /// Returns true if this device passes the configured name filter
    pub fn matches_name_filter(&self, filter: Option<&str>) -> bool {
        match filter {
            Some(filter) if !filter.is_empty() => self.name.contains(filter),
            _ => true,
        }
    }
}

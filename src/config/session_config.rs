use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::codec::FrameCodec;
use crate::core::bluetooth::error::{BridgeError, Result};

/// Per-session configuration supplied by the host through `configure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Label of the local device; when non-empty it also filters scan results by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Record delimiter for reads and `writeLine`. Only the first character of
    /// the supplied string is used.
    #[serde(with = "delimiter")]
    pub character_delimiter: char,

    /// Largest frame, in bytes, accepted in either direction
    pub buffer_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid_service: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid_characteristic: Option<Uuid>,

    /// Platform transport selector, passed through to the adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<i32>,
}

impl SessionConfig {
    pub fn new(character_delimiter: char, buffer_size: usize) -> Self {
        Self {
            device_name: None,
            character_delimiter,
            buffer_size,
            uuid: None,
            uuid_service: None,
            uuid_characteristic: None,
            transport: None,
        }
    }

    /// Parse and validate a configuration object sent by the host.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "bufferSize must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.character_delimiter, self.buffer_size)
    }
}

mod delimiter {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &char, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = [0u8; 4];
        serializer.serialize_str(value.encode_utf8(&mut buf))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<char, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.chars()
            .next()
            .ok_or_else(|| D::Error::custom("characterDelimiter must not be empty"))
    }
}

//! # Static device list.
//!
//! [`DeviceSpec`] describes one device the broker should manage. The list is
//! read once at startup and fed to [`Broker::register_devices`](crate::Broker::register_devices).
//!
//! ## File format
//! ```json
//! [
//!   { "id": "00e20100", "display_name": "Vector-A1B2", "params": { "ip": "192.168.1.20" } },
//!   { "id": "00e20101", "display_name": "Vector-C3D4" }
//! ]
//! ```
//! `display_name` defaults to the id and `params` to an empty map.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::{ConnectParams, DeviceId};
use crate::error::ConfigError;

/// One configured device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Unique device id.
    pub id: DeviceId,
    /// Human-readable name; defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Parameters passed to the connector.
    #[serde(default)]
    pub params: ConnectParams,
}

impl DeviceSpec {
    /// Creates a spec without connect parameters.
    pub fn new(id: impl Into<DeviceId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            params: ConnectParams::new(),
        }
    }

    /// Adds one connect parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns the display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Parses a JSON device list, rejecting duplicate ids.
    pub fn parse_all(json: &str) -> Result<Vec<DeviceSpec>, ConfigError> {
        let specs: Vec<DeviceSpec> = serde_json::from_str(json)?;
        let mut seen = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if !seen.insert(spec.id.clone()) {
                return Err(ConfigError::DuplicateDevice {
                    id: spec.id.clone(),
                });
            }
        }
        Ok(specs)
    }

    /// Reads and parses a JSON device list from `path`.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<DeviceSpec>, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_all(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let specs = DeviceSpec::parse_all(
            r#"[
                { "id": "00e20100", "display_name": "Vector-A1B2", "params": { "ip": "10.0.0.2" } },
                { "id": "00e20101" }
            ]"#,
        )
        .unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].display_name(), "Vector-A1B2");
        assert_eq!(specs[0].params.get("ip").map(String::as_str), Some("10.0.0.2"));
        assert_eq!(specs[1].display_name(), "00e20101");
        assert!(specs[1].params.is_empty());
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let err = DeviceSpec::parse_all(r#"[{ "id": "a" }, { "id": "a" }]"#).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDevice { id } if id.as_str() == "a"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            DeviceSpec::parse_all("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

//! # Device connection seam.
//!
//! The runtime holds no device-protocol knowledge. A [`Connector`] turns a
//! device id plus its connect parameters into a live [`Connection`]; the
//! connection dispatches commands, answers synchronous sensor reads and
//! signals loss of control exactly once.
//!
//! ```text
//! ReconnectScheduler ──► Connector::connect(id, params) ──► ConnectionRef
//!                                                              │
//!        ┌─────────────────────────────────────────────────────┤
//!        ▼                          ▼                          ▼
//!   TaskExecutor             ControlLossWatcher         registry teardown
//!   (actions dispatch)       (awaits control_lost)      (disconnect)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::ConnectionError;

/// Opaque connect parameters, handed verbatim to the [`Connector`].
pub type ConnectParams = BTreeMap<String, String>;

/// Point-in-time sensor readings (name → value).
pub type SensorSnapshot = BTreeMap<String, serde_json::Value>;

/// Shared handle to a live connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Shared handle to a connector.
pub type ConnectorRef = Arc<dyn Connector>;

/// A command sent to a device: a name plus free-form parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name (e.g. `"app_intent"`, `"drive_off_charger"`).
    pub name: String,
    /// Command parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Command {
    /// Creates a command without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Attaches parameters.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Factory for live device connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection to `id`.
    ///
    /// May take arbitrarily long; the scheduler runs it off the sweep and may
    /// bound it with `BrokerConfig::connect_timeout`.
    async fn connect(
        &self,
        id: &DeviceId,
        params: &ConnectParams,
    ) -> Result<ConnectionRef, ConnectionError>;
}

/// A live, exclusively owned device connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Sends one command and awaits its result.
    async fn dispatch(&self, command: Command) -> Result<serde_json::Value, ConnectionError>;

    /// Returns the latest sensor readings without awaiting the device.
    fn read_sensors(&self) -> SensorSnapshot;

    /// Resolves once the device reports that control was lost.
    ///
    /// Each connection instance resolves this at most once; a connection
    /// that never loses control may keep it pending forever.
    async fn control_lost(&self);

    /// Closes the connection.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

//! Error types used by the leasevisor runtime, its sessions and actions.
//!
//! This module defines the error enums surfaced to callers:
//!
//! - [`BrokerError`]: denials and failures of registry operations (lease, connect, submit).
//! - [`ConnectionError`]: failures reported by a device connection; always transient.
//! - [`ActionError`]: failures raised by an individual action run.
//! - [`RuntimeError`]: errors raised by the runtime itself during startup or shutdown.
//! - [`ConfigError`]: failures loading the device list or building the broker.
//!
//! All of them provide `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

use crate::device::DeviceId;

/// # Errors produced by session registry operations.
///
/// Every variant is a typed denial: the operation did not mutate the session.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No session is registered under this id.
    #[error("unknown device '{id}'")]
    UnknownDevice {
        /// Requested device id.
        id: DeviceId,
    },

    /// The session is controlled by another caller.
    #[error("device '{id}' is controlled by another caller")]
    LeaseConflict {
        /// Requested device id.
        id: DeviceId,
    },

    /// The caller does not hold the lease (never held it, released it, or it expired).
    #[error("caller does not hold the lease on device '{id}'")]
    LeaseNotOwned {
        /// Requested device id.
        id: DeviceId,
    },

    /// The session is disconnected, connecting, or administratively unavailable.
    #[error("device '{id}' is not available")]
    NotAvailable {
        /// Requested device id.
        id: DeviceId,
    },

    /// `begin_connect` was called on a session that is not disconnected.
    #[error("device '{id}' is not disconnected; connect already in progress or established")]
    NotDisconnected {
        /// Requested device id.
        id: DeviceId,
    },

    /// The connect attempt was overtaken (the session was torn down or reconnected meanwhile).
    #[error("connect attempt for device '{id}' is stale")]
    StaleConnect {
        /// Requested device id.
        id: DeviceId,
    },

    /// New connects, acquisitions and submissions are rejected once shutdown began.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// The session's execution loop is gone (device disconnected meanwhile).
    #[error("executor for device '{id}' is closed")]
    ExecutorClosed {
        /// Requested device id.
        id: DeviceId,
    },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use leasevisor::{BrokerError, DeviceId};
    ///
    /// let err = BrokerError::LeaseConflict { id: DeviceId::from("00e20100") };
    /// assert_eq!(err.as_label(), "lease_conflict");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::UnknownDevice { .. } => "unknown_device",
            BrokerError::LeaseConflict { .. } => "lease_conflict",
            BrokerError::LeaseNotOwned { .. } => "lease_not_owned",
            BrokerError::NotAvailable { .. } => "not_available",
            BrokerError::NotDisconnected { .. } => "not_disconnected",
            BrokerError::StaleConnect { .. } => "stale_connect",
            BrokerError::ShutdownInProgress => "shutdown_in_progress",
            BrokerError::ExecutorClosed { .. } => "executor_closed",
        }
    }

    /// Indicates whether the caller was denied because of the lease (as opposed
    /// to device connectivity or runtime state).
    pub fn is_lease_denial(&self) -> bool {
        matches!(
            self,
            BrokerError::LeaseConflict { .. } | BrokerError::LeaseNotOwned { .. }
        )
    }
}

/// # Errors produced by a device connection.
///
/// Connection errors are transient: the session returns to `Disconnected` and
/// the reconnect scheduler retries with backoff.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The device could not be reached.
    #[error("unable to reach device: {reason}")]
    Unreachable {
        /// Connector-provided detail.
        reason: String,
    },

    /// The device answered but refused to hand over control.
    #[error("failed to get control of device: {reason}")]
    ControlDenied {
        /// Connector-provided detail.
        reason: String,
    },

    /// The connect attempt did not finish within the configured bound.
    #[error("connect timed out after {timeout:?}")]
    Timeout {
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A dispatched command failed.
    #[error("command '{command}' failed: {reason}")]
    Command {
        /// Command name.
        command: String,
        /// Connector-provided detail.
        reason: String,
    },
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Unreachable { .. } => "connection_unreachable",
            ConnectionError::ControlDenied { .. } => "connection_control_denied",
            ConnectionError::Timeout { .. } => "connection_timeout",
            ConnectionError::Command { .. } => "connection_command",
        }
    }
}

/// # Errors produced by action execution.
///
/// These never escape the executor; they are folded into a
/// [`JobOutcome`](crate::JobOutcome).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ActionError {
    /// Action failed.
    #[error("action failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Action observed its cancellation token and stopped early.
    #[error("action cancelled")]
    Canceled,

    /// A command dispatched by the action failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ActionError {
    /// Shorthand for [`ActionError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ActionError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use leasevisor::ActionError;
    ///
    /// assert_eq!(ActionError::fail("boom").as_label(), "action_failed");
    /// assert_eq!(ActionError::Canceled.as_label(), "action_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Fail { .. } => "action_failed",
            ActionError::Canceled => "action_canceled",
            ActionError::Connection(_) => "action_connection",
        }
    }
}

/// # Errors produced by the leasevisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some sessions did not finish teardown in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Devices whose teardown did not finish in time.
        stuck: Vec<DeviceId>,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Errors produced while loading the device list.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read device list: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid JSON device list.
    #[error("invalid device list: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two entries share the same id.
    #[error("duplicate device id '{id}'")]
    DuplicateDevice {
        /// The repeated id.
        id: DeviceId,
    },

    /// `BrokerBuilder::build` was called without a connector.
    #[error("no connector configured")]
    MissingConnector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_denials() {
        let id = DeviceId::from("d1");
        assert!(BrokerError::LeaseConflict { id: id.clone() }.is_lease_denial());
        assert!(BrokerError::LeaseNotOwned { id: id.clone() }.is_lease_denial());
        assert!(!BrokerError::NotAvailable { id }.is_lease_denial());
        assert!(!BrokerError::ShutdownInProgress.is_lease_denial());
    }

    #[test]
    fn test_connection_error_converts_into_action_error() {
        let err: ActionError = ConnectionError::Command {
            command: "drive_on_charger".into(),
            reason: "busy".into(),
        }
        .into();
        assert_eq!(err.as_label(), "action_connection");
        assert_eq!(err.to_string(), "command 'drive_on_charger' failed: busy");
    }
}

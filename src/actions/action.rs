//! # Action abstraction and the context handed to a running job.
//!
//! An [`Action`] is an opaque, cancelable unit of device work. The runtime
//! never looks inside it; it only decides whether and when it runs.
//!
//! An action receives a [`JobContext`] carrying the job's [`CancellationToken`]
//! and the device connection. Cancellation is cooperative: the action should
//! check the token at its own yield points ([`JobContext::dispatch`] and
//! [`JobContext::sleep`] do so for it).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::device::{Command, ConnectionRef, DeviceId, SensorSnapshot};
use crate::error::ActionError;

/// Shared reference to an action.
pub type ActionRef = Arc<dyn Action>;

/// # Asynchronous, cancelable unit of device work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use leasevisor::{Action, ActionError, Command, JobContext};
///
/// struct Dance;
///
/// #[async_trait]
/// impl Action for Dance {
///     fn name(&self) -> &str { "dance" }
///
///     async fn run(&self, ctx: JobContext) -> Result<(), ActionError> {
///         ctx.dispatch(Command::new("app_intent")).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Returns a stable, human-readable action name.
    fn name(&self) -> &str;

    /// Runs the action until completion or cancellation.
    ///
    /// Return `Err(ActionError::Canceled)` after observing cancellation.
    async fn run(&self, ctx: JobContext) -> Result<(), ActionError>;
}

/// Everything a running job may touch.
#[derive(Clone)]
pub struct JobContext {
    device: DeviceId,
    job_id: u64,
    token: CancellationToken,
    connection: ConnectionRef,
}

impl JobContext {
    pub(crate) fn new(
        device: DeviceId,
        job_id: u64,
        token: CancellationToken,
        connection: ConnectionRef,
    ) -> Self {
        Self {
            device,
            job_id,
            token,
            connection,
        }
    }

    /// Device this job runs on.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Per-executor job number.
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// The job's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the job was superseded or the executor is stopping.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the job is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Dispatches a command to the device.
    ///
    /// Checks cancellation before sending; an already-sent command is awaited
    /// to completion.
    pub async fn dispatch(&self, command: Command) -> Result<serde_json::Value, ActionError> {
        if self.token.is_cancelled() {
            return Err(ActionError::Canceled);
        }
        Ok(self.connection.dispatch(command).await?)
    }

    /// Sleeps for `dur`, returning early with `Canceled` on cancellation.
    pub async fn sleep(&self, dur: Duration) -> Result<(), ActionError> {
        tokio::select! {
            _ = tokio::time::sleep(dur) => Ok(()),
            _ = self.token.cancelled() => Err(ActionError::Canceled),
        }
    }

    /// Latest sensor readings.
    pub fn read_sensors(&self) -> SensorSnapshot {
        self.connection.read_sensors()
    }
}

//! # LogWriter: renders runtime events through `tracing`
//!
//! A subscriber that turns each [`Event`] into one structured `tracing`
//! record. Install any `tracing` subscriber (e.g. `tracing-subscriber`'s `fmt`)
//! to see them.
//!
//! ## Levels
//! - `warn`: control lost, lease expired, job failed, grace exceeded, subscriber trouble
//! - `info`: connects, disconnects, lease grant/release, shutdown progress
//! - `debug`: connect attempts, job start/success/cancel, registrations

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let device = e.device.as_deref().unwrap_or("-");
        let caller = e.caller.as_deref().unwrap_or("-");
        let job = e.job.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::DeviceRegistered => debug!(device, "device registered"),
            EventKind::ConnectStarting => {
                debug!(device, attempt = e.attempt, "connecting");
            }
            EventKind::Connected => info!(device, "connected"),
            EventKind::ConnectFailed => warn!(
                device,
                attempt = e.attempt,
                retry_in_ms = e.delay_ms,
                reason,
                "connect failed"
            ),
            EventKind::ControlLost => warn!(device, "control lost"),
            EventKind::Disconnected => info!(device, reason, "disconnected"),
            EventKind::AvailabilityChanged => info!(device, reason, "availability changed"),
            EventKind::LeaseAcquired => info!(device, caller, "lease acquired"),
            EventKind::LeaseReleased => info!(device, caller, "lease released"),
            EventKind::LeaseExpired => warn!(
                device,
                caller,
                silent_ms = e.delay_ms,
                "lease expired, releasing device due to inactivity"
            ),
            EventKind::JobStarted => debug!(device, job, job_id = e.job_id, "job started"),
            EventKind::JobSucceeded => debug!(device, job, job_id = e.job_id, "job succeeded"),
            EventKind::JobFailed => warn!(device, job, job_id = e.job_id, reason, "job failed"),
            EventKind::JobCancelled => {
                debug!(device, job, job_id = e.job_id, reason, "job cancelled")
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all sessions stopped within grace"),
            EventKind::GraceExceeded => warn!("shutdown grace exceeded"),
            EventKind::SubscriberOverflow => {
                warn!(subscriber = e.subscriber, reason, "subscriber dropped event")
            }
            EventKind::SubscriberPanicked => {
                warn!(subscriber = e.subscriber, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}

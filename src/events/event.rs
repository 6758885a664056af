//! # Runtime events emitted by the registry, sweeps, executors and broker.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Connection events**: connect attempts, outcomes, control loss, teardown
//! - **Lease events**: acquisition, release, expiry
//! - **Job events**: start and terminal outcome of executor jobs
//! - **Runtime events**: shutdown progress and subscriber health
//!
//! The [`Event`] struct carries metadata such as timestamps, device id,
//! caller, job name and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use leasevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ConnectFailed)
//!     .with_device("00e20100")
//!     .with_reason("unreachable")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(30));
//!
//! assert_eq!(ev.kind, EventKind::ConnectFailed);
//! assert_eq!(ev.device.as_deref(), Some("00e20100"));
//! assert_eq!(ev.delay_ms, Some(30_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `subscriber`, `reason`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `subscriber`, `reason`.
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All sessions were torn down within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some teardowns did not finish in time.
    GraceExceeded,

    // === Connection events ===
    /// Device registered (Disconnected).
    ///
    /// Sets `device`.
    DeviceRegistered,

    /// Connect attempt dispatched (Disconnected → Connecting).
    ///
    /// Sets `device`, `attempt` (1-based, counting since the last success).
    ConnectStarting,

    /// Connect succeeded (Connecting → Available).
    ///
    /// Sets `device`.
    Connected,

    /// Connect failed (Connecting → Disconnected).
    ///
    /// Sets `device`, `attempt`, `reason`, `delay_ms` (wait before the next try).
    ConnectFailed,

    /// Device reported loss of control.
    ///
    /// Sets `device`.
    ControlLost,

    /// Session torn down (any → Disconnected).
    ///
    /// Sets `device`, `reason`.
    Disconnected,

    /// Session administratively held (→ Unavailable) or returned (→ Available).
    ///
    /// Sets `device`, `reason` (`"held"` / `"returned"`).
    AvailabilityChanged,

    // === Lease events ===
    /// Lease granted (Available → Controlled).
    ///
    /// Sets `device`, `caller`.
    LeaseAcquired,

    /// Lease released by its owner (Controlled → Available).
    ///
    /// Sets `device`, `caller`.
    LeaseReleased,

    /// Lease reclaimed by the heartbeat monitor (Controlled → Available).
    ///
    /// Sets `device`, `caller` (the evicted owner), `delay_ms` (silence length).
    LeaseExpired,

    // === Job events ===
    /// Job started on the device's execution loop.
    ///
    /// Sets `device`, `job`, `job_id`.
    JobStarted,

    /// Job finished successfully.
    ///
    /// Sets `device`, `job`, `job_id`.
    JobSucceeded,

    /// Job finished with an error (including panics).
    ///
    /// Sets `device`, `job`, `job_id`, `reason`.
    JobFailed,

    /// Job was cancelled (superseded or executor stopping).
    ///
    /// Sets `device`, `job`, `job_id`, optionally `reason` (`"forced"` when the
    /// job ignored its token and was abandoned after the grace bound).
    JobCancelled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Device id, if applicable.
    pub device: Option<Arc<str>>,
    /// Caller id, for lease events.
    pub caller: Option<Arc<str>>,
    /// Action name, for job events.
    pub job: Option<Arc<str>>,
    /// Per-executor job number, for job events.
    pub job_id: Option<u64>,
    /// Subscriber name, for subscriber events.
    pub subscriber: Option<&'static str>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Duration in milliseconds (backoff wait, heartbeat silence).
    pub delay_ms: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            device: None,
            caller: None,
            job: None,
            job_id: None,
            subscriber: None,
            reason: None,
            attempt: None,
            delay_ms: None,
        }
    }

    /// Attaches a device id.
    #[inline]
    pub fn with_device(mut self, device: impl AsRef<str>) -> Self {
        self.device = Some(Arc::from(device.as_ref()));
        self
    }

    /// Attaches a caller id.
    #[inline]
    pub fn with_caller(mut self, caller: impl AsRef<str>) -> Self {
        self.caller = Some(Arc::from(caller.as_ref()));
        self
    }

    /// Attaches the job's action name and number.
    #[inline]
    pub fn with_job(mut self, name: impl AsRef<str>, id: u64) -> Self {
        self.job = Some(Arc::from(name.as_ref()));
        self.job_id = Some(id);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a duration (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// True for events produced by subscriber workers themselves.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::LeaseAcquired);
        let b = Event::new(EventKind::LeaseReleased);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_builders() {
        let ev = Event::new(EventKind::JobCancelled)
            .with_device("d1")
            .with_job("dance", 7)
            .with_reason("forced");
        assert_eq!(ev.device.as_deref(), Some("d1"));
        assert_eq!(ev.job.as_deref(), Some("dance"));
        assert_eq!(ev.job_id, Some(7));
        assert_eq!(ev.reason.as_deref(), Some("forced"));
        assert!(!ev.is_subscriber_event());
        assert!(Event::subscriber_overflow("log", "full").is_subscriber_event());
    }
}

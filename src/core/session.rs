//! # Device session: per-device record kept by the registry.
//!
//! The observable [`SessionState`] is never stored; it is derived from three
//! stored facts so the invariants hold by construction:
//!
//! ```text
//! link           unavailable  lease     → state
//! ─────────────  ───────────  ────────  ─────────────
//! Disconnected   -            -         Disconnected
//! Connecting     -            -         Connecting
//! Up             true         -         Unavailable
//! Up             false        Some      Controlled
//! Up             false        None      Available
//! ```
//!
//! Every transition that leaves `Up` (or sets `unavailable`) also clears the
//! lease, so an owner can only exist while the session is `Controlled`.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::executor::TaskExecutor;
use crate::core::job::JobHandle;
use crate::device::{CallerId, ConnectParams, ConnectionRef, DeviceId, DeviceSpec};

/// Observable session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection; the scheduler will retry once the backoff window passes.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and free to lease.
    Available,
    /// Connected and leased by exactly one caller.
    Controlled,
    /// Connected but administratively held; cannot be leased.
    Unavailable,
}

impl SessionState {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Available => "available",
            SessionState::Controlled => "controlled",
            SessionState::Unavailable => "unavailable",
        }
    }

    /// True while a connection is attached.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::Available | SessionState::Controlled | SessionState::Unavailable
        )
    }
}

/// Proof of a started connect attempt.
///
/// Returned by `begin_connect`; `complete_connect` / `fail_connect` accept it
/// only while that same attempt is still the current one.
#[derive(Clone, Debug)]
pub struct ConnectTicket {
    pub(crate) device: DeviceId,
    pub(crate) generation: u64,
    /// Cancelled when the attempt is overtaken by a disconnect.
    pub(crate) abort: CancellationToken,
}

impl ConnectTicket {
    /// Device being connected.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Resolves once this attempt has been abandoned by the registry.
    pub async fn aborted(&self) {
        self.abort.cancelled().await;
    }
}

/// Point-in-time copy of one session.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: DeviceId,
    pub display_name: String,
    pub state: SessionState,
    /// Present only when `state == Controlled`.
    pub owner: Option<CallerId>,
    /// Present only when `state == Controlled`.
    pub last_heartbeat: Option<Instant>,
    /// Failed connects since the last success.
    pub connect_attempts: u32,
    pub last_connect_attempt: Option<Instant>,
    /// Earliest retry instant; present only when `state == Disconnected`.
    pub next_attempt_at: Option<Instant>,
    /// Most recent job submitted on the current connection.
    pub current_job: Option<JobHandle>,
}

/// A granted lease.
#[derive(Clone, Debug)]
pub(crate) struct Lease {
    pub(crate) owner: CallerId,
    pub(crate) last_heartbeat: Instant,
}

/// Everything attached to a live connection.
pub(crate) struct Live {
    pub(crate) generation: u64,
    pub(crate) connection: ConnectionRef,
    pub(crate) executor: Arc<TaskExecutor>,
    pub(crate) watcher: CancellationToken,
}

pub(crate) enum Link {
    Disconnected,
    Connecting {
        generation: u64,
        abort: CancellationToken,
    },
    Up(Live),
}

/// Mutable per-device record; always accessed under its own mutex.
pub(crate) struct Entry {
    pub(crate) id: DeviceId,
    pub(crate) display_name: String,
    pub(crate) params: ConnectParams,
    pub(crate) link: Link,
    pub(crate) lease: Option<Lease>,
    pub(crate) unavailable: bool,
    pub(crate) connect_attempts: u32,
    pub(crate) last_connect_attempt: Option<Instant>,
    pub(crate) next_attempt_at: Instant,
    /// Bumped by every connect attempt; tickets and live connections carry it.
    pub(crate) generation: u64,
}

impl Entry {
    pub(crate) fn new(spec: DeviceSpec, now: Instant) -> Self {
        Self {
            display_name: spec.display_name().to_string(),
            id: spec.id,
            params: spec.params,
            link: Link::Disconnected,
            lease: None,
            unavailable: false,
            connect_attempts: 0,
            last_connect_attempt: None,
            next_attempt_at: now,
            generation: 0,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match &self.link {
            Link::Disconnected => SessionState::Disconnected,
            Link::Connecting { .. } => SessionState::Connecting,
            Link::Up(_) if self.unavailable => SessionState::Unavailable,
            Link::Up(_) if self.lease.is_some() => SessionState::Controlled,
            Link::Up(_) => SessionState::Available,
        }
    }

    pub(crate) fn live(&self) -> Option<&Live> {
        match &self.link {
            Link::Up(live) => Some(live),
            _ => None,
        }
    }

    /// True if `caller` holds the lease.
    pub(crate) fn is_owned_by(&self, caller: &CallerId) -> bool {
        self.lease.as_ref().is_some_and(|l| &l.owner == caller)
    }

    /// True if `ticket` names the attempt currently in flight.
    pub(crate) fn is_current_attempt(&self, ticket: &ConnectTicket) -> bool {
        matches!(self.link, Link::Connecting { generation, .. } if generation == ticket.generation)
    }

    /// Detaches the connection (if any) and returns to `Disconnected`.
    ///
    /// The owner and the administrative hold are cleared. Dropping a live
    /// connection makes the session due at `now` with a fresh failure count;
    /// abandoning an in-flight attempt cancels it and keeps the count and the
    /// backoff window. The returned [`Live`] must be torn down by the caller
    /// outside the entry lock.
    pub(crate) fn detach(&mut self, now: Instant) -> Option<Live> {
        self.lease = None;
        self.unavailable = false;
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Up(live) => {
                self.connect_attempts = 0;
                self.next_attempt_at = now;
                Some(live)
            }
            Link::Connecting { abort, .. } => {
                abort.cancel();
                None
            }
            Link::Disconnected => None,
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            state,
            owner: self.lease.as_ref().map(|l| l.owner.clone()),
            last_heartbeat: self.lease.as_ref().map(|l| l.last_heartbeat),
            connect_attempts: self.connect_attempts,
            last_connect_attempt: self.last_connect_attempt,
            next_attempt_at: (state == SessionState::Disconnected).then_some(self.next_attempt_at),
            current_job: self.live().and_then(|live| live.executor.current()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Entry {
        Entry::new(DeviceSpec::new("00e20100", "Vector-A1B2"), Instant::now())
    }

    #[test]
    fn test_new_entry_is_disconnected_and_due() {
        let e = entry();
        let snap = e.snapshot();
        assert_eq!(snap.state, SessionState::Disconnected);
        assert_eq!(snap.display_name, "Vector-A1B2");
        assert_eq!(snap.owner, None);
        assert_eq!(snap.next_attempt_at, Some(e.next_attempt_at));
    }

    #[test]
    fn test_connecting_has_no_retry_instant() {
        let mut e = entry();
        e.link = Link::Connecting {
            generation: 1,
            abort: CancellationToken::new(),
        };
        assert_eq!(e.state(), SessionState::Connecting);
        assert_eq!(e.snapshot().next_attempt_at, None);
    }

    #[test]
    fn test_ticket_matching() {
        let mut e = entry();
        let abort = CancellationToken::new();
        e.link = Link::Connecting {
            generation: 3,
            abort: abort.clone(),
        };
        let current = ConnectTicket {
            device: e.id.clone(),
            generation: 3,
            abort: abort.clone(),
        };
        let stale = ConnectTicket {
            device: e.id.clone(),
            generation: 2,
            abort: CancellationToken::new(),
        };
        assert!(e.is_current_attempt(&current));
        assert!(!e.is_current_attempt(&stale));

        assert!(e.detach(Instant::now()).is_none());
        assert!(!e.is_current_attempt(&current));
        assert!(abort.is_cancelled());
    }

    #[test]
    fn test_detach_while_connecting_keeps_backoff() {
        let mut e = entry();
        let later = Instant::now() + std::time::Duration::from_secs(120);
        e.connect_attempts = 6;
        e.next_attempt_at = later;
        e.link = Link::Connecting {
            generation: 7,
            abort: CancellationToken::new(),
        };

        assert!(e.detach(Instant::now()).is_none());
        assert_eq!(e.state(), SessionState::Disconnected);
        assert_eq!(e.connect_attempts, 6);
        assert_eq!(e.next_attempt_at, later);
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(SessionState::Controlled.as_label(), "controlled");
        assert!(SessionState::Unavailable.is_connected());
        assert!(!SessionState::Connecting.is_connected());
    }
}

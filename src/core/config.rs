//! # Global runtime configuration.
//!
//! Provides [`BrokerConfig`], the centralized settings for the broker runtime.
//!
//! ## Sentinel values
//! - `connect_timeout = 0s` → connect attempts are not bounded
//! - `grace = 0s` → shutdown does not wait for teardown at all

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for the broker runtime.
///
/// ## Field semantics
/// - `heartbeat_timeout`: a lease whose owner stayed silent for longer than this is reclaimed
/// - `heartbeat_interval`: period of the heartbeat monitor sweep
/// - `reconnect_interval`: period of the reconnection scheduler sweep
/// - `backoff`: reconnect windows after failed connects
/// - `connect_timeout`: bound on a single connect attempt (`0s` = unbounded)
/// - `cancel_grace`: how long an executor waits for a cancelled job to stop
/// - `grace`: how long shutdown waits for all sessions to tear down
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
///
/// The defaults reproduce the historical fixed values (10s heartbeat, 5s
/// sweeps, 30s/120s reconnect windows); all of them are tunable.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Maximum owner silence before the lease is reclaimed.
    ///
    /// Expiry is strict: a lease silent for exactly `heartbeat_timeout` survives.
    pub heartbeat_timeout: Duration,

    /// Heartbeat monitor sweep period.
    pub heartbeat_interval: Duration,

    /// Reconnection scheduler sweep period.
    pub reconnect_interval: Duration,

    /// Reconnect backoff windows.
    pub backoff: BackoffPolicy,

    /// Upper bound for one connect attempt.
    ///
    /// - `Duration::ZERO` = no bound (a hanging connector keeps the session in `Connecting`)
    /// - `> 0` = the attempt fails with `ConnectionError::Timeout`
    pub connect_timeout: Duration,

    /// How long an executor waits for a cancelled job to acknowledge before abandoning it.
    pub cancel_grace: Duration,

    /// Maximum time to wait for session teardown during shutdown.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl BrokerConfig {
    /// Returns the connect timeout as an `Option` (`None` → unbounded).
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout == Duration::ZERO {
            None
        } else {
            Some(self.connect_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for BrokerConfig {
    /// Default configuration:
    ///
    /// - `heartbeat_timeout = 10s`
    /// - `heartbeat_interval = 5s`, `reconnect_interval = 5s`
    /// - `backoff = BackoffPolicy::default()` (30s ×5, then 120s)
    /// - `connect_timeout = 60s`
    /// - `cancel_grace = 5s`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(5),
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
        }
    }
}

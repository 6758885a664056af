//! # Reconnect backoff policy.
//!
//! [`BackoffPolicy`] decides how long a disconnected device must wait before
//! the scheduler may try it again. It is two-tiered:
//! - after failures `1..=fast_attempts` the wait is [`BackoffPolicy::fast`];
//! - after more failures the wait is [`BackoffPolicy::slow`].
//!
//! The window is a floor: jitter may lengthen it, never shorten it. A successful
//! connect resets the failure count, so the next outage starts in the fast tier.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use leasevisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::default();
//!
//! assert_eq!(backoff.window(0), Duration::ZERO);
//! assert_eq!(backoff.window(1), Duration::from_secs(30));
//! assert_eq!(backoff.window(5), Duration::from_secs(30));
//! assert_eq!(backoff.window(6), Duration::from_secs(120));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Minimum wait after each of the first `fast_attempts` consecutive failures.
    pub fast: Duration,
    /// Number of consecutive failures that stay in the fast tier.
    pub fast_attempts: u32,
    /// Minimum wait after every further failure.
    pub slow: Duration,
    /// Extra randomized delay to spread reconnects of many devices.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `fast = 30s` for failures 1..=5;
    /// - `slow = 120s` afterwards;
    /// - no jitter.
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(30),
            fast_attempts: 5,
            slow: Duration::from_secs(120),
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Returns the minimum wait after `failures` consecutive failed connects.
    ///
    /// `0` failures means the device has never failed since its last success
    /// (or was never tried) and may be tried immediately.
    pub fn window(&self, failures: u32) -> Duration {
        match failures {
            0 => Duration::ZERO,
            n if n <= self.fast_attempts => self.fast,
            _ => self.slow,
        }
    }

    /// Returns the wait to apply after `failures` consecutive failures,
    /// including jitter. Never less than [`BackoffPolicy::window`].
    pub fn next(&self, failures: u32) -> Duration {
        let window = self.window(failures);
        window + self.jitter.extra(window)
    }
}

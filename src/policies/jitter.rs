//! # Jitter policy for reconnect windows.
//!
//! [`JitterPolicy`] adds randomness on top of a backoff window so that many
//! devices dropped by the same network blip do not all retry in the same sweep.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable windows
//! - [`JitterPolicy::Proportional`]: extra delay in `[0, window × percent / 100]`
//!
//! Jitter only ever adds to the window.

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of reconnect windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact window.
    #[default]
    None,

    /// Random extra delay up to `percent`% of the window.
    Proportional {
        /// Upper bound of the extra delay, as a percentage of the window.
        percent: u8,
    },
}

impl JitterPolicy {
    /// Returns the extra delay to add on top of `window`.
    pub fn extra(&self, window: Duration) -> Duration {
        match *self {
            JitterPolicy::None => Duration::ZERO,
            JitterPolicy::Proportional { percent } => {
                let ms = window.as_millis().min(u128::from(u64::MAX)) as u64;
                let upper = ms.saturating_mul(u64::from(percent)) / 100;
                if upper == 0 {
                    return Duration::ZERO;
                }
                let mut rng = rand::rng();
                Duration::from_millis(rng.random_range(0..=upper))
            }
        }
    }
}

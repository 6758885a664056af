//! # Control-loss watcher.
//!
//! One watcher task per live connection. It waits for the first of:
//! - the connection reporting loss of control → registry tears the session down;
//! - its token being cancelled → the session was torn down some other way.
//!
//! The watcher carries the connection's generation number, so a notification
//! that arrives after the device reconnected is ignored by the registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::registry::SessionRegistry;
use crate::device::{ConnectionRef, DeviceId};

/// Spawns the watcher for `connection`.
pub(crate) fn arm(
    registry: Arc<SessionRegistry>,
    device: DeviceId,
    generation: u64,
    connection: ConnectionRef,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = connection.control_lost() => {
                registry.on_control_lost(&device, generation).await;
            }
        }
    });
}

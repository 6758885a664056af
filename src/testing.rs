//! Test doubles shared by the inline test modules.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::device::{
    Command, ConnectParams, Connection, ConnectionRef, Connector, DeviceId, SensorSnapshot,
};
use crate::error::ConnectionError;
use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that keeps every event it sees.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// In-memory connection: logs dispatched commands, loses control on demand.
pub(crate) struct MockConnection {
    dispatched: Mutex<Vec<String>>,
    lost: CancellationToken,
    disconnects: AtomicUsize,
    command_delay: Duration,
}

impl MockConnection {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every dispatch takes `command_delay` before answering.
    pub(crate) fn with_delay(command_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            dispatched: Mutex::new(Vec::new()),
            lost: CancellationToken::new(),
            disconnects: AtomicUsize::new(0),
            command_delay,
        })
    }

    pub(crate) fn lose_control(&self) {
        self.lost.cancel();
    }

    pub(crate) fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn dispatch(&self, command: Command) -> Result<serde_json::Value, ConnectionError> {
        if !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }
        self.dispatched.lock().unwrap().push(command.name.clone());
        if command.name == "fail" {
            return Err(ConnectionError::Command {
                command: command.name,
                reason: "rejected".into(),
            });
        }
        Ok(serde_json::json!({ "ok": true }))
    }

    fn read_sensors(&self) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::new();
        snapshot.insert("battery_volts".into(), serde_json::json!(3.9));
        snapshot.insert("is_on_charger".into(), serde_json::json!(false));
        snapshot
    }

    async fn control_lost(&self) {
        self.lost.cancelled().await
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted outcome of one connect call.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Step {
    Succeed,
    Fail,
    Hang,
}

/// Connector that follows a script; succeeds once the script runs out.
#[derive(Default)]
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<DeviceId>>,
    opened: Mutex<Vec<Arc<MockConnection>>>,
    hanging: AtomicUsize,
}

/// Counts a hanging connect until its future is dropped.
struct HangGuard<'a>(&'a AtomicUsize);

impl Drop for HangGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockConnector {
    pub(crate) fn scripted(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<DeviceId> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn opened(&self) -> Vec<Arc<MockConnection>> {
        self.opened.lock().unwrap().clone()
    }

    /// Connect calls currently stuck in a `Hang` step.
    pub(crate) fn hanging(&self) -> usize {
        self.hanging.load(Ordering::SeqCst)
    }

    pub(crate) fn last_opened(&self) -> Arc<MockConnection> {
        self.opened().pop().expect("no connection opened yet")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        id: &DeviceId,
        _params: &ConnectParams,
    ) -> Result<ConnectionRef, ConnectionError> {
        self.calls.lock().unwrap().push(id.clone());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {
                let conn = MockConnection::new();
                self.opened.lock().unwrap().push(conn.clone());
                Ok(conn as ConnectionRef)
            }
            Step::Fail => Err(ConnectionError::Unreachable {
                reason: "no route to device".into(),
            }),
            Step::Hang => {
                self.hanging.fetch_add(1, Ordering::SeqCst);
                let _guard = HangGuard(&self.hanging);
                std::future::pending().await
            }
        }
    }
}

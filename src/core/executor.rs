//! # TaskExecutor: single-flight action runner for one device.
//!
//! Each connected device owns one executor. The executor is a dedicated tokio
//! task (the *loop*) fed by an unbounded inbox; callers never run actions
//! themselves, they only submit them.
//!
//! ## Architecture
//! ```text
//! submit(action) ──► JobHandle (returned immediately)
//!        │
//!        ▼
//!   [inbox] ──► loop {
//!                 ├─► take the newest queued job (older ones → Cancelled "superseded")
//!                 ├─► publish JobStarted
//!                 ├─► select! {
//!                 │     job finished      → resolve, publish terminal event
//!                 │     newer submission  → cancel job, wait ≤ cancel_grace, next = newer
//!                 │     stop requested    → cancel job, wait ≤ cancel_grace, exit
//!                 │   }
//!                 └─► a job still running after cancel_grace is dropped → Cancelled "forced"
//!               }
//! ```
//!
//! ## Rules
//! - At most **one** job runs per executor at any instant.
//! - Last request wins: a burst of submissions runs only the newest one.
//! - A superseded job is always cancelled **before** the next one starts.
//! - After [`TaskExecutor::stop`], every queued or running job resolves and
//!   new submissions fail with [`BrokerError::ExecutorClosed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionRef;
use crate::core::job::{Job, JobHandle, JobOutcome};
use crate::core::runner::{self, LoopEnv};
use crate::device::{ConnectionRef, DeviceId};
use crate::error::BrokerError;
use crate::events::Bus;

/// Why the loop interrupted a running job.
enum Interrupt {
    Superseded(Job),
    Stop,
}

/// Per-device, last-request-wins job runner.
pub struct TaskExecutor {
    device: DeviceId,
    inbox: mpsc::UnboundedSender<Job>,
    current: Mutex<Option<JobHandle>>,
    next_id: AtomicU64,
    stop: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
    cancel_grace: Duration,
}

impl TaskExecutor {
    /// Spawns the execution loop for `device` on the current runtime.
    pub(crate) fn spawn(
        device: DeviceId,
        connection: ConnectionRef,
        bus: Bus,
        cancel_grace: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let env = LoopEnv {
            device: device.clone(),
            connection,
            bus,
            cancel_grace,
        };
        let join = tokio::spawn(run_loop(rx, env, stop.clone()));

        Self {
            device,
            inbox: tx,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stop,
            join: Mutex::new(Some(join)),
            cancel_grace,
        }
    }

    /// Device this executor runs jobs for.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Queues `action`, superseding whatever runs or waits now.
    ///
    /// Returns immediately; the handle resolves once the job finishes or is
    /// superseded.
    pub fn submit(&self, action: ActionRef) -> Result<JobHandle, BrokerError> {
        if self.stop.is_cancelled() {
            return Err(BrokerError::ExecutorClosed {
                id: self.device.clone(),
            });
        }

        // Held across the send so `current` always names the newest queued job.
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (job, handle) = Job::new(id, action);
        if self.inbox.send(job).is_err() {
            return Err(BrokerError::ExecutorClosed {
                id: self.device.clone(),
            });
        }
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Handle of the most recently submitted job, if any.
    pub fn current(&self) -> Option<JobHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits up to `timeout` for the most recently submitted job.
    ///
    /// Returns `None` if there is no job or it is still running at the deadline.
    pub async fn wait(&self, timeout: Duration) -> Option<JobOutcome> {
        let handle = self.current()?;
        handle.wait(timeout).await
    }

    /// True once [`TaskExecutor::stop`] was requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Cancels the running job, resolves queued ones and joins the loop.
    ///
    /// Bounded: a loop that does not finish within twice the cancel grace is aborted.
    pub async fn stop(&self) {
        self.stop.cancel();
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut join) = join else {
            return;
        };

        let bound = self.cancel_grace.saturating_mul(2) + Duration::from_millis(100);
        if time::timeout(bound, &mut join).await.is_err() {
            tracing::warn!(
                device_id = %self.device,
                "executor loop did not stop in time; aborting"
            );
            join.abort();
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Execution loop: one job at a time, newest submission wins.
async fn run_loop(mut inbox: mpsc::UnboundedReceiver<Job>, env: LoopEnv, stop: CancellationToken) {
    let mut next: Option<Job> = None;

    loop {
        let job = match next.take() {
            Some(job) => job,
            None => tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                msg = inbox.recv() => match msg {
                    Some(job) => job,
                    None => break,
                },
            },
        };
        let job = newest(job, &mut inbox, &env);
        if stop.is_cancelled() {
            runner::finish(&env, job, JobOutcome::Cancelled, Some("stopped"));
            break;
        }

        runner::publish_started(&env, &job);
        let fut = runner::run_once(job.action.clone(), env.context(&job));
        tokio::pin!(fut);

        let interrupt = tokio::select! {
            res = &mut fut => {
                let outcome = runner::outcome_of(&res, false);
                runner::finish(&env, job, outcome, None);
                continue;
            }
            msg = inbox.recv() => match msg {
                Some(newer) => Interrupt::Superseded(newer),
                None => Interrupt::Stop,
            },
            _ = stop.cancelled() => Interrupt::Stop,
        };

        let reason = match interrupt {
            Interrupt::Superseded(_) => "superseded",
            Interrupt::Stop => "stopped",
        };
        job.token.cancel();
        match time::timeout(env.cancel_grace, &mut fut).await {
            Ok(res) => {
                let outcome = runner::outcome_of(&res, true);
                runner::finish(&env, job, outcome, Some(reason));
            }
            Err(_) => {
                tracing::warn!(
                    device_id = %env.device,
                    job_id = job.id,
                    grace_ms = env.cancel_grace.as_millis() as u64,
                    "job ignored cancellation; abandoning it"
                );
                runner::finish(&env, job, JobOutcome::Cancelled, Some("forced"));
            }
        }

        match interrupt {
            Interrupt::Superseded(newer) => next = Some(newer),
            Interrupt::Stop => break,
        }
    }

    inbox.close();
    if let Some(job) = next {
        runner::finish(&env, job, JobOutcome::Cancelled, Some("stopped"));
    }
    while let Ok(job) = inbox.try_recv() {
        runner::finish(&env, job, JobOutcome::Cancelled, Some("stopped"));
    }
}

/// Drains every queued job, keeping only the newest; the rest resolve as superseded.
fn newest(mut job: Job, inbox: &mut mpsc::UnboundedReceiver<Job>, env: &LoopEnv) -> Job {
    while let Ok(newer) = inbox.try_recv() {
        let older = std::mem::replace(&mut job, newer);
        runner::finish(env, older, JobOutcome::Cancelled, Some("superseded"));
    }
    job
}

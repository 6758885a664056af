//! # Jobs: one submitted action and its completion signal.
//!
//! Every submission produces a [`JobHandle`] immediately. The execution loop
//! resolves the job exactly once with a [`JobOutcome`]; waiters block on a
//! `watch` channel rather than polling.
//!
//! ## Rules
//! - A job resolves **exactly once**.
//! - A job dropped without being resolved (loop aborted, executor gone)
//!   resolves as [`JobOutcome::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionRef;

/// Terminal outcome of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The action ran to completion.
    Success,
    /// The action failed or panicked; the message is kept for the caller.
    Error(String),
    /// The job was superseded, or the executor stopped, before it completed.
    Cancelled,
}

impl JobOutcome {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobOutcome::Success => "job_success",
            JobOutcome::Error(_) => "job_error",
            JobOutcome::Cancelled => "job_cancelled",
        }
    }
}

/// Caller-side handle to a submitted job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    id: u64,
    name: Arc<str>,
    rx: watch::Receiver<Option<JobOutcome>>,
}

impl JobHandle {
    /// Per-executor job number (starts at 1).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the outcome if the job already resolved.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.rx.borrow().clone()
    }

    /// Waits up to `timeout` for the outcome.
    ///
    /// Returns `None` if the job is still running when the timeout elapses.
    pub async fn wait(&self, timeout: Duration) -> Option<JobOutcome> {
        let mut rx = self.rx.clone();
        let resolved = async move {
            match rx.wait_for(Option::is_some).await {
                Ok(outcome) => (*outcome).clone(),
                Err(_) => Some(JobOutcome::Cancelled),
            }
        };
        tokio::time::timeout(timeout, resolved).await.ok().flatten()
    }
}

/// Resolver side of a job; resolves `Cancelled` on drop if never resolved.
pub(crate) struct Completion {
    tx: watch::Sender<Option<JobOutcome>>,
}

impl Completion {
    /// Resolves the job. Later calls are ignored.
    pub(crate) fn resolve(&self, outcome: JobOutcome) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.resolve(JobOutcome::Cancelled);
    }
}

/// A job travelling through the executor's inbox.
pub(crate) struct Job {
    pub(crate) id: u64,
    pub(crate) action: ActionRef,
    pub(crate) token: CancellationToken,
    pub(crate) completion: Completion,
}

impl Job {
    /// Creates a job and the handle returned to the submitter.
    pub(crate) fn new(id: u64, action: ActionRef) -> (Self, JobHandle) {
        let (tx, rx) = watch::channel(None);
        let handle = JobHandle {
            id,
            name: Arc::from(action.name()),
            rx,
        };
        let job = Self {
            id,
            action,
            token: CancellationToken::new(),
            completion: Completion { tx },
        };
        (job, handle)
    }

    pub(crate) fn name(&self) -> &str {
        self.action.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionFn, JobContext};
    use crate::error::ActionError;

    fn noop() -> ActionRef {
        ActionFn::arc("noop", |_ctx: JobContext| async { Ok::<(), ActionError>(()) })
    }

    #[tokio::test]
    async fn test_resolves_once() {
        let (job, handle) = Job::new(1, noop());
        job.completion.resolve(JobOutcome::Success);
        job.completion.resolve(JobOutcome::Error("late".into()));

        assert_eq!(handle.outcome(), Some(JobOutcome::Success));
        assert_eq!(
            handle.wait(Duration::from_millis(10)).await,
            Some(JobOutcome::Success)
        );
    }

    #[tokio::test]
    async fn test_dropped_job_resolves_cancelled() {
        let (job, handle) = Job::new(1, noop());
        drop(job);
        assert_eq!(handle.outcome(), Some(JobOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_on_pending_job() {
        let (_job, handle) = Job::new(1, noop());
        assert_eq!(handle.wait(Duration::from_secs(1)).await, None);
        assert_eq!(handle.name(), "noop");
        assert_eq!(handle.id(), 1);
    }
}

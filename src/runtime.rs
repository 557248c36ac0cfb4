//! Job runtime abstraction
//!
//! Project jobs are plain futures handed to a [`JobRuntime`]. The coordinator
//! only keeps the returned [`JobHandle`], which it uses to cancel the job
//! cooperatively. Tests substitute a runtime that records jobs instead of
//! running them.

use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

/// Boxed job future as accepted by a runtime
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a spawned project job
#[derive(Debug)]
pub struct JobHandle {
    name: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self {
            name: name.into(),
            cancel,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the job to stop at its next safe point
    pub fn cancel(&self) {
        debug!("Cancelling job {}", self.name);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the underlying task has ended; handles without a task never finish
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Wait for the underlying task to end
    pub async fn join(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!("Job {} ended abnormally: {}", self.name, e);
            }
        }
    }
}

/// Trait for hosts of project jobs
pub trait JobRuntime: Send + Sync {
    /// Start `job`; the job is expected to observe `cancel` at its safe points
    fn spawn(&self, name: &str, cancel: CancellationToken, job: JobFuture) -> JobHandle;
}

/// Runtime spawning every job as a tokio task
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioJobRuntime;

impl JobRuntime for TokioJobRuntime {
    fn spawn(&self, name: &str, cancel: CancellationToken, job: JobFuture) -> JobHandle {
        let span = info_span!("project_job", job = %name);
        let task = tokio::spawn(job.instrument(span));
        JobHandle::new(name, cancel, Some(task))
    }
}

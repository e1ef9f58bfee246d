//! Fire-and-forget background work.
//!
//! Components that trigger asynchronous work take an `Arc<dyn JobQueue>` and never learn how
//! (or whether) the job runs. Job failures are logged, never reported back to the submitter.

use std::panic::{catch_unwind, AssertUnwindSafe};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait JobQueue: Send + Sync {
    /// Schedule `job`. `name` is used for logging only.
    fn submit(&self, name: &str, job: Job);
}

/// Runs every job immediately on the submitting thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineJobQueue;

impl JobQueue for InlineJobQueue {
    fn submit(&self, name: &str, job: Job) {
        log::debug!("running job {name} inline");
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            log::warn!("job {name} panicked");
        }
    }
}

/// Runs jobs on the blocking pool of a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioJobQueue {
    handle: tokio::runtime::Handle,
}

impl TokioJobQueue {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Queue onto the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl JobQueue for TokioJobQueue {
    fn submit(&self, name: &str, job: Job) {
        let name = name.to_string();
        log::debug!("queueing job {name}");
        let task = self.handle.spawn_blocking(job);
        self.handle.spawn(async move {
            if let Err(err) = task.await {
                log::warn!("job {name} failed: {err}");
            }
        });
    }
}

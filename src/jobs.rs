// ============================================================================
// JOB RUNNERS: where background work (fetch, bake, decode) executes
// ============================================================================
//
// Every job reports back over an mpsc channel that the session drains in
// `poll()`, so the runner only decides *where* and *when* a closure runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait JobRunner: Send + Sync {
    fn spawn(&self, job: Job);
}

/// Runs jobs on rayon's global thread pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayonRunner;

impl JobRunner for RayonRunner {
    fn spawn(&self, job: Job) {
        rayon::spawn(move || {
            let _ = catch_panic("background job", job);
        });
    }
}

/// Run `f`, turning a panic into `Err(message)`. Jobs wrap their work in this
/// so a panic still sends a failure back over the channel.
pub fn catch_panic<T>(what: &str, f: impl FnOnce() -> T) -> Result<T, String> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|panic| {
        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        crate::log_err!("{} panicked: {}", what, msg);
        format!("{} panicked: {}", what, msg)
    })
}

/// Runs each job immediately on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineRunner;

impl JobRunner for InlineRunner {
    fn spawn(&self, job: Job) {
        job();
    }
}

/// Holds jobs until the host pumps them. Clones share one queue, so a host
/// can hand a clone to the session and keep one to drive it.
#[derive(Clone, Default)]
pub struct QueuedRunner {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl QueuedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run the oldest queued job. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        let job = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run the most recently queued job, letting hosts complete work out of
    /// submission order.
    pub fn run_newest(&self) -> bool {
        let job = self.queue.lock().ok().and_then(|mut q| q.pop_back());
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run queued jobs until empty, including jobs queued by those jobs.
    /// Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl JobRunner for QueuedRunner {
    fn spawn(&self, job: Job) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(job);
        }
    }
}

impl std::fmt::Debug for QueuedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRunner")
            .field("pending", &self.pending())
            .finish()
    }
}

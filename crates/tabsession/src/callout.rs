//! Serialized callout queue: at most one field callout runs at a time.
//!
//! Shared by `Arc` with whoever needs to observe it; there is no process-wide
//! instance.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalloutState {
    pub is_running: bool,
    pub queue_length: usize,
}

#[derive(Default)]
struct QueueInner {
    jobs: VecDeque<(String, Job)>,
    running: Option<String>,
}

#[derive(Default)]
pub struct CalloutQueue {
    inner: Mutex<QueueInner>,
}

// Clears the running slot even if the job panics.
struct RunningGuard<'a> {
    queue: &'a CalloutQueue,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.queue.lock().running = None;
    }
}

impl CalloutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // The queue holds no invariant a panicking holder could break halfway, so
    // a poisoned lock is recovered instead of dropping jobs or state.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("callout queue lock was poisoned; recovering");
            self.inner.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn enqueue(&self, name: impl Into<String>, job: impl FnOnce() + Send + 'static) {
        self.lock().jobs.push_back((name.into(), Box::new(job)));
    }

    pub fn state(&self) -> CalloutState {
        let g = self.lock();
        CalloutState {
            is_running: g.running.is_some(),
            queue_length: g.jobs.len(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    /// Run the next job on the calling thread. Returns false when the queue
    /// is empty or another job is already running.
    pub fn run_next(&self) -> bool {
        let (name, job) = {
            let mut g = self.lock();
            if g.running.is_some() {
                return false;
            }
            let Some((name, job)) = g.jobs.pop_front() else {
                return false;
            };
            g.running = Some(name.clone());
            (name, job)
        };
        let _guard = RunningGuard { queue: self };
        debug!(callout = %name, "running callout");
        job();
        true
    }

    /// Run queued jobs until the queue is empty; returns how many ran.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while self.run_next() {
            n += 1;
        }
        n
    }
}

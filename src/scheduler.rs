//! Single-threaded deadline scheduler.
//!
//! One thread sleeps on a min-heap of `(deadline, task)` entries and runs
//! each task on or after its deadline, popping one entry at a time and
//! releasing the lock around execution so `schedule` and `clear` never
//! block behind a running task. Tasks run in deadline order; entries with
//! equal deadlines run in unspecified order.

use crate::task::{Job, Task, TaskHandle};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Sleep bound while the heap is empty; any `schedule` wakes the thread.
const IDLE_WAIT: Duration = Duration::from_secs(60 * 60 * 24);

struct SchedEntry {
    at: Instant,
    task: Task,
}

impl PartialEq for SchedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for SchedEntry {}

impl PartialOrd for SchedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchedEntry {
    // Reversed so the earliest deadline sits on top of the max-heap.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at)
    }
}

struct SchedShared {
    queue: BinaryHeap<SchedEntry>,
    stopped: bool,
}

struct SchedInner {
    shared: Mutex<SchedShared>,
    cv: Condvar,
}

impl SchedInner {
    fn lock(&self) -> MutexGuard<'_, SchedShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs submitted tasks at their deadlines on a dedicated thread.
///
/// Dropping the scheduler abandons every pending entry and joins the
/// thread; a task already executing finishes first.
pub struct Scheduler {
    inner: Arc<SchedInner>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the scheduler thread.
    pub fn new() -> Self {
        let inner = Arc::new(SchedInner {
            shared: Mutex::new(SchedShared {
                queue: BinaryHeap::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
        });
        let inner2 = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("tauline-scheduler".to_string())
            .spawn(move || run(&inner2))
            .expect("failed to spawn scheduler thread");
        Self {
            inner,
            thread: Some(thread),
        }
    }

    /// Run `work` at or after `at`.
    pub fn schedule_at<F>(&self, at: Instant, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_job_at(at, Job::new(work))
    }

    /// Run `work` after `delay` from now.
    pub fn schedule_after<F>(&self, delay: Duration, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let at = now.checked_add(delay).unwrap_or(now);
        self.schedule_job_at(at, Job::new(work))
    }

    /// Run a [`Job`] at or after `at`.
    pub fn schedule_job_at(&self, at: Instant, job: Job) -> TaskHandle {
        let (task, handle) = job.into_task();
        let mut shared = self.inner.lock();
        shared.queue.push(SchedEntry { at, task });
        self.inner.cv.notify_all();
        drop(shared);
        handle
    }

    /// Entries waiting for their deadline.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Abandon every pending entry. A task already executing finishes.
    pub fn clear(&self) {
        let drained: Vec<SchedEntry> = {
            let mut shared = self.inner.lock();
            shared.queue.drain().collect()
        };
        debug!(abandoned = drained.len(), "scheduler cleared");
        for entry in drained {
            entry.task.abandon();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let drained: Vec<SchedEntry> = {
            let mut shared = self.inner.lock();
            shared.stopped = true;
            shared.queue.drain().collect()
        };
        self.inner.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        for entry in drained {
            entry.task.abandon();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

fn run(inner: &SchedInner) {
    let mut shared = inner.lock();
    loop {
        let now = Instant::now();
        let due = matches!(shared.queue.peek(), Some(entry) if entry.at <= now);
        if due {
            if let Some(entry) = shared.queue.pop() {
                drop(shared);
                entry.task.execute();
                shared = inner.lock();
            }
            continue;
        }
        if shared.stopped {
            return;
        }
        let wait = shared
            .queue
            .peek()
            .map(|entry| entry.at.saturating_duration_since(now))
            .unwrap_or(IDLE_WAIT);
        let (guard, _) = inner
            .cv
            .wait_timeout(shared, wait)
            .unwrap_or_else(PoisonError::into_inner);
        shared = guard;
    }
}

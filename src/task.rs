//! Task and completion primitives shared by the worker pool and the
//! deadline scheduler.
//!
//! A task is a boxed closure plus a completion record. The completion is the
//! caller-facing half: it resolves exactly once to [`TaskOutcome::Completed`],
//! [`TaskOutcome::Panicked`] (the panic is caught inside the executing
//! worker and never unwinds into the pool) or [`TaskOutcome::Abandoned`]
//! (the task was cancelled before it could run).

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Terminal (or pending) state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task has not run yet.
    Pending,
    /// The task ran to completion.
    Completed,
    /// The task panicked; the panic was caught by the executing worker.
    Panicked,
    /// The task will never run (pool/scheduler cleared or dropped).
    Abandoned,
}

/// Single-shot completion record behind a mutex + condvar.
pub(crate) struct Completion {
    state: Mutex<TaskOutcome>,
    cv: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TaskOutcome::Pending),
            cv: Condvar::new(),
        }
    }

    /// First transition out of `Pending` wins; later calls are no-ops.
    pub(crate) fn set(&self, outcome: TaskOutcome) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == TaskOutcome::Pending {
            *state = outcome;
        }
        drop(state);
        self.cv.notify_all();
    }

    pub(crate) fn outcome(&self) -> TaskOutcome {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.outcome() != TaskOutcome::Pending
    }

    pub(crate) fn wait(&self) -> TaskOutcome {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == TaskOutcome::Pending {
            state = self
                .cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }

    /// Returns `false` if the timeout elapsed while still pending.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == TaskOutcome::Pending {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self
                .cv
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }
}

/// Caller-side handle to a submitted task's completion.
#[derive(Clone)]
pub struct TaskHandle {
    completion: Arc<Completion>,
}

impl TaskHandle {
    /// Block until the task resolves and return its outcome.
    pub fn wait(&self) -> TaskOutcome {
        self.completion.wait()
    }

    /// Block until the task resolves or the timeout elapses.
    ///
    /// Returns `true` if the task resolved in time.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// Whether the task has resolved.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Current outcome without blocking.
    #[must_use]
    pub fn outcome(&self) -> TaskOutcome {
        self.completion.outcome()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// A unit of work with an optional abandon hook.
///
/// The abandon hook runs exactly once if the task is cancelled (pool
/// `clear`, scheduler `clear`, or destruction) and never runs if the task
/// executes.
pub struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    on_abandon: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Job {
    /// Wrap a closure as a job.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(work),
            on_abandon: None,
        }
    }

    /// Register a hook invoked if the job is abandoned instead of executed.
    #[must_use]
    pub fn on_abandon<G>(mut self, hook: G) -> Self
    where
        G: FnOnce() + Send + 'static,
    {
        self.on_abandon = Some(Box::new(hook));
        self
    }

    pub(crate) fn into_task(self) -> (Task, TaskHandle) {
        let completion = Arc::new(Completion::new());
        let handle = TaskHandle {
            completion: Arc::clone(&completion),
        };
        let task = Task {
            work: self.work,
            on_abandon: self.on_abandon,
            completion,
        };
        (task, handle)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("on_abandon", &self.on_abandon.is_some())
            .finish()
    }
}

/// Internal executable task. Consumed by exactly one of `execute`/`abandon`.
pub(crate) struct Task {
    work: Box<dyn FnOnce() + Send + 'static>,
    on_abandon: Option<Box<dyn FnOnce() + Send + 'static>>,
    completion: Arc<Completion>,
}

impl Task {
    /// Run the task, catching panics into the completion state.
    pub(crate) fn execute(self) {
        let result = catch_unwind(AssertUnwindSafe(self.work));
        match result {
            Ok(()) => self.completion.set(TaskOutcome::Completed),
            Err(_) => self.completion.set(TaskOutcome::Panicked),
        }
    }

    /// Mark the task as never-to-run, invoking the abandon hook.
    pub(crate) fn abandon(self) {
        if let Some(hook) = self.on_abandon {
            let _ = catch_unwind(AssertUnwindSafe(hook));
        }
        self.completion.set(TaskOutcome::Abandoned);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("outcome", &self.completion.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn execute_resolves_completed() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let (task, handle) = Job::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
        })
        .into_task();
        task.execute();
        assert_eq!(handle.wait(), TaskOutcome::Completed);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panic_is_recorded_not_propagated() {
        let (task, handle) = Job::new(|| panic!("boom")).into_task();
        task.execute();
        assert_eq!(handle.outcome(), TaskOutcome::Panicked);
    }

    #[test]
    fn abandon_runs_hook_once_and_skips_work() {
        let ran = Arc::new(AtomicUsize::new(0));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let abandoned2 = Arc::clone(&abandoned);
        let (task, handle) = Job::new(move || {
            ran2.fetch_add(1, Ordering::Relaxed);
        })
        .on_abandon(move || {
            abandoned2.fetch_add(1, Ordering::Relaxed);
        })
        .into_task();
        task.abandon();
        assert_eq!(handle.outcome(), TaskOutcome::Abandoned);
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(abandoned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn wait_timeout_reports_pending() {
        let (_task, handle) = Job::new(|| {}).into_task();
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
        assert_eq!(handle.outcome(), TaskOutcome::Pending);
    }

    #[test]
    fn completion_first_transition_wins() {
        let completion = Completion::new();
        completion.set(TaskOutcome::Abandoned);
        completion.set(TaskOutcome::Completed);
        assert_eq!(completion.outcome(), TaskOutcome::Abandoned);
    }
}

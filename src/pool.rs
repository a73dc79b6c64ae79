//! Resizable worker pool with event-delayed task submission.
//!
//! Workers share one FIFO behind a mutex and condvar. The pool can grow
//! and shrink while running: shrinking asks the newest workers to stop and
//! returns a [`ResizeHandle`] that resolves once they have drained out,
//! while the pool keeps their slots in a stopped tail until they are
//! reaped by a later resize or by drop.
//!
//! A delayed task is parked on a [`CompletionSource`] and enters the FIFO
//! only when the source fires. Firing and [`WorkerPool::clear`] race for
//! each parked task through a single-shot mark; whichever claims the mark
//! owns the task, and `clear` waits out in-flight firings so no task is
//! both executed and abandoned.
//!
//! All condvar notifications happen with the pool mutex held, so a waiter
//! cannot observe the notification, drop its last reference to the pool
//! and free it while the notifier is still touching the condvar.

use crate::task::{Completion, Job, Task, TaskHandle};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Construction options for [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Prefix for worker thread names, `{prefix}-worker-{id}`.
    pub thread_name_prefix: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            thread_name_prefix: "tauline".to_string(),
        }
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    exited: Arc<Completion>,
    thread: Option<JoinHandle<()>>,
}

struct PoolShared {
    tasks: VecDeque<Task>,
    delayed: Vec<Arc<DelayedEntry>>,
    /// In-flight firings a `clear` is waiting for.
    delayed_count: usize,
    /// Live workers first, then `pending` stop-requested workers.
    workers: Vec<Worker>,
    pending: usize,
    next_worker_id: usize,
    prefix: String,
}

struct PoolInner {
    shared: Mutex<PoolShared>,
    cv: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A parked delayed task, claimed exactly once by either a source firing
/// or a pool clear.
pub(crate) struct DelayedEntry {
    mark: AtomicBool,
    task: Mutex<Option<Task>>,
    pool: Weak<PoolInner>,
}

impl DelayedEntry {
    fn take_task(&self) -> Option<Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub(crate) fn fire(self: &Arc<Self>) {
        if self.mark.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(pool) = self.pool.upgrade() else {
            if let Some(task) = self.take_task() {
                task.abandon();
            }
            return;
        };
        let mut shared = pool.lock();
        let task = self.take_task();
        if let Some(pos) = shared.delayed.iter().position(|e| Arc::ptr_eq(e, self)) {
            shared.delayed.swap_remove(pos);
            if let Some(task) = task {
                shared.tasks.push_back(task);
            }
            pool.cv.notify_one();
        } else {
            // A clear() owns the list and waits for this firing; the task
            // still goes through the FIFO so the clear can abandon it.
            if let Some(task) = task {
                shared.tasks.push_back(task);
            }
            shared.delayed_count = shared.delayed_count.saturating_sub(1);
            if shared.delayed_count == 0 {
                pool.cv.notify_all();
            }
        }
    }
}

/// One-shot event gate for delayed tasks.
///
/// Tasks submitted against a source before it fires are parked; firing
/// releases them into their pool's FIFO in submission order. Once fired the
/// source stays fired, and later submissions run immediately.
pub struct CompletionSource {
    state: Mutex<SourceState>,
}

struct SourceState {
    fired: bool,
    waiters: Vec<Arc<DelayedEntry>>,
}

impl CompletionSource {
    /// An unfired source.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                fired: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Release all parked tasks. Idempotent.
    pub fn fire(&self) {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.fired {
                return;
            }
            state.fired = true;
            mem::take(&mut state.waiters)
        };
        trace!(released = waiters.len(), "completion source fired");
        for entry in waiters {
            entry.fire();
        }
    }

    /// Whether the source has fired.
    pub fn has_fired(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fired
    }

    /// Returns `false` if the source already fired.
    fn register(&self, entry: Arc<DelayedEntry>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fired {
            return false;
        }
        state.waiters.push(entry);
        true
    }
}

impl Default for CompletionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CompletionSource")
            .field("fired", &state.fired)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Resolves when the workers retired by a [`WorkerPool::set_workers`]
/// shrink have drained out. A grow resolves immediately.
pub struct ResizeHandle {
    pending: Vec<Arc<Completion>>,
}

impl ResizeHandle {
    fn ready() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Block until every retired worker has exited.
    pub fn wait(&self) {
        for completion in &self.pending {
            completion.wait();
        }
    }

    /// Block up to `timeout`; `true` if every retired worker exited in time.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for completion in &self.pending {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return self.is_complete();
            };
            if !completion.wait_timeout(remaining) {
                return false;
            }
        }
        true
    }

    /// Whether every retired worker has exited.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.iter().all(|c| c.is_done())
    }
}

impl fmt::Debug for ResizeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizeHandle")
            .field("retiring", &self.pending.len())
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// FIFO thread pool, resizable at runtime.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start a pool with `workers` threads.
    pub fn new(workers: usize) -> Self {
        Self::with_options(workers, PoolOptions::default())
    }

    /// Start a pool with `workers` threads and explicit options.
    pub fn with_options(workers: usize, options: PoolOptions) -> Self {
        let inner = Arc::new(PoolInner {
            shared: Mutex::new(PoolShared {
                tasks: VecDeque::new(),
                delayed: Vec::new(),
                delayed_count: 0,
                workers: Vec::new(),
                pending: 0,
                next_worker_id: 0,
                prefix: options.thread_name_prefix,
            }),
            cv: Condvar::new(),
        });
        {
            let mut shared = inner.lock();
            for _ in 0..workers {
                let worker = spawn_worker(&inner, &mut shared);
                shared.workers.push(worker);
            }
        }
        debug!(workers, "worker pool started");
        Self { inner }
    }

    /// Queue a closure; returns a handle resolving when it has run.
    pub fn submit<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_job(Job::new(work))
    }

    /// Queue a [`Job`].
    pub fn submit_job(&self, job: Job) -> TaskHandle {
        let (task, handle) = job.into_task();
        let mut shared = self.inner.lock();
        shared.tasks.push_back(task);
        self.inner.cv.notify_one();
        drop(shared);
        handle
    }

    /// Park a closure until `source` fires. If the source already fired,
    /// the task enters the FIFO immediately.
    pub fn submit_delayed<F>(&self, source: &CompletionSource, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_delayed_job(source, Job::new(work))
    }

    /// Park a [`Job`] until `source` fires.
    pub fn submit_delayed_job(&self, source: &CompletionSource, job: Job) -> TaskHandle {
        let (task, handle) = job.into_task();
        let entry = Arc::new(DelayedEntry {
            mark: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
            pool: Arc::downgrade(&self.inner),
        });
        self.inner.lock().delayed.push(Arc::clone(&entry));
        if !source.register(Arc::clone(&entry)) {
            entry.fire();
        }
        handle
    }

    /// Number of live (not stop-requested) workers.
    pub fn workers(&self) -> usize {
        let shared = self.inner.lock();
        shared.workers.len() - shared.pending
    }

    /// Tasks queued and not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Resize the pool to `count` live workers.
    ///
    /// Growing reaps already-exited retired workers and spawns the
    /// difference. Shrinking stop-requests the newest live workers; they
    /// finish their current task, then exit.
    pub fn set_workers(&self, count: usize) -> ResizeHandle {
        let mut shared = self.inner.lock();
        let live = shared.workers.len() - shared.pending;
        if count >= live {
            let split = live;
            let mut tail = shared.workers.split_off(split);
            tail.retain_mut(|worker| {
                if worker.exited.is_done() {
                    if let Some(thread) = worker.thread.take() {
                        let _ = thread.join();
                    }
                    false
                } else {
                    true
                }
            });
            shared.pending = tail.len();
            for _ in live..count {
                let worker = spawn_worker(&self.inner, &mut shared);
                shared.workers.push(worker);
            }
            shared.workers.extend(tail);
            debug!(from = live, to = count, "pool grown");
            return ResizeHandle::ready();
        }
        let mut dones = Vec::with_capacity(live - count);
        for worker in &shared.workers[count..live] {
            worker.stop.store(true, Ordering::Release);
            dones.push(Arc::clone(&worker.exited));
        }
        shared.pending += live - count;
        self.inner.cv.notify_all();
        drop(shared);
        debug!(from = live, to = count, "pool shrinking");
        ResizeHandle { pending: dones }
    }

    /// Abandon every queued and parked task. Tasks already executing are
    /// not touched. Abandon hooks run on the calling thread.
    pub fn clear(&self) {
        let victims = {
            let mut shared = self.inner.lock();
            let mut victims: Vec<Task> = Vec::new();
            let delayed = mem::take(&mut shared.delayed);
            for entry in delayed {
                if entry.mark.swap(true, Ordering::AcqRel) {
                    // Firing in flight; it will surface the task in the FIFO.
                    shared.delayed_count += 1;
                } else if let Some(task) = entry.take_task() {
                    victims.push(task);
                }
            }
            while shared.delayed_count > 0 {
                shared = self
                    .inner
                    .cv
                    .wait(shared)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            victims.extend(mem::take(&mut shared.tasks));
            victims
        };
        for task in victims {
            task.abandon();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.clear();
        let workers = {
            let mut shared = self.inner.lock();
            shared.pending = 0;
            let workers = mem::take(&mut shared.workers);
            for worker in &workers {
                worker.stop.store(true, Ordering::Release);
            }
            self.inner.cv.notify_all();
            workers
        };
        for mut worker in workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        // A source firing between clear and join can still queue tasks.
        let leftovers: Vec<Task> = {
            let mut shared = self.inner.lock();
            let mut leftovers: Vec<Task> = mem::take(&mut shared.tasks).into();
            for entry in mem::take(&mut shared.delayed) {
                if !entry.mark.swap(true, Ordering::AcqRel) {
                    leftovers.extend(entry.take_task());
                }
            }
            leftovers
        };
        for task in leftovers {
            task.abandon();
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("WorkerPool")
            .field("workers", &(shared.workers.len() - shared.pending))
            .field("retiring", &shared.pending)
            .field("queued", &shared.tasks.len())
            .field("parked", &shared.delayed.len())
            .finish()
    }
}

fn spawn_worker(inner: &Arc<PoolInner>, shared: &mut PoolShared) -> Worker {
    let id = shared.next_worker_id;
    shared.next_worker_id += 1;
    let stop = Arc::new(AtomicBool::new(false));
    let exited = Arc::new(Completion::new());
    let inner2 = Arc::clone(inner);
    let stop2 = Arc::clone(&stop);
    let exited2 = Arc::clone(&exited);
    let thread = thread::Builder::new()
        .name(format!("{}-worker-{id}", shared.prefix))
        .spawn(move || worker_loop(&inner2, &stop2, &exited2))
        .expect("failed to spawn worker thread");
    Worker {
        stop,
        exited,
        thread: Some(thread),
    }
}

fn worker_loop(inner: &Arc<PoolInner>, stop: &AtomicBool, exited: &Completion) {
    let mut shared = inner.lock();
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if let Some(task) = shared.tasks.pop_front() {
            drop(shared);
            task.execute();
            shared = inner.lock();
            continue;
        }
        shared = inner
            .cv
            .wait(shared)
            .unwrap_or_else(PoisonError::into_inner);
    }
    drop(shared);
    exited.set(crate::task::TaskOutcome::Completed);
}

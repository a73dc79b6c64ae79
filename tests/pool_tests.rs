mod common;

use common::init_tracing;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tauline::{CompletionSource, Job, PoolOptions, TaskOutcome, WorkerPool};

#[test]
fn many_tasks_all_complete() {
    init_tracing();
    let pool = WorkerPool::new(4);
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..1000)
        .map(|_| {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.wait(), TaskOutcome::Completed);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1000);
}

#[test]
fn single_worker_preserves_fifo_order() {
    init_tracing();
    let pool = WorkerPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let order = Arc::clone(&order);
            pool.submit(move || {
                order.lock().unwrap().push(i);
            })
        })
        .collect();
    for handle in handles {
        handle.wait();
    }
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[test]
fn shrink_drains_then_grow_restores() {
    init_tracing();
    let pool = WorkerPool::new(4);
    assert_eq!(pool.workers(), 4);

    let resize = pool.set_workers(1);
    resize.wait();
    assert!(resize.is_complete());
    assert_eq!(pool.workers(), 1);

    // The survivor still serves the queue.
    let handle = pool.submit(|| {});
    assert_eq!(handle.wait(), TaskOutcome::Completed);

    let grow = pool.set_workers(3);
    assert!(grow.is_complete());
    assert_eq!(pool.workers(), 3);

    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..50)
        .map(|_| {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.wait(), TaskOutcome::Completed);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 50);
}

#[test]
fn shrink_to_zero_parks_the_queue() {
    init_tracing();
    let pool = WorkerPool::new(2);
    pool.set_workers(0).wait();
    assert_eq!(pool.workers(), 0);

    let handle = pool.submit(|| {});
    assert!(!handle.wait_timeout(Duration::from_millis(100)));

    pool.set_workers(1);
    assert_eq!(handle.wait(), TaskOutcome::Completed);
}

#[test]
fn fired_delayed_task_joins_fifo_after_earlier_submissions() {
    init_tracing();
    let pool = WorkerPool::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    // Keep the single worker busy so ordering is decided by the queue.
    let gate = pool.submit(|| thread::sleep(Duration::from_millis(100)));

    let source = CompletionSource::new();
    let o = Arc::clone(&order);
    let delayed = pool.submit_delayed(&source, move || {
        o.lock().unwrap().push("delayed");
    });
    let o = Arc::clone(&order);
    let direct = pool.submit(move || {
        o.lock().unwrap().push("direct");
    });
    source.fire();

    gate.wait();
    delayed.wait();
    direct.wait();
    assert_eq!(*order.lock().unwrap(), vec!["direct", "delayed"]);
}

#[test]
fn source_firing_twice_is_harmless() {
    init_tracing();
    let pool = WorkerPool::new(1);
    let source = CompletionSource::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    let handle = pool.submit_delayed(&source, move || {
        c.fetch_add(1, Ordering::Relaxed);
    });
    source.fire();
    source.fire();
    assert_eq!(handle.wait(), TaskOutcome::Completed);
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

#[test]
fn abandoned_exactly_once_on_drop() {
    init_tracing();
    let source = CompletionSource::new();
    let hooked = Arc::new(AtomicUsize::new(0));
    let handle = {
        let pool = WorkerPool::new(1);
        let h = Arc::clone(&hooked);
        pool.submit_delayed_job(
            &source,
            Job::new(|| panic!("must never run")).on_abandon(move || {
                h.fetch_add(1, Ordering::Relaxed);
            }),
        )
    };
    assert_eq!(handle.outcome(), TaskOutcome::Abandoned);
    assert_eq!(hooked.load(Ordering::Relaxed), 1);
    // Firing after the pool is gone has nothing left to release.
    source.fire();
    assert_eq!(hooked.load(Ordering::Relaxed), 1);
}

#[test]
fn clear_abandons_queued_and_parked() {
    init_tracing();
    let pool = WorkerPool::new(1);
    let started = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&started);
    let gate = pool.submit(move || {
        s.store(true, Ordering::Release);
        thread::sleep(Duration::from_millis(150));
    });
    // The gate must be executing, not merely queued, before clear runs.
    while !started.load(Ordering::Acquire) {
        thread::yield_now();
    }
    let source = CompletionSource::new();
    let parked = pool.submit_delayed(&source, || {});
    let queued = pool.submit(|| {});

    pool.clear();
    assert_eq!(parked.outcome(), TaskOutcome::Abandoned);
    assert_eq!(queued.outcome(), TaskOutcome::Abandoned);
    assert_eq!(gate.wait(), TaskOutcome::Completed);

    // The pool still works after a clear.
    let handle = pool.submit(|| {});
    assert_eq!(handle.wait(), TaskOutcome::Completed);
}

#[test]
fn thread_name_prefix_is_applied() {
    init_tracing();
    let pool = WorkerPool::with_options(
        1,
        PoolOptions {
            thread_name_prefix: "custom".to_string(),
        },
    );
    let name = Arc::new(Mutex::new(String::new()));
    let n = Arc::clone(&name);
    let handle = pool.submit(move || {
        *n.lock().unwrap() = thread::current().name().unwrap_or_default().to_string();
    });
    handle.wait();
    assert!(name.lock().unwrap().starts_with("custom-worker-"));
}

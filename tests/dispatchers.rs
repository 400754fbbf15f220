//! Dispatcher semantics: single-mode FIFO ordering, pool parallelism,
//! unconfined inlining and context switching.

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use weave::{run_blocking, run_blocking_on, DispatcherConfig, DispatcherMode, Result};

#[test]
fn single_dispatcher_runs_in_enqueue_order() {
    init_test_logging();
    let order = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&order);

    let result: Result<()> = run_blocking(move |scope| async move {
        let serial = scope.runtime().dispatcher(DispatcherConfig::single("serial"));
        let log = Arc::clone(&observer);
        scope
            .with_context(&serial, move |s| async move {
                for i in 0..8 {
                    let log = Arc::clone(&log);
                    s.launch(move |_| async move {
                        let name = std::thread::current()
                            .name()
                            .unwrap_or_default()
                            .to_string();
                        assert!(name.starts_with("serial-worker"), "ran on {name}");
                        log.lock().push(i);
                        Ok(())
                    });
                }
                Ok(())
            })
            .await
    });

    assert_eq!(result, Ok(()));
    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
}

#[test]
fn pool_dispatcher_runs_tasks_in_parallel() {
    init_test_logging();
    let start = Instant::now();

    let result: Result<()> = run_blocking(|scope| async move {
        let pool = scope.runtime().dispatcher(DispatcherConfig::pool("workers", 2));
        scope
            .with_context(&pool, |s| async move {
                for _ in 0..2 {
                    s.launch(|_| async move {
                        // Genuinely occupies a worker thread.
                        std::thread::sleep(Duration::from_millis(150));
                        Ok(())
                    });
                }
                Ok(())
            })
            .await
    });

    assert_eq!(result, Ok(()));
    // Two 150ms sleeps on two workers must overlap.
    assert_took_at_least(start, Duration::from_millis(150));
    assert_took_less_than(start, Duration::from_millis(295));
}

#[test]
fn unconfined_body_runs_inline_on_the_enqueuing_thread() {
    init_test_logging();
    let caller_thread = std::thread::current().id();

    let result: Result<()> = run_blocking(move |scope| async move {
        let unconfined = scope.runtime().dispatcher(DispatcherConfig::unconfined());
        assert_eq!(unconfined.mode(), DispatcherMode::Unconfined);
        scope
            .with_context(&unconfined, move |_| async move {
                // Up to the first suspension, an unconfined body runs
                // synchronously on whichever thread enqueued it; here that
                // is the blocked calling thread draining the caller queue.
                assert_eq!(std::thread::current().id(), caller_thread);
                Ok(())
            })
            .await
    });
    assert_eq!(result, Ok(()));
}

#[test]
fn context_switch_returns_to_the_origin_thread() {
    init_test_logging();
    let caller_thread = std::thread::current().id();

    let result = run_blocking(move |scope| async move {
        assert_eq!(std::thread::current().id(), caller_thread);
        let elsewhere = scope.runtime().dispatcher(DispatcherConfig::single("elsewhere"));
        let value = scope
            .with_context(&elsewhere, |_| async move {
                let name = std::thread::current()
                    .name()
                    .unwrap_or_default()
                    .to_string();
                assert!(name.starts_with("elsewhere-worker"), "ran on {name}");
                Ok(13)
            })
            .await?;
        // The calling task resumes on its own dispatcher afterwards.
        assert_eq!(std::thread::current().id(), caller_thread);
        Ok(value)
    });
    assert_eq!(result, Ok(13));
}

#[test]
fn run_blocking_on_places_the_root_elsewhere() {
    init_test_logging();
    let caller_thread = std::thread::current().id();

    let result = run_blocking_on(DispatcherConfig::single("rooted"), move |_| async move {
        let current = std::thread::current();
        assert_ne!(current.id(), caller_thread);
        assert!(current
            .name()
            .unwrap_or_default()
            .starts_with("rooted-worker"));
        Ok(5)
    });
    assert_eq!(result, Ok(5));
}

#[test]
fn dispatchers_have_distinct_ids_and_names() {
    init_test_logging();
    let result: Result<()> = run_blocking(|scope| async move {
        let a = scope.runtime().dispatcher(DispatcherConfig::single("a"));
        let b = scope.runtime().dispatcher(DispatcherConfig::pool("b", 3));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "a");
        assert_eq!(b.mode(), DispatcherMode::Pool { workers: 3 });
        assert_ne!(scope.dispatcher().id(), a.id());
        Ok(())
    });
    assert_eq!(result, Ok(()));
}

//! Structured join: a scope cannot report complete while any task spawned
//! within it, transitively, is still running.

mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weave::{run_blocking, Error, Result};

#[test]
fn scope_waits_for_unjoined_children() {
    init_test_logging();
    let start = Instant::now();
    let finished = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&finished);

    let result: Result<()> = run_blocking(move |scope| async move {
        // Three children, never joined explicitly. The runtime must still
        // hold the scope open until the slowest one is done.
        for millis in [200_u64, 400, 600] {
            let counter = Arc::clone(&observer);
            scope.launch(move |s| async move {
                s.delay(Duration::from_millis(millis)).await?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        Ok(())
    });

    assert_eq!(result, Ok(()));
    assert_eq!(finished.load(Ordering::SeqCst), 3);
    assert_took_at_least(start, Duration::from_millis(600));
    assert_took_less_than(start, Duration::from_secs(10));
}

#[test]
fn join_observes_terminal_subtree() {
    init_test_logging();
    let grandchild_done = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&grandchild_done);

    let result: Result<()> = run_blocking(move |scope| async move {
        let flag = Arc::clone(&observer);
        let handle = scope.launch(move |s| async move {
            // The grandchild outlives its parent's body.
            s.launch(move |s2| async move {
                s2.delay(Duration::from_millis(100)).await?;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });
        handle.join().await?;
        // Join must not return before the whole subtree is terminal.
        assert!(observer.load(Ordering::SeqCst));
        assert!(handle.is_finished());
        Ok(())
    });
    assert_eq!(result, Ok(()));
}

#[test]
fn deferred_values_flow_back() {
    init_test_logging();
    let total = run_blocking(|scope| async move {
        let a = scope.defer(|s| async move {
            s.delay(Duration::from_millis(20)).await?;
            Ok(19)
        });
        let b = scope.defer(|s| async move {
            s.yield_now().await?;
            Ok(23)
        });
        Ok(a.await_value().await? + b.await_value().await?)
    });
    assert_eq!(total, Ok(42));
}

#[test]
fn concurrent_defers_overlap_their_delays() {
    init_test_logging();
    let start = Instant::now();

    // Two deferred sleeps awaited in sequence still run concurrently, so the
    // elapsed time is one delay, not the sum of both.
    let total = run_blocking(|scope| async move {
        let a = scope.defer(|s| async move {
            s.delay(Duration::from_millis(400)).await?;
            Ok(1)
        });
        let b = scope.defer(|s| async move {
            s.delay(Duration::from_millis(400)).await?;
            Ok(2)
        });
        Ok(a.await_value().await? + b.await_value().await?)
    });

    assert_eq!(total, Ok(3));
    assert_took_at_least(start, Duration::from_millis(400));
    // Strictly below the 800ms a serialized run would need.
    assert_took_less_than(start, Duration::from_millis(750));
}

#[test]
fn nested_scope_blocks_its_caller() {
    init_test_logging();
    let result = run_blocking(|scope| async move {
        let inner_start = Instant::now();
        let value = scope
            .nested(|s| async move {
                s.launch(|s2| async move { s2.delay(Duration::from_millis(150)).await });
                Ok(5)
            })
            .await?;
        // The nested call returned, so its unjoined child must be done.
        assert_took_at_least(inner_start, Duration::from_millis(150));
        Ok(value)
    });
    assert_eq!(result, Ok(5));
}

#[test]
fn launch_failure_reraises_through_join() {
    init_test_logging();
    let result: Result<()> = run_blocking(|scope| async move {
        let handle = scope.defer(|s| async move {
            s.nested(|inner| async move {
                inner.launch(|_| async move { Err::<(), _>(Error::msg("boom")) });
                Ok(())
            })
            .await
        });
        // The failure is isolated behind `defer`, so the root survives to
        // inspect it.
        match handle.await_value().await {
            Err(Error::TaskFailed { message }) => assert_eq!(message, "boom"),
            other => panic!("expected the child failure, got {other:?}"),
        }
        Ok(())
    });
    assert_eq!(result, Ok(()));
}

#[test]
fn root_failure_escapes_run_blocking() {
    init_test_logging();
    let result: Result<()> = run_blocking(|scope| async move {
        scope.launch(|_| async move { Err::<(), _>(Error::msg("root child failed")) });
        Ok(())
    });
    assert_eq!(result, Err(Error::msg("root child failed")));
}

#[test]
fn dropped_handle_detaches_but_task_still_runs() {
    init_test_logging();
    let ran = Arc::new(AtomicBool::new(false));
    let observer = Arc::clone(&ran);

    let result: Result<()> = run_blocking(move |scope| async move {
        let flag = Arc::clone(&observer);
        drop(scope.launch(move |s| async move {
            s.delay(Duration::from_millis(50)).await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        Ok(())
    });
    assert_eq!(result, Ok(()));
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn panicking_body_becomes_a_failure() {
    init_test_logging();
    let result: Result<()> = run_blocking(|scope| async move {
        let handle = scope.defer(|_| async move {
            panic!("kaboom");
            #[allow(unreachable_code)]
            Ok(())
        });
        match handle.await_value().await {
            Err(Error::TaskFailed { message }) => {
                assert!(message.contains("kaboom"), "message was {message:?}");
            }
            other => panic!("expected panic failure, got {other:?}"),
        }
        Ok(())
    });
    assert_eq!(result, Ok(()));
}

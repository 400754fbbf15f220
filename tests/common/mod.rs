#![allow(dead_code)]
//! Shared integration test utilities.

use std::sync::Once;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Initializes tracing output for tests. Safe to call from every test;
/// only the first call installs the subscriber. Control verbosity with
/// `RUST_LOG`, e.g. `RUST_LOG=weave=trace`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Asserts a lower bound on elapsed time. Lower bounds are exact: a delay
/// of N ms must never complete in less.
pub fn assert_took_at_least(start: Instant, min: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= min,
        "finished in {elapsed:?}, expected at least {min:?}"
    );
}

/// Asserts a generous upper bound on elapsed time. Upper bounds exist to
/// catch hangs and missed wakeups, not to measure scheduling latency, so
/// they carry a lot of slack for loaded CI machines.
pub fn assert_took_less_than(start: Instant, max: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed < max,
        "finished in {elapsed:?}, expected less than {max:?}"
    );
}

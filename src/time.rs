//! Time-based suspension points.
//!
//! Both primitives here are checkpoints: they observe the scope's
//! cancellation mark before doing anything else, so a cancelled scope's
//! `delay` fails immediately instead of sleeping.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::runtime::core::RuntimeCore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Cooperative sleep until a deadline, woken by the bridge timer driver.
pub(crate) struct Delay {
    core: Arc<RuntimeCore>,
    token: CancelToken,
    deadline: Instant,
}

impl Delay {
    pub(crate) fn new(core: Arc<RuntimeCore>, token: CancelToken, deadline: Instant) -> Self {
        Self {
            core,
            token,
            deadline,
        }
    }
}

impl Future for Delay {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(error) = self.token.checkpoint() {
            return Poll::Ready(Err(error));
        }
        if Instant::now() >= self.deadline {
            return Poll::Ready(Ok(()));
        }
        // Duplicate heap entries from repolls are harmless spurious wakes.
        self.core.register_timer(self.deadline, cx.waker());
        self.token.register(cx.waker());
        Poll::Pending
    }
}

/// A single voluntary trip through the ready queue.
///
/// The first poll checkpoints, wakes itself and suspends; the dispatcher
/// then runs whatever else is queued before this task resumes.
pub(crate) struct YieldNow {
    token: CancelToken,
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self {
            token,
            yielded: false,
        }
    }
}

impl Future for YieldNow {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(error) = self.token.checkpoint() {
            return Poll::Ready(Err(error));
        }
        if self.yielded {
            Poll::Ready(Ok(()))
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(future: &mut F, waker: &Waker) -> Poll<F::Output> {
        let mut cx = Context::from_waker(waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn delay_is_pending_before_deadline_and_ready_after() {
        let core = RuntimeCore::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));

        let mut past = Delay::new(
            Arc::clone(&core),
            CancelToken::new(),
            Instant::now() - Duration::from_millis(1),
        );
        assert!(matches!(poll_once(&mut past, &waker), Poll::Ready(Ok(()))));

        let mut future_delay = Delay::new(
            Arc::clone(&core),
            CancelToken::new(),
            Instant::now() + Duration::from_secs(60),
        );
        assert!(poll_once(&mut future_delay, &waker).is_pending());
        core.teardown();
    }

    #[test]
    fn delay_fails_fast_when_cancelled() {
        let core = RuntimeCore::new();
        let token = CancelToken::new();
        token.cancel(CancelReason::timeout());
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter);

        let mut delay = Delay::new(
            Arc::clone(&core),
            token,
            Instant::now() + Duration::from_secs(60),
        );
        match poll_once(&mut delay, &waker) {
            Poll::Ready(Err(error)) => assert!(error.is_cancelled()),
            other => panic!("expected cancellation, got {other:?}"),
        }
        core.teardown();
    }

    #[test]
    fn yield_now_suspends_exactly_once() {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut fut = YieldNow::new(CancelToken::new());

        assert!(poll_once(&mut fut, &waker).is_pending());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(matches!(poll_once(&mut fut, &waker), Poll::Ready(Ok(()))));
    }
}

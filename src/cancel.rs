//! Cancellation token tree.
//!
//! Every task shares a [`CancelToken`] with its descendants: a child task
//! links a fresh token under its parent's at spawn time. Cancelling a token
//! synchronously marks every descendant token in the same call, so a
//! cooperative check anywhere in the subtree observes cancellation by
//! reading its own flag, without walking the tree.
//!
//! Once set, a token is never unset. Cancellation is advisory: nothing is
//! interrupted, tasks observe the flag at their next checkpoint. Futures
//! that park a task (delay, join, timed waits) register their waker here so
//! a cancel wakes them immediately instead of letting them sleep out.

use crate::error::{Error, Result};
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;

struct TokenState {
    reason: Option<CancelReason>,
    children: Vec<Weak<TokenInner>>,
    waiters: Vec<Waker>,
}

struct TokenInner {
    cancelled: AtomicBool,
    state: Mutex<TokenState>,
}

/// A shared cancellation flag plus reason, propagated down an ownership tree.
///
/// Cheap to clone; clones observe the same flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Creates a root token with no parent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TokenState {
                    reason: None,
                    children: Vec::new(),
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Creates a child token linked under this one.
    ///
    /// If this token is already cancelled the child starts cancelled with the
    /// same reason, preserving the subtree invariant for late arrivals.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut parent = self.inner.state.lock();
        let inherited = if self.inner.cancelled.load(Ordering::Acquire) {
            parent.reason.clone()
        } else {
            None
        };
        let child = Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(inherited.is_some()),
                state: Mutex::new(TokenState {
                    reason: inherited,
                    children: Vec::new(),
                    waiters: Vec::new(),
                }),
            }),
        };
        parent.children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Requests cancellation of this token and, synchronously, of every
    /// descendant token.
    ///
    /// Idempotent: returns true only for the call that actually set the flag.
    /// A later, more severe reason still strengthens an already-cancelled
    /// subtree; an equal or weaker one leaves it untouched.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut wakers = Vec::new();
        let mut stack = vec![Arc::clone(&self.inner)];
        let mut triggered = false;
        let mut first = true;
        while let Some(node) = stack.pop() {
            let mut state = node.state.lock();
            if node.cancelled.load(Ordering::Acquire) {
                first = false;
                let strengthened = match &mut state.reason {
                    Some(existing) => existing.strengthen(&reason),
                    None => {
                        state.reason = Some(reason.clone());
                        true
                    }
                };
                // Subtree invariant: a cancelled node's descendants are
                // already cancelled. Only a strengthened reason needs to
                // keep walking, to reach their reasons too.
                if !strengthened {
                    continue;
                }
            } else {
                state.reason = Some(reason.clone());
                node.cancelled.store(true, Ordering::Release);
                if first {
                    triggered = true;
                    first = false;
                }
            }
            wakers.append(&mut state.waiters);
            for child in &state.children {
                if let Some(child) = child.upgrade() {
                    stack.push(child);
                }
            }
        }
        // Wakers can run arbitrary scheduling work (including inline polls on
        // an unconfined dispatcher), so no token lock may be held here.
        for waker in wakers {
            waker.wake();
        }
        triggered
    }

    /// Checkpoint-free liveness probe, usable inside tight loops.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns the cancellation reason if the token is cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            self.inner.state.lock().reason.clone()
        } else {
            None
        }
    }

    /// Fails with [`Error::Cancelled`] if cancellation has been requested.
    ///
    /// Called at every suspension point and at the top of every
    /// scheduler-driven resumption.
    pub fn checkpoint(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(Error::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Registers `waker` to be woken when this token is cancelled.
    ///
    /// If the token is already cancelled the waker fires immediately.
    pub(crate) fn register(&self, waker: &Waker) {
        if self.is_cancelled() {
            waker.wake_by_ref();
            return;
        }
        let mut state = self.inner.state.lock();
        // Re-check under the lock so a concurrent cancel cannot strand us.
        if self.inner.cancelled.load(Ordering::Acquire) {
            drop(state);
            waker.wake_by_ref();
            return;
        }
        if let Some(existing) = state.waiters.iter_mut().find(|w| w.will_wake(waker)) {
            existing.clone_from(waker);
        } else {
            state.waiters.push(waker.clone());
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(token.cancel(CancelReason::user("first")));
        assert!(!token.cancel(CancelReason::user("second")));
        assert_eq!(token.reason().unwrap().message, Some("first"));
    }

    #[test]
    fn cancel_marks_entire_subtree() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(root.cancel(CancelReason::timeout()));
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason().unwrap().kind, CancelKind::Timeout);
    }

    #[test]
    fn more_severe_reason_strengthens_a_cancelled_subtree() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(root.cancel(CancelReason::user("stop")));
        // Not a fresh trigger, but the severer reason replaces the old one
        // all the way down.
        assert!(!root.cancel(CancelReason::parent_failure()));
        assert_eq!(root.reason().unwrap().kind, CancelKind::ParentFailure);
        assert_eq!(grandchild.reason().unwrap().kind, CancelKind::ParentFailure);

        // A weaker reason changes nothing.
        assert!(!child.cancel(CancelReason::user("again")));
        assert_eq!(child.reason().unwrap().kind, CancelKind::ParentFailure);
    }

    #[test]
    fn child_cancel_does_not_touch_parent() {
        let root = CancelToken::new();
        let child = root.child();
        assert!(child.cancel(CancelReason::default()));
        assert!(!root.is_cancelled());
        assert!(root.checkpoint().is_ok());
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let root = CancelToken::new();
        root.cancel(CancelReason::timeout());
        let late = root.child();
        assert!(late.is_cancelled());
        assert!(late.reason().unwrap().is_timeout());
    }

    #[test]
    fn checkpoint_reports_reason() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel(CancelReason::user("stop"));
        match token.checkpoint() {
            Err(Error::Cancelled(reason)) => assert_eq!(reason.message, Some("stop")),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    #[test]
    fn cancel_wakes_registered_waiters() {
        let token = CancelToken::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        token.register(&waker);
        token.cancel(CancelReason::default());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        // Registration after cancel fires immediately.
        token.register(&waker);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}

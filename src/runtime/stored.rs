//! Type-erased storage for suspended task bodies.
//!
//! A suspended task's continuation is its future: the compiler already
//! represents an `async` body as a resumption-point state machine with its
//! captured locals, so the runtime stores exactly that, pinned and boxed,
//! and advances it on each re-entry.

use crate::types::{Completion, TaskId};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::trace;

/// A pinned, type-erased task body owned by the task's arena slot.
///
/// The wrapped future has already routed its typed output into the handle's
/// result cell; what remains visible to the runtime is the [`Completion`].
pub(crate) struct StoredTask {
    future: Pin<Box<dyn Future<Output = Completion> + Send>>,
    task: TaskId,
    polls: u64,
}

impl StoredTask {
    /// Wraps a prepared body future for storage.
    pub(crate) fn new<F>(task: TaskId, future: F) -> Self
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            task,
            polls: 0,
        }
    }

    /// Advances the body by one poll.
    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Completion> {
        self.polls += 1;
        let result = self.future.as_mut().poll(cx);
        match &result {
            Poll::Ready(completion) => {
                trace!(task = %self.task, polls = self.polls, %completion, "task body finished");
            }
            Poll::Pending => {
                trace!(task = %self.task, polls = self.polls, "task body suspended");
            }
        }
        result
    }

    /// Number of times this body has been polled.
    #[cfg(test)]
    pub(crate) fn poll_count(&self) -> u64 {
        self.polls
    }
}

impl std::fmt::Debug for StoredTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTask")
            .field("task", &self.task)
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}

//! Handles to spawned tasks.
//!
//! A [`TaskHandle`] observes a fail-fast child; a [`Deferred`] carries an
//! isolated child's value. Both hold the child's result cell and cancel
//! token, plus the id for terminal-state probes. Task records are reaped the
//! moment a task is terminal, so "the arena no longer knows this id" is the
//! terminal test everywhere here.
//!
//! The typed result travels through the cell, never through the runtime:
//! the task table only sees type-erased completions.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::runtime::core::RuntimeCore;
use crate::runtime::task::CompletionCell;
use crate::scope::resolve_value;
use crate::types::{CancelReason, Completion, TaskId};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Write-once slot carrying a task's typed outcome to its handle.
pub(crate) struct ResultCell<T> {
    slot: Mutex<Option<Result<T>>>,
}

impl<T> ResultCell<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
        })
    }

    /// A cell born already holding `value`, for spawns refused up front.
    pub(crate) fn preset(value: Result<T>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(value)),
        })
    }

    /// Stores the outcome. The first write wins; later writes are dropped.
    pub(crate) fn set(&self, value: Result<T>) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub(crate) fn take(&self) -> Option<Result<T>> {
        self.slot.lock().take()
    }
}

/// Waits until a task's record is reaped, checkpointing the waiting scope.
pub(crate) struct JoinWait<'a> {
    core: &'a Arc<RuntimeCore>,
    id: TaskId,
    scope_token: &'a CancelToken,
}

impl<'a> JoinWait<'a> {
    pub(crate) fn new(core: &'a Arc<RuntimeCore>, id: TaskId, scope_token: &'a CancelToken) -> Self {
        Self {
            core,
            id,
            scope_token,
        }
    }
}

impl Future for JoinWait<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(error) = self.scope_token.checkpoint() {
            return Poll::Ready(Err(error));
        }
        if self.core.is_finished(self.id) {
            return Poll::Ready(Ok(()));
        }
        if self.core.register_completion_waiter(self.id, cx.waker()) {
            // Also wake on cancellation of the waiting scope.
            self.scope_token.register(cx.waker());
            Poll::Pending
        } else {
            // Lost the race; the task finished between the two checks.
            Poll::Ready(Ok(()))
        }
    }
}

/// Handle to a fail-fast child spawned with [`Scope::launch`].
///
/// Dropping the handle detaches it; the task keeps running and its failure
/// still reaches the scope through the fail-fast path.
///
/// [`Scope::launch`]: crate::scope::Scope::launch
#[must_use = "a dropped handle cannot be joined"]
pub struct TaskHandle<T> {
    pub(crate) core: Arc<RuntimeCore>,
    pub(crate) id: TaskId,
    /// The child's own token; `cancel` marks it and its subtree.
    pub(crate) token: CancelToken,
    /// Token of the scope that spawned the child, checkpointed while joining.
    pub(crate) scope_token: CancelToken,
    pub(crate) cell: Arc<ResultCell<T>>,
    pub(crate) completion: Arc<CompletionCell>,
}

impl<T> TaskHandle<T> {
    /// This task's id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task and its whole subtree are terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.is_finished(self.id)
    }

    /// Requests cancellation of the task and its descendants.
    ///
    /// Advisory: the mark is set synchronously, but the task only observes
    /// it at its next checkpoint. Returns false if already cancelled.
    pub fn cancel(&self) -> bool {
        self.token.cancel(CancelReason::new(crate::types::CancelKind::UserRequested))
    }

    /// Requests cancellation with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        self.token.cancel(reason)
    }

    /// Suspends until the task and its whole subtree are terminal.
    ///
    /// Re-raises the child's failure; a child that was merely cancelled
    /// joins cleanly. Fails with the cancellation error if the joining
    /// scope is itself cancelled while waiting.
    pub async fn join(&self) -> Result<()> {
        JoinWait::new(&self.core, self.id, &self.scope_token).await?;
        match self.completion.get() {
            Some(Completion::Failed(error)) => Err(error),
            _ => Ok(()),
        }
    }

    /// [`cancel`](Self::cancel) followed by [`join`](Self::join).
    ///
    /// Does not return before every descendant is terminal. The
    /// cancellation this handle just requested is not an error for the
    /// joiner.
    pub async fn cancel_and_join(&self) -> Result<()> {
        self.cancel();
        self.join().await
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Handle to an isolated child spawned with [`Scope::defer`], carrying its
/// future value.
///
/// Failure of an isolated child does not touch the scope; it stays latched
/// in the handle until [`await_value`](Self::await_value) observes it, and
/// is silently dropped if the handle is dropped unawaited.
///
/// [`Scope::defer`]: crate::scope::Scope::defer
#[must_use = "a dropped deferred silently discards its result"]
pub struct Deferred<T> {
    pub(crate) core: Arc<RuntimeCore>,
    pub(crate) id: TaskId,
    pub(crate) token: CancelToken,
    pub(crate) scope_token: CancelToken,
    pub(crate) cell: Arc<ResultCell<T>>,
    pub(crate) completion: Arc<CompletionCell>,
}

impl<T> Deferred<T> {
    /// This task's id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True once the task and its whole subtree are terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.is_finished(self.id)
    }

    /// Requests cancellation of the task and its descendants.
    pub fn cancel(&self) -> bool {
        self.token.cancel(CancelReason::new(crate::types::CancelKind::UserRequested))
    }

    /// Suspends until terminal, then yields the value.
    ///
    /// Re-raises the stored failure or cancellation in the caller. This is
    /// the only point where an isolated child's error escapes.
    pub async fn await_value(self) -> Result<T> {
        JoinWait::new(&self.core, self.id, &self.scope_token).await?;
        resolve_value(&self.completion, &self.cell)
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn result_cell_first_write_wins() {
        let cell = ResultCell::new();
        cell.set(Ok(1));
        cell.set(Ok(2));
        assert_eq!(cell.take(), Some(Ok(1)));
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn result_cell_keeps_errors_until_taken() {
        let cell: Arc<ResultCell<u32>> = ResultCell::new();
        cell.set(Err(Error::msg("boom")));
        assert_eq!(cell.take(), Some(Err(Error::msg("boom"))));
    }

    #[test]
    fn preset_cell_is_already_resolved() {
        let cell: Arc<ResultCell<()>> = ResultCell::preset(Err(Error::ScopeClosed));
        assert_eq!(cell.take(), Some(Err(Error::ScopeClosed)));
    }
}

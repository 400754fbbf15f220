//! Scopes: the spawning surface and structured-concurrency boundary.
//!
//! Every task body receives a [`Scope`]. Children spawned through it become
//! children of the owning task, so the task cannot finish before they do,
//! and its cancellation mark reaches them through the token tree.
//!
//! Two spawn flavors differ only in failure routing:
//!
//! - [`Scope::launch`] (fail-fast): the child's failure cancels the scope
//!   and all siblings, and the first such failure is what the scope
//!   re-raises.
//! - [`Scope::defer`] (isolated): the child's failure stays latched in its
//!   [`Deferred`] until awaited, and is dropped if never awaited.
//!
//! [`Scope::nested`], [`Scope::with_timeout`] and [`Scope::with_context`]
//! are all isolated children awaited in place; an error crossing that
//! boundary arrives as an ordinary `Err`, not as a scope teardown.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::handle::{Deferred, JoinWait, ResultCell, TaskHandle};
use crate::runtime::core::RuntimeCore;
use crate::runtime::dispatcher::{Dispatcher, DispatcherInner};
use crate::runtime::stored::StoredTask;
use crate::runtime::task::{CompletionCell, TaskKind};
use crate::runtime::RuntimeHandle;
use crate::time::{Delay, YieldNow};
use crate::types::{CancelReason, Completion, TaskId};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::debug;

/// The spawning and suspension surface handed to every task body.
///
/// Cloneable and sendable; clones refer to the same underlying task, so a
/// body can pass its scope into helper functions freely.
#[derive(Clone)]
pub struct Scope {
    pub(crate) core: Arc<RuntimeCore>,
    pub(crate) task: TaskId,
    pub(crate) token: CancelToken,
    pub(crate) dispatcher: Arc<DispatcherInner>,
}

impl Scope {
    pub(crate) fn for_task(
        core: Arc<RuntimeCore>,
        task: TaskId,
        token: CancelToken,
        dispatcher: Arc<DispatcherInner>,
    ) -> Self {
        Self {
            core,
            task,
            token,
            dispatcher,
        }
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Spawns a fail-fast child on this scope's dispatcher.
    ///
    /// The child starts eagerly. If it fails, the whole scope (and every
    /// sibling) is cancelled and the failure becomes the scope's own.
    pub fn launch<T, F>(&self, f: impl FnOnce(Scope) -> F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let spawned = self.spawn(Arc::clone(&self.dispatcher), TaskKind::FailFast, f);
        TaskHandle {
            core: Arc::clone(&self.core),
            id: spawned.id,
            token: spawned.token,
            scope_token: self.token.clone(),
            cell: spawned.cell,
            completion: spawned.completion,
        }
    }

    /// Spawns an error-isolated child on this scope's dispatcher.
    ///
    /// The child starts eagerly, like `launch`; only failure routing
    /// differs. Its error surfaces exclusively through
    /// [`Deferred::await_value`].
    pub fn defer<T, F>(&self, f: impl FnOnce(Scope) -> F) -> Deferred<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let spawned = self.spawn(Arc::clone(&self.dispatcher), TaskKind::Isolated, f);
        Deferred {
            core: Arc::clone(&self.core),
            id: spawned.id,
            token: spawned.token,
            scope_token: self.token.clone(),
            cell: spawned.cell,
            completion: spawned.completion,
        }
    }

    /// Runs `f` as a nested scope on the same dispatcher and awaits it.
    ///
    /// Failures inside the nested scope cancel the nested scope's own
    /// children, then surface here as an `Err`; this scope and its other
    /// children are untouched.
    pub async fn nested<T, F>(&self, f: impl FnOnce(Scope) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run_child(Arc::clone(&self.dispatcher), f).await
    }

    /// Runs `f` as a nested scope on `dispatcher` and awaits it.
    ///
    /// The calling task stays suspended on its own dispatcher; only the
    /// nested body (and whatever it spawns without further redirection)
    /// runs on the target.
    pub async fn with_context<T, F>(
        &self,
        dispatcher: &Dispatcher,
        f: impl FnOnce(Scope) -> F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run_child(Arc::clone(&dispatcher.inner), f).await
    }

    /// Runs `f` as a nested scope with a deadline.
    ///
    /// If the deadline fires first, the nested subtree is cancelled with a
    /// timeout reason, awaited to terminal, and
    /// [`Error::TimeoutExceeded`] is returned. A body that produced its
    /// value before observing the cancellation wins the race: the value is
    /// returned and the timeout is not reported. A body that never
    /// checkpoints never times out.
    pub async fn with_timeout<T, F>(
        &self,
        timeout: Duration,
        f: impl FnOnce(Scope) -> F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let spawned = self.spawn(Arc::clone(&self.dispatcher), TaskKind::Isolated, f);
        TimeoutWait {
            core: &self.core,
            id: spawned.id,
            scope_token: &self.token,
            child_token: &spawned.token,
            deadline,
            fired: false,
        }
        .await?;
        match spawned.completion.get() {
            // The body produced its value before observing the deadline;
            // the value wins the race.
            Some(Completion::Ok) => match spawned.cell.take() {
                Some(result) => result,
                None => Err(Error::ScopeClosed),
            },
            Some(Completion::Cancelled(reason)) if reason.is_timeout() => {
                Err(Error::TimeoutExceeded)
            }
            Some(Completion::Cancelled(reason)) => Err(Error::Cancelled(reason)),
            Some(Completion::Failed(error)) => Err(error),
            None => Err(Error::ScopeClosed),
        }
    }

    /// [`with_timeout`](Self::with_timeout) with the deadline mapped to
    /// `Ok(None)` instead of an error.
    pub async fn with_timeout_opt<T, F>(
        &self,
        timeout: Duration,
        f: impl FnOnce(Scope) -> F,
    ) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.with_timeout(timeout, f).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::TimeoutExceeded) => Ok(None),
            Err(error) => Err(error),
        }
    }

    // ------------------------------------------------------------------
    // Suspension points
    // ------------------------------------------------------------------

    /// Suspends this task for at least `duration`.
    ///
    /// A checkpoint: fails with the cancellation error if the scope is (or
    /// becomes) cancelled, without waiting out the duration.
    pub async fn delay(&self, duration: Duration) -> Result<()> {
        Delay::new(
            Arc::clone(&self.core),
            self.token.clone(),
            Instant::now() + duration,
        )
        .await
    }

    /// Yields to the dispatcher so other ready tasks can run first.
    ///
    /// Also a checkpoint.
    pub async fn yield_now(&self) -> Result<()> {
        YieldNow::new(self.token.clone()).await
    }

    /// Fails with the cancellation error if this scope is cancelled.
    ///
    /// The explicit cooperation point for compute-heavy loops.
    pub fn checkpoint(&self) -> Result<()> {
        self.token.checkpoint()
    }

    /// Checkpoint-free liveness probe, usable in tight loops.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// This scope's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// This task's id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// The dispatcher this scope's task runs on.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            inner: Arc::clone(&self.dispatcher),
        }
    }

    /// A handle to the runtime, for creating dispatchers.
    #[must_use]
    pub fn runtime(&self) -> RuntimeHandle {
        RuntimeHandle {
            core: Arc::clone(&self.core),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Allocates, installs and schedules a child task.
    ///
    /// A refused spawn (runtime shutting down, or this task already
    /// terminal) yields an invalid id and a cell preset with
    /// [`Error::ScopeClosed`]; the handle then behaves as an
    /// already-finished, failed task.
    fn spawn<T, F>(
        &self,
        dispatcher: Arc<DispatcherInner>,
        kind: TaskKind,
        f: impl FnOnce(Scope) -> F,
    ) -> Spawned<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = self.token.child();
        let (id, cell, completion) = spawn_task(
            &self.core,
            Some(self.task),
            dispatcher,
            token.clone(),
            kind,
            f,
        );
        Spawned {
            id,
            token,
            cell,
            completion,
        }
    }

    /// Spawns an isolated child and awaits its value in place.
    async fn run_child<T, F>(
        &self,
        dispatcher: Arc<DispatcherInner>,
        f: impl FnOnce(Scope) -> F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let spawned = self.spawn(dispatcher, TaskKind::Isolated, f);
        JoinWait::new(&self.core, spawned.id, &self.token).await?;
        resolve_value(&spawned.completion, &spawned.cell)
    }
}

/// Everything a handle needs to observe one spawned child.
struct Spawned<T> {
    id: TaskId,
    token: CancelToken,
    cell: Arc<ResultCell<T>>,
    completion: Arc<CompletionCell>,
}

/// Maps a terminal task's completion and typed cell to an awaited value.
///
/// The completion is authoritative: a body that returned `Ok` but whose
/// child later failed is a failed task, whatever the typed cell says.
pub(crate) fn resolve_value<T>(
    completion: &CompletionCell,
    cell: &ResultCell<T>,
) -> Result<T> {
    match completion.get() {
        Some(Completion::Failed(error)) => Err(error),
        Some(Completion::Cancelled(reason)) => Err(Error::Cancelled(reason)),
        Some(Completion::Ok) | None => match cell.take() {
            Some(result) => result,
            None => Err(Error::ScopeClosed),
        },
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("task", &self.task)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Allocates, installs and schedules one task; shared by scope spawns and
/// the bridge's root task.
///
/// A refused allocation (runtime shutting down, or the parent already
/// terminal) yields [`TaskId::invalid`] and a cell preset with
/// [`Error::ScopeClosed`]; handles over that pair behave as an
/// already-finished, failed task.
pub(crate) fn spawn_task<T, F>(
    core: &Arc<RuntimeCore>,
    parent: Option<TaskId>,
    dispatcher: Arc<DispatcherInner>,
    token: CancelToken,
    kind: TaskKind,
    f: impl FnOnce(Scope) -> F,
) -> (TaskId, Arc<ResultCell<T>>, Arc<CompletionCell>)
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let Some(id) = core.allocate(parent, Arc::clone(&dispatcher), token.clone(), kind) else {
        debug!(?parent, "spawn refused, scope closed");
        return (
            TaskId::invalid(),
            ResultCell::preset(Err(Error::ScopeClosed)),
            CompletionCell::preset(Completion::Failed(Error::ScopeClosed)),
        );
    };
    let completion = core
        .completion_of(id)
        .unwrap_or_else(|| CompletionCell::preset(Completion::Failed(Error::ScopeClosed)));
    let cell = ResultCell::new();
    let scope = Scope::for_task(Arc::clone(core), id, token.clone(), dispatcher);

    // The factory runs user code; a panic here fails the task as if its
    // body had panicked on the first poll.
    match catch_unwind(AssertUnwindSafe(|| f(scope))) {
        Ok(body) => {
            let wrapped = TaskBody {
                inner: Box::pin(body),
                cell: Arc::clone(&cell),
                token,
            };
            core.install(id, StoredTask::new(id, wrapped));
        }
        Err(panic) => {
            let error = Error::msg(format!("task panicked: {}", panic_message(&*panic)));
            cell.set(Err(error.clone()));
            core.abandon(id, Completion::Failed(error));
        }
    }
    (id, cell, completion)
}

/// Adapter from a typed user body to the runtime's erased completion.
///
/// Routes the value (or error) into the result cell and reports the
/// classified completion to the task table. On every suspension it
/// registers the task's waker with its token, which is what makes any
/// parked task resumable by a cancellation; a task found both suspended
/// and cancelled is finished as `Cancelled` right there, dropping the body
/// so its cleanup runs.
struct TaskBody<T, F> {
    inner: Pin<Box<F>>,
    cell: Arc<ResultCell<T>>,
    token: CancelToken,
}

impl<T, F> Future for TaskBody<T, F>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = Completion;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx)));
        match polled {
            Ok(Poll::Ready(Ok(value))) => {
                this.cell.set(Ok(value));
                Poll::Ready(Completion::Ok)
            }
            Ok(Poll::Ready(Err(error))) => {
                let completion = match error.cancel_reason() {
                    Some(reason) => Completion::Cancelled(reason.clone()),
                    None => Completion::Failed(error.clone()),
                };
                this.cell.set(Err(error));
                Poll::Ready(completion)
            }
            Ok(Poll::Pending) => {
                if this.token.is_cancelled() {
                    let reason = this.token.reason().unwrap_or_default();
                    this.cell.set(Err(Error::Cancelled(reason.clone())));
                    Poll::Ready(Completion::Cancelled(reason))
                } else {
                    this.token.register(cx.waker());
                    Poll::Pending
                }
            }
            Err(panic) => {
                let error = Error::msg(format!("task panicked: {}", panic_message(&*panic)));
                this.cell.set(Err(error.clone()));
                Poll::Ready(Completion::Failed(error))
            }
        }
    }
}

/// Waits for a timed nested scope: child-terminal versus the deadline.
///
/// When the deadline fires first it cancels the child's subtree with a
/// timeout reason, then keeps waiting; it never completes before the
/// child's record is reaped.
struct TimeoutWait<'a> {
    core: &'a Arc<RuntimeCore>,
    id: TaskId,
    scope_token: &'a CancelToken,
    child_token: &'a CancelToken,
    deadline: Instant,
    fired: bool,
}

impl Future for TimeoutWait<'_> {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Err(error) = self.scope_token.checkpoint() {
            return Poll::Ready(Err(error));
        }
        if self.core.is_finished(self.id) {
            return Poll::Ready(Ok(()));
        }
        if !self.fired && Instant::now() >= self.deadline {
            self.fired = true;
            self.child_token.cancel(CancelReason::timeout());
        }
        if !self.core.register_completion_waiter(self.id, cx.waker()) {
            return Poll::Ready(Ok(()));
        }
        if !self.fired {
            self.core.register_timer(self.deadline, cx.waker());
        }
        self.scope_token.register(cx.waker());
        Poll::Pending
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

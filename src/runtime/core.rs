//! Runtime core: the task table and the suspension/resumption protocol.
//!
//! All task state lives in one arena behind a mutex. State transitions are
//! serialized under that lock, so a task being pushed to a terminal state by
//! its own forward progress and by a concurrent cancellation cannot race.
//! User code and wakers are never invoked while the lock is held: polling
//! takes the stored body out of the record, polls it unlocked, and puts it
//! back, and finalization collects its side effects (waiter wakes, subtree
//! cancels) to run after the lock is released.
//!
//! Structured join is enforced at completion: a body that returns while
//! children are live parks its completion in `WaitingChildren`; the last
//! detaching child finalizes the parent, cascading upward. Finalized records
//! are reaped from the arena immediately, so an arena miss means "terminal"
//! everywhere else in the crate.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::runtime::dispatcher::{DispatcherConfig, DispatcherInner, DispatcherMode};
use crate::runtime::stored::StoredTask;
use crate::runtime::task::{CompletionCell, TaskKind, TaskRecord, TaskState};
use crate::runtime::timer::TimerHeap;
use crate::runtime::waker::waker_for;
use crate::types::{CancelReason, Completion, DispatcherId, TaskId};
use crate::util::Arena;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Instant;
use tracing::{debug, trace};

/// Side effects collected under the task-table lock, applied after release.
#[derive(Default)]
struct Effects {
    wakers: Vec<Waker>,
    cancels: Vec<(CancelToken, CancelReason)>,
    finalized_any: bool,
}

/// Shared state of one runtime instance.
pub(crate) struct RuntimeCore {
    /// Back-reference to the owning `Arc`, for handing wakers and worker
    /// threads a sharable handle from `&self` methods.
    self_ref: Weak<Self>,
    tasks: Mutex<Arena<TaskRecord>>,
    timers: Mutex<TimerHeap>,
    dispatchers: Mutex<Vec<Arc<DispatcherInner>>>,
    /// The caller dispatcher, drained by the bridge loop.
    pub(crate) caller: Arc<DispatcherInner>,
    next_dispatcher: AtomicU32,
    bridge_dirty: Mutex<bool>,
    bridge_signal: Condvar,
    shutdown: AtomicBool,
}

impl RuntimeCore {
    /// Creates a fresh runtime with its caller dispatcher.
    pub(crate) fn new() -> Arc<Self> {
        let caller = DispatcherInner::caller(DispatcherId::CALLER);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            tasks: Mutex::new(Arena::new()),
            timers: Mutex::new(TimerHeap::new()),
            dispatchers: Mutex::new(vec![Arc::clone(&caller)]),
            caller,
            next_dispatcher: AtomicU32::new(1),
            bridge_dirty: Mutex::new(false),
            bridge_signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// The owning `Arc`. `None` only during teardown of the last reference,
    /// when nothing should be scheduled anyway.
    fn shared(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    /// Creates and registers a new dispatcher.
    pub(crate) fn create_dispatcher(
        core: &Arc<Self>,
        config: &DispatcherConfig,
    ) -> Arc<DispatcherInner> {
        let id = DispatcherId(core.next_dispatcher.fetch_add(1, Ordering::Relaxed));
        let inner = DispatcherInner::start(core, id, config);
        core.dispatchers.lock().push(Arc::clone(&inner));
        inner
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    /// Allocates a task record as a child of `parent`.
    ///
    /// Returns `None` if the runtime is shutting down or the parent has
    /// already finished (its record is reaped).
    pub(crate) fn allocate(
        &self,
        parent: Option<TaskId>,
        dispatcher: Arc<DispatcherInner>,
        token: CancelToken,
        kind: TaskKind,
    ) -> Option<TaskId> {
        if self.shutdown.load(Ordering::Acquire) {
            return None;
        }
        let mut tasks = self.tasks.lock();
        if let Some(parent_id) = parent {
            let parent_rec = tasks.get(parent_id.arena_index())?;
            if parent_rec.state.is_terminal() {
                return None;
            }
        }
        let index = tasks.insert_with(|index| {
            TaskRecord::new(TaskId::from_arena(index), parent, dispatcher, token, kind)
        });
        let id = TaskId::from_arena(index);
        if let Some(parent_id) = parent {
            if let Some(parent_rec) = tasks.get_mut(parent_id.arena_index()) {
                parent_rec.children.push(id);
            }
        }
        debug!(task = %id, parent = ?parent, kind = ?kind, "task spawned");
        Some(id)
    }

    /// Installs the prepared body and schedules the first resumption.
    pub(crate) fn install(&self, task: TaskId, stored: StoredTask) {
        {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(task.arena_index()) {
                Some(rec) => rec.future = Some(stored),
                None => return,
            }
        }
        self.schedule(task);
    }

    /// Completes a task that never got a body (its factory panicked).
    pub(crate) fn abandon(&self, task: TaskId, completion: Completion) {
        self.complete(task, completion);
    }

    // ------------------------------------------------------------------
    // Scheduling and polling
    // ------------------------------------------------------------------

    /// Marks `task` ready and hands it to its dispatcher.
    ///
    /// Duplicate wakes collapse here: a task already queued, or currently
    /// being polled, is not enqueued again.
    pub(crate) fn schedule(&self, task: TaskId) {
        let target = {
            let mut tasks = self.tasks.lock();
            let Some(rec) = tasks.get_mut(task.arena_index()) else {
                return;
            };
            if rec.state.is_terminal() {
                return;
            }
            if rec.polling {
                rec.woken = true;
                return;
            }
            if rec.scheduled {
                return;
            }
            rec.scheduled = true;
            Arc::clone(&rec.dispatcher)
        };
        let Some(core) = self.shared() else { return };
        target.enqueue(&core, task);
    }

    /// Runs one resumption of `task` on the current thread.
    pub(crate) fn poll_task(core: &Arc<Self>, task: TaskId) {
        let (mut stored, mode, waker) = {
            let mut tasks = core.tasks.lock();
            let Some(rec) = tasks.get_mut(task.arena_index()) else {
                return;
            };
            rec.scheduled = false;
            if rec.state.is_terminal() || rec.polling {
                rec.woken = rec.polling;
                return;
            }
            let Some(stored) = rec.future.take() else {
                // Body not installed yet; install() will schedule.
                return;
            };
            rec.polling = true;
            rec.state = TaskState::Active;
            let waker = rec
                .waker
                .get_or_insert_with(|| waker_for(core, task))
                .clone();
            (stored, rec.dispatcher.mode, waker)
        };

        loop {
            let mut cx = Context::from_waker(&waker);
            match stored.poll(&mut cx) {
                Poll::Ready(completion) => {
                    core.complete(task, completion);
                    return;
                }
                Poll::Pending => {
                    let mut tasks = core.tasks.lock();
                    let Some(rec) = tasks.get_mut(task.arena_index()) else {
                        return;
                    };
                    if !rec.woken {
                        rec.polling = false;
                        rec.state = TaskState::Suspended;
                        rec.future = Some(stored);
                        return;
                    }
                    rec.woken = false;
                    if matches!(mode, DispatcherMode::Unconfined) {
                        // Inline repoll; `stored` stays with this thread.
                        continue;
                    }
                    // Re-enqueue at the back so a self-waking task cannot
                    // starve a single-threaded dispatcher.
                    rec.polling = false;
                    rec.state = TaskState::Suspended;
                    rec.future = Some(stored);
                    rec.scheduled = true;
                    let target = Arc::clone(&rec.dispatcher);
                    drop(tasks);
                    target.enqueue(core, task);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Completion and structured join
    // ------------------------------------------------------------------

    /// Records the body's completion, deferring finalization while children
    /// are live.
    ///
    /// Only the terminal-state transition is deferred. A failure on a
    /// fail-fast task escalates right here, before the children finish:
    /// siblings must not run out a failing scope's remaining work, and the
    /// parent-token cancel also reaches the failing task's own subtree.
    pub(crate) fn complete(&self, task: TaskId, completion: Completion) {
        let mut effects = Effects::default();
        {
            let mut tasks = self.tasks.lock();
            if let Some(rec) = tasks.get_mut(task.arena_index()) {
                rec.polling = false;
                rec.woken = false;
                rec.future = None;
                if rec.children.is_empty() {
                    Self::finalize_locked(&mut tasks, task, completion, &mut effects);
                } else {
                    trace!(task = %task, live_children = rec.children.len(),
                        "completion deferred until children finish");
                    let parent = rec.parent;
                    let escalates =
                        matches!(rec.kind, TaskKind::FailFast) && completion.is_failed();
                    let failure = completion.failure().cloned();
                    rec.state = TaskState::WaitingChildren(completion);
                    if escalates {
                        if let (Some(parent_id), Some(error)) = (parent, failure) {
                            Self::escalate_locked(&mut tasks, parent_id, &error, &mut effects);
                        }
                    }
                }
            }
        }
        self.apply(effects);
    }

    /// Latches a fail-fast failure on `parent` and queues the cancellation
    /// of its whole token subtree. The first failure wins; later ones are
    /// suppressed.
    fn escalate_locked(
        tasks: &mut Arena<TaskRecord>,
        parent: TaskId,
        error: &Error,
        effects: &mut Effects,
    ) {
        let Some(parent_rec) = tasks.get_mut(parent.arena_index()) else {
            return;
        };
        if parent_rec.state.is_terminal() {
            return;
        }
        if parent_rec.latch_failure(error) {
            effects
                .cancels
                .push((parent_rec.token.clone(), CancelReason::parent_failure()));
        } else {
            trace!(parent = %parent, "later failure suppressed by first");
        }
    }

    /// Finalizes `task` and cascades to any parent whose last child this was.
    ///
    /// A latched first failure overrides the body's own completion, so a
    /// scope cancelled because of a failing child re-raises that originating
    /// failure rather than its own cancellation. Failure of a fail-fast task
    /// escalates: the parent latches the error (first one wins, later ones
    /// are suppressed) and the parent's whole token subtree is cancelled.
    fn finalize_locked(
        tasks: &mut Arena<TaskRecord>,
        task: TaskId,
        completion: Completion,
        effects: &mut Effects,
    ) {
        let mut work = vec![(task, completion)];
        while let Some((id, completion)) = work.pop() {
            let Some(rec) = tasks.get_mut(id.arena_index()) else {
                continue;
            };
            if rec.state.is_terminal() {
                continue;
            }
            if let Some(error) = completion.failure() {
                rec.latch_failure(error);
            }
            let final_completion = match &rec.first_failure {
                Some(error) => Completion::Failed(error.clone()),
                None => completion,
            };
            rec.state = TaskState::Terminal(final_completion.clone());
            rec.completion.set(final_completion.clone());
            effects.wakers.extend(rec.take_waiters());
            effects.finalized_any = true;
            let parent = rec.parent;
            let kind = rec.kind;
            let failure = final_completion.failure().cloned();
            debug!(task = %id, completion = %final_completion, "task finished");

            // Reap: the record is gone the moment the task is terminal, so a
            // stale handle can only miss, never alias a recycled slot.
            tasks.remove(id.arena_index());

            let Some(parent_id) = parent else { continue };
            if let Some(error) = &failure {
                if matches!(kind, TaskKind::FailFast) {
                    // Usually already latched when the body completed; this
                    // covers bodies that fail with no children at all.
                    Self::escalate_locked(tasks, parent_id, error, effects);
                }
            }
            let Some(parent_rec) = tasks.get_mut(parent_id.arena_index()) else {
                continue;
            };
            if let Some(parked) = parent_rec.detach_child(id) {
                work.push((parent_id, parked));
            }
        }
    }

    fn apply(&self, effects: Effects) {
        for waker in effects.wakers {
            waker.wake();
        }
        for (token, reason) in effects.cancels {
            token.cancel(reason);
        }
        if effects.finalized_any {
            self.notify_bridge();
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Returns true once `task` is terminal (its record is reaped).
    pub(crate) fn is_finished(&self, task: TaskId) -> bool {
        !self.tasks.lock().contains(task.arena_index())
    }

    /// The completion cell of a live task.
    pub(crate) fn completion_of(&self, task: TaskId) -> Option<Arc<CompletionCell>> {
        self.tasks
            .lock()
            .get(task.arena_index())
            .map(|rec| Arc::clone(&rec.completion))
    }

    /// Registers a completion waiter. Returns false if already terminal.
    pub(crate) fn register_completion_waiter(&self, task: TaskId, waker: &Waker) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(task.arena_index()) {
            Some(rec) => {
                rec.add_waiter(waker);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Timers and the bridge
    // ------------------------------------------------------------------

    /// Registers a waker to fire at `deadline` and pokes the bridge so it
    /// re-evaluates its park time.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: &Waker) {
        self.timers.lock().insert(deadline, waker.clone());
        self.notify_bridge();
    }

    /// Wakes the bridge loop.
    pub(crate) fn notify_bridge(&self) {
        *self.bridge_dirty.lock() = true;
        self.bridge_signal.notify_all();
    }

    /// Drains the caller queue and fires expired timers until neither has
    /// work left. Returns whether anything ran.
    pub(crate) fn drive_ready(&self) -> bool {
        let Some(core) = self.shared() else {
            return false;
        };
        let mut did_work = false;
        loop {
            let mut progressed = false;
            while let Some(task) = self.caller.pop() {
                Self::poll_task(&core, task);
                progressed = true;
            }
            let expired = self.timers.lock().pop_expired(Instant::now());
            if !expired.is_empty() {
                progressed = true;
                for waker in expired {
                    trace!("timer fired");
                    waker.wake();
                }
            }
            if !progressed {
                break;
            }
            did_work = true;
        }
        did_work
    }

    /// Parks the bridge thread until new work arrives or the next deadline.
    pub(crate) fn park_bridge(&self) {
        let deadline = self.timers.lock().next_deadline();
        let mut dirty = self.bridge_dirty.lock();
        if !*dirty {
            match deadline {
                Some(deadline) => {
                    let _ = self.bridge_signal.wait_until(&mut dirty, deadline);
                }
                None => self.bridge_signal.wait(&mut dirty),
            }
        }
        *dirty = false;
    }

    /// Stops all dispatchers and clears remaining state.
    pub(crate) fn teardown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let dispatchers: Vec<_> = self.dispatchers.lock().clone();
        for dispatcher in &dispatchers {
            dispatcher.request_shutdown();
        }
        for dispatcher in &dispatchers {
            dispatcher.join_workers();
        }
        self.tasks.lock().clear();
        self.timers.lock().clear();
    }
}

impl std::fmt::Debug for RuntimeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCore")
            .field("tasks", &self.tasks.lock().len())
            .field("timers", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_task_runs_and_is_reaped() {
        let core = RuntimeCore::new();
        let id = core
            .allocate(
                None,
                Arc::clone(&core.caller),
                CancelToken::new(),
                TaskKind::FailFast,
            )
            .expect("allocate");
        core.install(id, StoredTask::new(id, async { Completion::Ok }));

        assert!(!core.is_finished(id));
        assert!(core.drive_ready());
        assert!(core.is_finished(id));
        core.teardown();
    }

    #[test]
    fn parent_waits_for_child_before_finalizing() {
        let core = RuntimeCore::new();
        let parent = core
            .allocate(
                None,
                Arc::clone(&core.caller),
                CancelToken::new(),
                TaskKind::FailFast,
            )
            .expect("allocate parent");
        let child = core
            .allocate(
                Some(parent),
                Arc::clone(&core.caller),
                CancelToken::new(),
                TaskKind::FailFast,
            )
            .expect("allocate child");

        // Parent body finishes immediately, but the child record is live.
        core.complete(parent, Completion::Ok);
        assert!(!core.is_finished(parent));

        core.complete(child, Completion::Ok);
        assert!(core.is_finished(child));
        assert!(core.is_finished(parent));
        core.teardown();
    }

    #[test]
    fn allocate_under_reaped_parent_is_refused() {
        let core = RuntimeCore::new();
        let parent = core
            .allocate(
                None,
                Arc::clone(&core.caller),
                CancelToken::new(),
                TaskKind::FailFast,
            )
            .expect("allocate");
        core.complete(parent, Completion::Ok);
        let refused = core.allocate(
            Some(parent),
            Arc::clone(&core.caller),
            CancelToken::new(),
            TaskKind::FailFast,
        );
        assert!(refused.is_none());
        core.teardown();
    }
}

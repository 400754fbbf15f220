//! Task records and the task state machine.
//!
//! Each live task has one [`TaskRecord`] in the runtime's arena. The state
//! machine is
//!
//! ```text
//! Created → Active ⇄ Suspended → {Terminal}
//!                  ↘ WaitingChildren → Terminal
//! ```
//!
//! `WaitingChildren` is the structured-join deferral: the body has returned
//! but children are still live, so the body's completion is parked until the
//! last child detaches. A task is therefore never observed terminal while
//! any of its children is non-terminal.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::runtime::dispatcher::DispatcherInner;
use crate::runtime::stored::StoredTask;
use crate::types::{Completion, TaskId};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::task::Waker;

/// Write-once slot holding a task's final completion.
///
/// Written at finalization, immediately before the record is reaped, so a
/// handle that observed "terminal" always finds the completion here. This
/// is the type-erased channel for outcomes; typed values travel through
/// the handle's result cell instead. The two can disagree when a body
/// returned `Ok` but a child later failed: the completion is authoritative.
pub(crate) struct CompletionCell {
    slot: Mutex<Option<Completion>>,
}

impl CompletionCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
        })
    }

    /// A cell born already finalized, for spawns refused up front.
    pub(crate) fn preset(completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(completion)),
        })
    }

    /// Stores the completion. The first write wins.
    pub(crate) fn set(&self, completion: Completion) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(completion);
        }
    }

    pub(crate) fn get(&self) -> Option<Completion> {
        self.slot.lock().clone()
    }
}

/// How a task's failure interacts with its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// `launch` child: failure escalates, cancelling the scope and siblings.
    FailFast,
    /// `defer` child (and nested-scope carriers): failure is latched in the
    /// result cell and only observed when awaited.
    Isolated,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone)]
pub(crate) enum TaskState {
    /// Spawned, not yet polled.
    Created,
    /// Currently being polled on a dispatcher thread.
    Active,
    /// Parked at a suspension point.
    Suspended,
    /// Body finished but children are still live; completion is parked.
    WaitingChildren(Completion),
    /// All done; the record is reaped immediately after entering this state.
    Terminal(Completion),
}

impl TaskState {
    /// Returns true for the terminal state.
    #[must_use]
    pub(crate) const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Arena-resident bookkeeping for one task.
pub(crate) struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) parent: Option<TaskId>,
    pub(crate) dispatcher: Arc<DispatcherInner>,
    pub(crate) token: CancelToken,
    pub(crate) kind: TaskKind,
    pub(crate) state: TaskState,
    /// The stored body; `None` while a dispatcher thread is polling it.
    pub(crate) future: Option<StoredTask>,
    pub(crate) children: SmallVec<[TaskId; 4]>,
    /// Wakers of tasks (or waits) parked on this task's completion.
    pub(crate) waiters: SmallVec<[Waker; 2]>,
    /// This task's own waker, created on first poll and reused afterwards
    /// so `will_wake` deduplication works at every registration site.
    pub(crate) waker: Option<Waker>,
    /// First originating failure in this task's scope; later ones are
    /// recorded by their own tasks but never re-raised here.
    pub(crate) first_failure: Option<Error>,
    /// The final completion, written at finalization and readable by
    /// handles after the record is reaped.
    pub(crate) completion: Arc<CompletionCell>,
    /// A dispatcher thread currently owns the body.
    pub(crate) polling: bool,
    /// A wake arrived while `polling`; re-run instead of parking.
    pub(crate) woken: bool,
    /// Already sitting in a ready queue; suppress duplicate enqueues.
    pub(crate) scheduled: bool,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        parent: Option<TaskId>,
        dispatcher: Arc<DispatcherInner>,
        token: CancelToken,
        kind: TaskKind,
    ) -> Self {
        Self {
            id,
            parent,
            dispatcher,
            token,
            kind,
            state: TaskState::Created,
            future: None,
            children: SmallVec::new(),
            waiters: SmallVec::new(),
            waker: None,
            first_failure: None,
            completion: CompletionCell::new(),
            polling: false,
            woken: false,
            scheduled: false,
        }
    }

    /// Registers a waker for this task's completion, deduplicated.
    pub(crate) fn add_waiter(&mut self, waker: &Waker) {
        if let Some(existing) = self.waiters.iter_mut().find(|w| w.will_wake(waker)) {
            existing.clone_from(waker);
        } else {
            self.waiters.push(waker.clone());
        }
    }

    /// Takes all registered completion waiters.
    pub(crate) fn take_waiters(&mut self) -> SmallVec<[Waker; 2]> {
        std::mem::take(&mut self.waiters)
    }

    /// Detaches a terminal child. Returns the parked body completion if this
    /// was the last child and the body already finished.
    pub(crate) fn detach_child(&mut self, child: TaskId) -> Option<Completion> {
        self.children.retain(|c| *c != child);
        if self.children.is_empty() {
            if let TaskState::WaitingChildren(completion) = &self.state {
                return Some(completion.clone());
            }
        }
        None
    }

    /// Latches the first originating failure. Returns true if newly latched.
    pub(crate) fn latch_failure(&mut self, error: &Error) -> bool {
        if self.first_failure.is_none() {
            self.first_failure = Some(error.clone());
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("state", &self.state)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

//! Waker plumbing.
//!
//! Waking a task re-enqueues it on its own dispatcher. Deduplication lives
//! in the task record (`scheduled` / `woken` flags), so stacked wakes from a
//! timer, a token, and a completed child collapse into one resumption.

use crate::runtime::core::RuntimeCore;
use crate::types::TaskId;
use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};

struct TaskWaker {
    core: Weak<RuntimeCore>,
    task: TaskId,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // A wake after runtime teardown is a no-op.
        if let Some(core) = self.core.upgrade() {
            core.schedule(self.task);
        }
    }
}

/// Creates the waker that resumes `task` on its dispatcher.
pub(crate) fn waker_for(core: &Arc<RuntimeCore>, task: TaskId) -> Waker {
    Waker::from(Arc::new(TaskWaker {
        core: Arc::downgrade(core),
        task,
    }))
}

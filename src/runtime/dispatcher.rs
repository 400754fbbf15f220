//! Execution contexts that run ready task continuations.
//!
//! A dispatcher owns a FIFO ready-queue and the thread(s) that drain it;
//! tasks reference a dispatcher, never the reverse. Four modes:
//!
//! - `single`: one dedicated thread; continuations enqueued here run
//!   strictly in enqueue order relative to each other.
//! - `pool(n)`: n worker threads pulling from one shared queue; no ordering
//!   guarantee across workers.
//! - `unconfined`: owns no thread. A continuation runs immediately and
//!   synchronously on whichever thread enqueued it, up to its next
//!   suspension; after that it resumes on whichever thread caused the
//!   resuming event. Callers must not rely on this mode for thread affinity
//!   — doing so is a caller error, not a runtime error.
//! - `caller`: used only by the blocking entry point; the blocked calling
//!   thread drains this queue itself.

use crate::runtime::core::RuntimeCore;
use crate::types::{DispatcherId, TaskId};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::debug;

/// Thread-affinity mode of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherMode {
    /// Pinned to the blocked calling thread of the bridge.
    Caller,
    /// One dedicated worker thread, strict enqueue-order execution.
    Single,
    /// A fixed pool of worker threads over a shared queue.
    Pool {
        /// Number of worker threads.
        workers: usize,
    },
    /// No owned thread; runs on whichever thread enqueues or resumes.
    Unconfined,
}

/// Configuration for creating a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    name: String,
    mode: DispatcherMode,
}

impl DispatcherConfig {
    /// A single dedicated thread named `name`.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: DispatcherMode::Single,
        }
    }

    /// A pool of `workers` threads (clamped to at least one).
    #[must_use]
    pub fn pool(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            mode: DispatcherMode::Pool {
                workers: workers.max(1),
            },
        }
    }

    /// The unconfined mode. See the module docs for its thread semantics.
    #[must_use]
    pub fn unconfined() -> Self {
        Self {
            name: "unconfined".to_string(),
            mode: DispatcherMode::Unconfined,
        }
    }

    pub(crate) fn mode(&self) -> DispatcherMode {
        self.mode
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// A handle to a dispatcher, usable as a target for
/// [`with_context`](crate::scope::Scope::with_context) and as an identity probe.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// This dispatcher's unique id.
    #[must_use]
    pub fn id(&self) -> DispatcherId {
        self.inner.id
    }

    /// This dispatcher's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// This dispatcher's mode.
    #[must_use]
    pub fn mode(&self) -> DispatcherMode {
        self.inner.mode
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .finish()
    }
}

/// Shared state of one dispatcher.
pub(crate) struct DispatcherInner {
    pub(crate) id: DispatcherId,
    pub(crate) name: String,
    pub(crate) mode: DispatcherMode,
    queue: Mutex<VecDeque<TaskId>>,
    available: Condvar,
    shutdown: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl DispatcherInner {
    fn bare(id: DispatcherId, name: String, mode: DispatcherMode) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            mode,
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// The caller dispatcher; its queue is drained by the bridge loop.
    pub(crate) fn caller(id: DispatcherId) -> Arc<Self> {
        Self::bare(id, "caller".to_string(), DispatcherMode::Caller)
    }

    /// An unconfined dispatcher; owns no thread and no live queue.
    pub(crate) fn unconfined(id: DispatcherId, name: String) -> Arc<Self> {
        Self::bare(id, name, DispatcherMode::Unconfined)
    }

    /// Creates a dispatcher from `config`, spawning its worker threads.
    pub(crate) fn start(
        core: &Arc<RuntimeCore>,
        id: DispatcherId,
        config: &DispatcherConfig,
    ) -> Arc<Self> {
        let inner = Self::bare(id, config.name().to_string(), config.mode());
        let worker_count = match config.mode() {
            DispatcherMode::Single => 1,
            DispatcherMode::Pool { workers } => workers,
            DispatcherMode::Caller | DispatcherMode::Unconfined => 0,
        };
        let mut workers = inner.workers.lock();
        for i in 0..worker_count {
            let weak_core = Arc::downgrade(core);
            let worker_inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{i}", config.name()))
                .spawn(move || worker_loop(&weak_core, &worker_inner))
                .expect("failed to spawn dispatcher worker thread");
            workers.push(handle);
        }
        drop(workers);
        debug!(dispatcher = %id, name = config.name(), mode = ?config.mode(), "dispatcher started");
        inner
    }

    /// Hands a ready task to this dispatcher.
    ///
    /// Unconfined mode polls the task inline, right here, on the enqueuing
    /// thread; queue modes push and notify.
    pub(crate) fn enqueue(self: &Arc<Self>, core: &Arc<RuntimeCore>, task: TaskId) {
        match self.mode {
            DispatcherMode::Unconfined => RuntimeCore::poll_task(core, task),
            DispatcherMode::Caller => {
                self.queue.lock().push_back(task);
                core.notify_bridge();
            }
            DispatcherMode::Single | DispatcherMode::Pool { .. } => {
                self.queue.lock().push_back(task);
                self.available.notify_one();
            }
        }
    }

    /// Non-blocking pop, used by the bridge to drain the caller queue.
    pub(crate) fn pop(&self) -> Option<TaskId> {
        self.queue.lock().pop_front()
    }

    /// Tells worker threads to exit once the queue is drained.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
    }

    /// Joins all worker threads. Must not be called from a worker.
    pub(crate) fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
        debug!(dispatcher = %self.id, name = %self.name, "dispatcher stopped");
    }
}

fn worker_loop(core: &Weak<RuntimeCore>, inner: &Arc<DispatcherInner>) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.available.wait(&mut queue);
            }
        };
        let Some(core) = core.upgrade() else { return };
        RuntimeCore::poll_task(&core, task);
    }
}

impl std::fmt::Debug for DispatcherInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

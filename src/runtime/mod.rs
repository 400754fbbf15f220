//! Scheduler internals: the task table, dispatchers, timers and wakers.

pub(crate) mod core;
pub mod dispatcher;
pub(crate) mod stored;
pub(crate) mod task;
pub(crate) mod timer;
pub(crate) mod waker;

use crate::runtime::core::RuntimeCore;
use crate::runtime::dispatcher::{Dispatcher, DispatcherConfig};
use std::sync::Arc;

/// A handle to a live runtime, for creating dispatchers.
///
/// Obtained from [`Scope::runtime`](crate::scope::Scope::runtime). Cloneable
/// and sendable; it does not keep the runtime alive past
/// [`run_blocking`](crate::bridge::run_blocking) returning, and dispatchers
/// created through a handle are shut down with the runtime.
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    pub(crate) core: Arc<RuntimeCore>,
}

impl RuntimeHandle {
    /// Creates a new dispatcher from `config` and registers it with the
    /// runtime. Its worker threads (if any) start immediately and stop when
    /// the runtime tears down.
    #[must_use]
    pub fn dispatcher(&self, config: DispatcherConfig) -> Dispatcher {
        Dispatcher {
            inner: RuntimeCore::create_dispatcher(&self.core, &config),
        }
    }
}

//! The blocking bridge: entry from synchronous code into a runtime.
//!
//! [`run_blocking`] owns the runtime for its whole duration. The calling
//! thread triples as the caller dispatcher (draining tasks pinned to it),
//! the timer driver (firing expired deadlines), and the root joiner; it
//! parks between rounds and is poked by the runtime whenever new caller
//! work, a new timer, or a finalized task appears.
//!
//! Returning from the bridge is a full teardown: by the structured-join
//! invariant the root cannot be terminal while any task it transitively
//! spawned is live, so once the root's record is reaped there is nothing
//! left to run and worker dispatchers are stopped and joined.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::runtime::core::RuntimeCore;
use crate::runtime::dispatcher::{DispatcherConfig, DispatcherInner};
use crate::runtime::task::TaskKind;
use crate::scope::{resolve_value, spawn_task, Scope};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Runs `f` as the root task of a fresh runtime, blocking until the root
/// and everything it transitively spawned are terminal.
///
/// The root body runs on the calling thread. Returns the root's value, the
/// first originating failure of its scope, or the cancellation error if
/// the root was cancelled.
pub fn run_blocking<T, F>(f: impl FnOnce(Scope) -> F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let core = RuntimeCore::new();
    let caller = Arc::clone(&core.caller);
    drive(core, caller, f)
}

/// Like [`run_blocking`], but the root body runs on a dispatcher created
/// from `config` instead of the calling thread.
///
/// The calling thread still blocks, driving timers and any work later
/// redirected at it, until the root is terminal.
pub fn run_blocking_on<T, F>(config: DispatcherConfig, f: impl FnOnce(Scope) -> F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let core = RuntimeCore::new();
    let root_dispatcher = RuntimeCore::create_dispatcher(&core, &config);
    drive(core, root_dispatcher, f)
}

fn drive<T, F>(
    core: Arc<RuntimeCore>,
    dispatcher: Arc<DispatcherInner>,
    f: impl FnOnce(Scope) -> F,
) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let token = CancelToken::new();
    let (root, cell, completion) =
        spawn_task(&core, None, dispatcher, token, TaskKind::FailFast, f);
    debug!(%root, "bridge started");

    loop {
        core.drive_ready();
        if core.is_finished(root) {
            break;
        }
        core.park_bridge();
    }

    core.teardown();
    debug!(%root, "bridge finished");
    resolve_value(&completion, &cell)
}

//! Weave: a structured-concurrency task runtime with cooperative
//! cancellation.
//!
//! # Overview
//!
//! Weave runs hierarchies of cooperative tasks under structured
//! concurrency: every task is spawned inside a [`Scope`], a scope cannot
//! complete while any of its children is running, and cancellation flows
//! down the parent/child tree as an advisory mark that tasks observe at
//! checkpoints. Nothing is ever preempted mid-execution.
//!
//! # Core Guarantees
//!
//! - **Structured join**: a scope reports complete only after every task
//!   ever launched within it, transitively, is terminal
//! - **Fail-fast by default**: a [`Scope::launch`] child's failure cancels
//!   its siblings, and the *first* originating failure is the one
//!   re-raised; later teardown failures are suppressed
//! - **Error isolation on demand**: a [`Scope::defer`] child's failure
//!   stays latched in its [`Deferred`] until awaited
//! - **Cooperative cancellation**: cancelling marks a token subtree
//!   synchronously, but running bodies only observe it at checkpoints
//!   (`delay`, `yield_now`, `checkpoint`, joins); a body that never
//!   checkpoints is never interrupted, by design
//! - **Timeouts via cancellation**: [`Scope::with_timeout`] cancels its
//!   subtree with a timeout reason, never interrupts a thread
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, cancellation reasons, completions
//! - [`error`]: the crate error type
//! - [`cancel`]: the cancellation token tree
//! - [`runtime`]: scheduler core, dispatchers, timers
//! - [`scope`]: the spawning surface handed to task bodies
//! - [`handle`]: task handles and deferred values
//! - [`bridge`]: the blocking entry point
//!
//! # Example
//!
//! ```
//! use weave::{run_blocking, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let sum = run_blocking(|scope| async move {
//!         let a = scope.defer(|s| async move {
//!             s.delay(Duration::from_millis(10)).await?;
//!             Ok(1)
//!         });
//!         let b = scope.defer(|s| async move {
//!             s.delay(Duration::from_millis(10)).await?;
//!             Ok(2)
//!         });
//!         Ok(a.await_value().await? + b.await_value().await?)
//!     })?;
//!     assert_eq!(sum, 3);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod cancel;
pub mod error;
pub mod handle;
pub mod runtime;
pub mod scope;
pub(crate) mod time;
pub mod types;
pub(crate) mod util;

// Re-exports for convenient access to the core surface.
pub use bridge::{run_blocking, run_blocking_on};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use handle::{Deferred, TaskHandle};
pub use runtime::dispatcher::{Dispatcher, DispatcherConfig, DispatcherMode};
pub use runtime::RuntimeHandle;
pub use scope::Scope;
pub use types::{CancelKind, CancelReason, Completion, DispatcherId, TaskId};

//! Core identifier and outcome types.

pub mod cancel;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use id::{DispatcherId, TaskId};
pub use outcome::Completion;

//! Error types for the runtime.
//!
//! Errors are explicit and typed; nothing is stringly-dispatched. The
//! taxonomy distinguishes the three ways a task can stop early:
//!
//! - [`Error::Cancelled`]: someone requested cancellation (the reason says
//!   who — user, deadline, or a failing relative).
//! - [`Error::TimeoutExceeded`]: a [`with_timeout`](crate::scope::Scope::with_timeout)
//!   deadline fired. Raised distinctly from plain cancellation so callers can
//!   tell "someone cancelled me" from "I ran out of time".
//! - [`Error::TaskFailed`]: the body returned an error or panicked.
//!
//! `Error` is `Clone` because a single originating failure is re-raised at
//! every observer of a failed scope (the joiner, the scope owner, the bridge).

use crate::types::{CancelKind, CancelReason};

/// Convenience alias used throughout the crate and by task bodies.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type surfaced by runtime operations and task bodies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The operation was cancelled at a checkpoint.
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),

    /// A `with_timeout` deadline fired and the body's subtree was torn down.
    #[error("timeout exceeded")]
    TimeoutExceeded,

    /// A task body returned an error or panicked.
    #[error("task failed: {message}")]
    TaskFailed {
        /// Description of the failure.
        message: String,
    },

    /// Work was submitted to a scope whose owning task already finished, or
    /// after the runtime shut down.
    #[error("scope is closed")]
    ScopeClosed,
}

impl Error {
    /// Creates a [`Error::TaskFailed`] from a message.
    ///
    /// This is how ordinary task bodies report application failures.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
        }
    }

    /// Returns true if this error is any form of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this error is a timeout.
    ///
    /// Both [`Error::TimeoutExceeded`] and a cancellation whose reason is
    /// [`CancelKind::Timeout`] count: the former is what the timed-out caller
    /// sees, the latter is what the torn-down body sees.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        match self {
            Self::TimeoutExceeded => true,
            Self::Cancelled(reason) => matches!(reason.kind, CancelKind::Timeout),
            _ => false,
        }
    }

    /// Returns the cancellation reason, if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Error::msg("boom").to_string(), "task failed: boom");
        assert_eq!(Error::TimeoutExceeded.to_string(), "timeout exceeded");
        assert_eq!(
            Error::Cancelled(CancelReason::timeout()).to_string(),
            "cancelled: timeout"
        );
    }

    #[test]
    fn timeout_classification() {
        assert!(Error::TimeoutExceeded.is_timeout());
        assert!(Error::Cancelled(CancelReason::timeout()).is_timeout());
        assert!(!Error::Cancelled(CancelReason::default()).is_timeout());
        assert!(!Error::msg("x").is_timeout());
    }

    #[test]
    fn cancel_reason_accessor() {
        let err = Error::Cancelled(CancelReason::user("stop"));
        assert_eq!(err.cancel_reason().unwrap().message, Some("stop"));
        assert!(Error::TimeoutExceeded.cancel_reason().is_none());
    }
}

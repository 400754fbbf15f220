//! Terminal task outcomes.
//!
//! A [`Completion`] records how a task body finished, independent of its
//! typed value (values travel through the handle's result cell). Variants
//! form a severity lattice: `Ok < Failed < Cancelled`. When a parent
//! aggregates its own body result with a latched child failure, the first
//! originating failure wins regardless of the parent's own completion.

use super::cancel::CancelReason;
use crate::error::Error;
use core::fmt;

/// How a task finished.
#[derive(Debug, Clone)]
pub enum Completion {
    /// The body ran to completion and produced a value.
    Ok,
    /// The body returned an error, or panicked.
    Failed(Error),
    /// The task observed cancellation at a checkpoint.
    Cancelled(CancelReason),
}

impl Completion {
    /// Severity rank of this completion (0 = Ok, 2 = Cancelled).
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Failed(_) => 1,
            Self::Cancelled(_) => 2,
        }
    }

    /// Returns true if the body produced a value.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the body failed (error or panic).
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if the task was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the failure error, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&Error> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed(error) => write!(f, "failed: {error}"),
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_lattice() {
        let ok = Completion::Ok;
        let failed = Completion::Failed(Error::msg("boom"));
        let cancelled = Completion::Cancelled(CancelReason::timeout());
        assert!(ok.severity() < failed.severity());
        assert!(failed.severity() < cancelled.severity());
    }

    #[test]
    fn accessors() {
        assert!(Completion::Ok.is_ok());
        assert!(Completion::Failed(Error::msg("x")).failure().is_some());
        assert!(Completion::Cancelled(CancelReason::default()).is_cancelled());
    }
}

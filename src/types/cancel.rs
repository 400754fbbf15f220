//! Cancellation reason and kind types.
//!
//! Every cancellation carries a [`CancelReason`] describing why it happened.
//! Kinds are severity-ordered so that a reason can only ever be strengthened:
//! `UserRequested < Timeout < ParentFailure`.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by caller code.
    UserRequested,
    /// Cancellation because a deadline fired.
    Timeout,
    /// Cancellation because a sibling or parent task failed.
    ParentFailure,
}

impl CancelKind {
    /// Returns the severity rank of this kind (higher wins when strengthening).
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::UserRequested => 0,
            Self::Timeout => 1,
            Self::ParentFailure => 2,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user requested"),
            Self::Timeout => write!(f, "timeout"),
            Self::ParentFailure => write!(f, "parent failure"),
        }
    }
}

/// The reason for a cancellation: a kind plus an optional static message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// What triggered the cancellation.
    pub kind: CancelKind,
    /// Optional human-readable context (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// A user-requested cancellation with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::UserRequested,
            message: Some(message),
        }
    }

    /// A deadline-driven cancellation.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// A cancellation caused by a failing sibling or parent.
    #[must_use]
    pub const fn parent_failure() -> Self {
        Self::new(CancelKind::ParentFailure)
    }

    /// Strengthens this reason with `other`, keeping the more severe kind.
    ///
    /// Returns true if the reason changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind > self.kind {
            *self = other.clone();
            true
        } else {
            false
        }
    }

    /// Returns true if this reason came from a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, CancelKind::Timeout)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::UserRequested)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(CancelKind::UserRequested.severity() < CancelKind::Timeout.severity());
        assert!(CancelKind::Timeout.severity() < CancelKind::ParentFailure.severity());
        assert!(CancelKind::UserRequested < CancelKind::ParentFailure);
    }

    #[test]
    fn strengthen_keeps_more_severe() {
        let mut reason = CancelReason::user("stop");
        assert!(reason.strengthen(&CancelReason::timeout()));
        assert_eq!(reason.kind, CancelKind::Timeout);

        assert!(!reason.strengthen(&CancelReason::user("again")));
        assert_eq!(reason.kind, CancelKind::Timeout);
    }

    #[test]
    fn strengthen_is_idempotent() {
        let mut reason = CancelReason::timeout();
        assert!(!reason.strengthen(&CancelReason::timeout()));
        assert_eq!(reason.kind, CancelKind::Timeout);
    }

    #[test]
    fn display_includes_message() {
        let reason = CancelReason::user("shutting down");
        assert_eq!(reason.to_string(), "user requested: shutting down");
        assert_eq!(CancelReason::timeout().to_string(), "timeout");
    }
}

//! Identifier types for runtime entities.
//!
//! A [`TaskId`] wraps a generation-checked arena index: once a task is reaped
//! its slot generation is bumped, so a stale id can never observe a newer
//! occupant of the same slot. A [`DispatcherId`] is a plain counter; the
//! caller dispatcher is always id 0.

use crate::util::ArenaIndex;
use core::fmt;

/// A unique handle for a task, valid for the task's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) ArenaIndex);

impl TaskId {
    pub(crate) const fn from_arena(index: ArenaIndex) -> Self {
        Self(index)
    }

    pub(crate) const fn arena_index(self) -> ArenaIndex {
        self.0
    }

    /// An id that matches no slot, used for handles of refused spawns.
    pub(crate) const fn invalid() -> Self {
        Self(ArenaIndex::new(u32::MAX, u32::MAX))
    }

    /// Creates a task id from raw parts, for unit tests of runtime internals.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(slot: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(slot, generation))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.slot(), self.0.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.slot())
    }
}

/// A unique identifier for a dispatcher.
///
/// Usable as an affinity probe: code that must observe "same dispatcher
/// before and after" (for example around a context switch) can compare ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatcherId(pub(crate) u32);

impl DispatcherId {
    /// The caller dispatcher driven by the blocking entry point.
    pub const CALLER: Self = Self(0);
}

impl fmt::Debug for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatcherId({})", self.0)
    }
}

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

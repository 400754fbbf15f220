//! Internal utilities.

pub(crate) mod arena;

pub(crate) use arena::{Arena, ArenaIndex};

//! Generation-checked arena for task records.
//!
//! Task records are stored in slots that are reused after a task is reaped.
//! Every slot carries a generation counter; an index minted for one occupant
//! will miss after the slot has been recycled, so a stale [`TaskId`](crate::types::TaskId)
//! can never alias a newer task.

use core::fmt;
use core::hash::{Hash, Hasher};

/// An index into an [`Arena`], paired with the generation it was minted for.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an index from raw parts (tests and id construction).
    #[must_use]
    pub(crate) const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Returns the raw slot number.
    #[must_use]
    pub(crate) const fn slot(self) -> u32 {
        self.slot
    }

    /// Returns the generation this index was minted for.
    #[must_use]
    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.slot, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.slot) << 32) | u64::from(self.generation));
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// A slot arena with generation-checked indices and a free list.
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slot is occupied.
    #[must_use]
    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value built by `f`, which receives the index being assigned.
    ///
    /// This lets records embed their own id without a placeholder pass.
    pub(crate) fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        self.len += 1;
        if let Some(slot_no) = self.free_head {
            let slot = &mut self.slots[slot_no as usize];
            let Slot::Vacant {
                next_free,
                generation,
            } = slot
            else {
                unreachable!("free list pointed at an occupied slot")
            };
            let generation = *generation;
            self.free_head = *next_free;
            let index = ArenaIndex::new(slot_no, generation);
            *slot = Slot::Occupied {
                value: f(index),
                generation,
            };
            index
        } else {
            let slot_no = u32::try_from(self.slots.len()).expect("arena slot overflow");
            let index = ArenaIndex::new(slot_no, 0);
            self.slots.push(Slot::Occupied {
                value: f(index),
                generation: 0,
            });
            index
        }
    }

    /// Inserts a value and returns its index.
    pub(crate) fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Removes the occupant of `index`, bumping the slot generation.
    ///
    /// Returns `None` if the index is stale or the slot is vacant.
    pub(crate) fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let next_generation = generation.wrapping_add(1);
                let old = core::mem::replace(
                    slot,
                    Slot::Vacant {
                        next_free: self.free_head,
                        generation: next_generation,
                    },
                );
                self.free_head = Some(index.slot);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => unreachable!(),
                }
            }
            _ => None,
        }
    }

    /// Returns the occupant of `index`, or `None` if the index is stale.
    #[must_use]
    pub(crate) fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.slot as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable access to the occupant of `index`.
    pub(crate) fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.slot as usize)? {
            Slot::Occupied { value, generation } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns true if `index` currently points at an occupant.
    #[must_use]
    pub(crate) fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Removes every occupant, bumping all generations.
    pub(crate) fn clear(&mut self) {
        for (slot_no, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Occupied { generation, .. } = slot {
                *slot = Slot::Vacant {
                    next_free: self.free_head,
                    generation: generation.wrapping_add(1),
                };
                self.free_head = Some(slot_no as u32);
            }
        }
        self.len = 0;
    }
}

impl<T> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("len", &self.len).finish()
    }
}

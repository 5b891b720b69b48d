// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Generational arena.
//!
//! Kernel records that used to be threaded together with raw `next` pointers
//! (library chains, exception handler records, RPC clients and servers) live
//! in arenas instead and refer to each other by [`Key`]. A key names one
//! occupancy of a slot: once the value is removed, the slot's generation
//! moves on and stale keys stop resolving.
//!
//! Keys pack into 32 bits (`generation << 16 | index`) so they can travel
//! through RPC packets as opaque handles.

#[cfg(test)]
mod arena_test;

use alloc::vec::Vec;

/// Handle to a value stored in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    index: u16,
    generation: u16,
}

impl Key {
    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Packs the key into a non-zero `u32`.
    #[inline]
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        ((self.generation as u32) << 16) | self.index as u32
    }

    /// Unpacks a key produced by [`Self::to_u32`].
    ///
    /// Returns `None` for zero, which never names a value.
    #[inline]
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        Some(Self {
            index: (raw & 0xFFFF) as u16,
            generation: (raw >> 16) as u16,
        })
    }
}

enum Slot<T> {
    Occupied { generation: u16, value: T },
    Vacant { generation: u16 },
}

/// Fixed-capacity store handing out generational keys.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
    len: usize,
    capacity: usize,
}

impl<T> Arena<T> {
    /// Creates an arena holding at most `capacity` values (clamped to 65535).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity: capacity.min(usize::from(u16::MAX)),
        }
    }

    /// Number of live values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if the arena holds no values.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of live values.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores a value.
    ///
    /// Hands the value back if the arena is full.
    pub fn insert(&mut self, value: T) -> Result<Key, T> {
        if self.len >= self.capacity {
            return Err(value);
        }
        let key = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[usize::from(index)];
            let generation = match *slot {
                Slot::Vacant { generation } => generation,
                Slot::Occupied { generation, .. } => generation,
            };
            *slot = Slot::Occupied { generation, value };
            Key { index, generation }
        } else {
            let Ok(index) = u16::try_from(self.slots.len()) else {
                return Err(value);
            };
            // Generation 1 keeps the first key of slot 0 from packing to zero.
            self.slots.push(Slot::Occupied {
                generation: 1,
                value,
            });
            Key {
                index,
                generation: 1,
            }
        };
        self.len += 1;
        Ok(key)
    }

    /// Returns the value for `key`, if it is still live.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&T> {
        match self.slots.get(key.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns the value for `key` mutably, if it is still live.
    #[must_use]
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.slots.get_mut(key.index()) {
            Some(Slot::Occupied { generation, value }) if *generation == key.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Checks if `key` still names a value.
    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Removes and returns the value for `key`.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let next = match key.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        let old = core::mem::replace(slot, Slot::Vacant { generation: next });
        self.free.push(key.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Iterates over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied { generation, value } => Some((
                Key {
                    index: i as u16,
                    generation: *generation,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }

    /// Collects the keys of all live values.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.iter().map(|(k, _)| k).collect()
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! ID types for modules, DMA bursts, packets and threads.

use core::fmt;

/// Identifier of a loaded module.
///
/// Assigned by the loader in load order, starting at 1. ID 0 is reserved and
/// never names a module.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ModuleId(u32);

impl ModuleId {
    /// The invalid/null module ID.
    pub const NULL: Self = Self(0);

    /// Creates a new module ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is the null/invalid module ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module:{}", self.0)
    }
}

/// Identifier of a queued SIF DMA burst.
///
/// Burst IDs are handed out monotonically by the SIF transport and are never
/// zero; zero is the failure return of the module-level `SetDma` entry point.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BurstId(u32);

impl BurstId {
    /// The first burst ID handed out after boot.
    pub const FIRST: Self = Self(1);

    /// Creates a burst ID from a raw value.
    ///
    /// Returns `None` for zero.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the burst ID following this one, skipping zero on wrap.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

impl fmt::Debug for BurstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BurstId({})", self.0)
    }
}

impl fmt::Display for BurstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "burst:{}", self.0)
    }
}

/// Identifier stamped into RPC packets.
///
/// A packet slot whose ID is zero is free. IDs count up per client and skip
/// zero on wrap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PacketId(u32);

impl PacketId {
    /// Marks a free packet slot.
    pub const FREE: Self = Self(0);

    /// Creates a packet ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this ID marks a free slot.
    #[inline]
    #[must_use]
    pub const fn is_free(self) -> bool {
        self.0 == 0
    }

    /// Returns the ID following this one, skipping zero on wrap.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId({})", self.0)
    }
}

/// Identifier of a thread waiting on an RPC completion.
///
/// The kernel runs a single cooperative boot thread; its ID is [`Self::BOOT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ThreadId(u32);

impl ThreadId {
    /// No thread.
    pub const NULL: Self = Self(0);

    /// The boot thread.
    pub const BOOT: Self = Self(1);

    /// Creates a thread ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Module table ABI.
//!
//! Modules publish functions through export tables and consume them through
//! import tables. Both share a 20-byte header:
//!
//! ```text
//! +0   magic     u32   EXPORT_MAGIC or IMPORT_MAGIC
//! +4   next      u32   zero in images, owned by the kernel once registered
//! +8   version   u16   major << 8 | minor
//! +10  flags     u16   NO_AUTO_LINK, ...
//! +12  name      [u8; 8], NUL padded
//! +20  entries
//! ```
//!
//! Export entries are function addresses terminated by a zero word. Import
//! entries are two-word stubs (`jr $ra` / `addiu $0, $0, ordinal`) terminated
//! by a pair of zero words.

use core::fmt;

use crate::bytes::{get_u16, get_u32, put_u32};

/// First word of an export table.
pub const EXPORT_MAGIC: u32 = 0x41C0_0000;

/// First word of an import table.
pub const IMPORT_MAGIC: u32 = 0x41E0_0000;

/// Size of the common table header.
pub const TABLE_HEADER_SIZE: u32 = 20;

/// Size of one import stub.
pub const STUB_SIZE: u32 = 8;

/// First word of an unlinked import stub (`jr $ra`).
pub const STUB_JR_RA: u32 = 0x03E0_0008;

/// Second word of an import stub without its ordinal (`addiu $0, $0, 0`).
pub const STUB_ORDINAL_OP: u32 = 0x2400_0000;

/// Library flag: never link imports against this table automatically.
pub const NO_AUTO_LINK: u16 = 0x0001;

/// Number of leading export slots every library reserves for the module
/// lifecycle (start, reinit, stop, reserved).
pub const RESERVED_EXPORTS: u16 = 4;

// =============================================================================
// Library Name
// =============================================================================

/// An 8-byte library name, NUL padded.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LibName([u8; 8]);

impl LibName {
    /// Creates a name from a string, truncating to 8 bytes.
    #[must_use]
    pub const fn new(name: &str) -> Self {
        let src = name.as_bytes();
        let mut raw = [0u8; 8];
        let mut i = 0;
        while i < src.len() && i < 8 {
            raw[i] = src[i];
            i += 1;
        }
        Self(raw)
    }

    /// Creates a name from its raw table bytes.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: [u8; 8]) -> Self {
        Self(raw)
    }

    /// Returns the raw table bytes.
    #[inline]
    #[must_use]
    pub const fn as_raw(&self) -> &[u8; 8] {
        &self.0
    }

    /// Returns the name up to the first NUL, or `"?"` if it is not UTF-8.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(8);
        core::str::from_utf8(&self.0[..len]).unwrap_or("?")
    }
}

impl fmt::Debug for LibName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LibName({:?})", self.as_str())
    }
}

impl fmt::Display for LibName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Library Version
// =============================================================================

/// A packed `major.minor` version.
///
/// Libraries match on name and major version; the minor version decides which
/// of two compatible libraries wins.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct LibVersion(u16);

impl LibVersion {
    /// Creates a version from major and minor parts.
    #[inline]
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self(((major as u16) << 8) | minor as u16)
    }

    /// Creates a version from its packed form.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the packed form.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    /// Major version.
    #[inline]
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Minor version.
    #[inline]
    #[must_use]
    pub const fn minor(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Checks whether an importer asking for `self` may link against `other`.
    #[inline]
    #[must_use]
    pub const fn is_compatible(self, other: Self) -> bool {
        self.major() == other.major()
    }
}

impl fmt::Debug for LibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LibVersion({}.{})", self.major(), self.minor())
    }
}

impl fmt::Display for LibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

// =============================================================================
// Module Start Codes
// =============================================================================

/// Value returned by a module entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCode {
    /// Stay resident; cannot be unloaded.
    ResidentEnd,
    /// Done; release the module again.
    NoResidentEnd,
    /// Stay resident; may be unloaded later.
    RemovableEnd,
}

impl StartCode {
    /// Decodes the low two bits of an entry point return value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw & 3 {
            0 => Some(Self::ResidentEnd),
            1 => Some(Self::NoResidentEnd),
            2 => Some(Self::RemovableEnd),
            _ => None,
        }
    }

    /// Encodes the start code.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::ResidentEnd => 0,
            Self::NoResidentEnd => 1,
            Self::RemovableEnd => 2,
        }
    }
}

// =============================================================================
// Table Header
// =============================================================================

/// Decoded header shared by export and import tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    /// `EXPORT_MAGIC` or `IMPORT_MAGIC`.
    pub magic: u32,
    /// Library version.
    pub version: LibVersion,
    /// Library flags.
    pub flags: u16,
    /// Library name.
    pub name: LibName,
}

impl TableHeader {
    /// Decodes a header at `offset` in `buf`.
    #[must_use]
    pub fn read(buf: &[u8], offset: usize) -> Option<Self> {
        let magic = get_u32(buf, offset)?;
        let version = LibVersion::from_raw(get_u16(buf, offset + 8)?);
        let flags = get_u16(buf, offset + 10)?;
        let raw = buf.get(offset + 12..offset + 20)?;
        let mut name = [0u8; 8];
        name.copy_from_slice(raw);
        Some(Self {
            magic,
            version,
            flags,
            name: LibName::from_raw(name),
        })
    }

    /// Encodes the header at `offset` in `buf` (the `next` word is zeroed).
    ///
    /// Returns `false` if the buffer is too small.
    pub fn write(&self, buf: &mut [u8], offset: usize) -> bool {
        let packed = u32::from(self.version.as_raw()) | (u32::from(self.flags) << 16);
        if !(put_u32(buf, offset, self.magic)
            && put_u32(buf, offset + 4, 0)
            && put_u32(buf, offset + 8, packed))
        {
            return false;
        }
        match buf.get_mut(offset + 12..offset + 20) {
            Some(dst) => {
                dst.copy_from_slice(self.name.as_raw());
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Import Stubs
// =============================================================================

/// Builds the two words of an unlinked import stub for `ordinal`.
#[inline]
#[must_use]
pub const fn stub_words(ordinal: u16) -> [u32; 2] {
    [STUB_JR_RA, STUB_ORDINAL_OP | ordinal as u32]
}

/// Extracts the ordinal from the second word of an import stub.
///
/// Returns `None` if the word is not an `addiu $0, $0, imm` instruction.
#[inline]
#[must_use]
pub const fn stub_ordinal(word: u32) -> Option<u16> {
    if word & 0xFFFF_0000 == STUB_ORDINAL_OP {
        Some((word & 0xFFFF) as u16)
    } else {
        None
    }
}

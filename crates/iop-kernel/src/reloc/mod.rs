// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! MIPS relocation for position-independent IOP modules.
//!
//! Modules are linked at address zero; loading at `base` means adding `base`
//! to every absolute reference. Supported types:
//!
//! | Type | Name | Effect |
//! |------|------|--------|
//! | 2 | `R_MIPS_32` | word += base |
//! | 4 | `R_MIPS_26` | jump target field += base >> 2 |
//! | 5 | `R_MIPS_HI16` | high half of (hi << 16) + lo + base, rounded for the low half's sign |
//! | 6 | `R_MIPS_LO16` | low half += base |
//!
//! A `HI16` takes its low half from the next `LO16` in the list. `R_MIPS_NONE`
//! and `R_MIPS_GPREL16` need no change and are skipped.


use core::fmt;

use iop_abi::bytes::{get_u32, put_u32};

/// `R_MIPS_NONE`.
pub const R_MIPS_NONE: u8 = 0;
/// `R_MIPS_32`.
pub const R_MIPS_32: u8 = 2;
/// `R_MIPS_26`.
pub const R_MIPS_26: u8 = 4;
/// `R_MIPS_HI16`.
pub const R_MIPS_HI16: u8 = 5;
/// `R_MIPS_LO16`.
pub const R_MIPS_LO16: u8 = 6;
/// `R_MIPS_GPREL16`.
pub const R_MIPS_GPREL16: u8 = 7;

const JUMP_FIELD: u32 = 0x03FF_FFFF;

/// One relocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the patched word from the image start.
    pub offset: u32,
    /// Relocation type.
    pub kind: u8,
}

impl Relocation {
    /// Creates a relocation entry.
    #[must_use]
    pub const fn new(offset: u32, kind: u8) -> Self {
        Self { offset, kind }
    }
}

/// Relocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    /// Relocation type not supported.
    UnknownType(u8),
    /// `HI16` at this offset has no following `LO16`.
    UnpairedHi16(u32),
    /// Patched word lies outside the image.
    OutOfRange(u32),
}

impl fmt::Display for RelocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(kind) => write!(f, "unsupported relocation type {kind}"),
            Self::UnpairedHi16(offset) => write!(f, "HI16 at {offset:#x} has no LO16 partner"),
            Self::OutOfRange(offset) => write!(f, "relocation at {offset:#x} outside image"),
        }
    }
}

fn word(image: &[u8], offset: u32) -> Result<u32, RelocError> {
    get_u32(image, offset as usize).ok_or(RelocError::OutOfRange(offset))
}

fn store(image: &mut [u8], offset: u32, value: u32) -> Result<(), RelocError> {
    if put_u32(image, offset as usize, value) {
        Ok(())
    } else {
        Err(RelocError::OutOfRange(offset))
    }
}

const fn sign_extend16(value: u32) -> u32 {
    (value & 0xFFFF) as u16 as i16 as i32 as u32
}

/// Applies `relocs` to an image loaded at `base`.
///
/// Either every relocation is applied or an error is returned; on error the
/// image is partially patched and must be discarded.
pub fn apply(image: &mut [u8], base: u32, relocs: &[Relocation]) -> Result<(), RelocError> {
    for (i, reloc) in relocs.iter().enumerate() {
        let offset = reloc.offset;
        match reloc.kind {
            R_MIPS_NONE | R_MIPS_GPREL16 => {}
            R_MIPS_32 => {
                let value = word(image, offset)?;
                store(image, offset, value.wrapping_add(base))?;
            }
            R_MIPS_26 => {
                let value = word(image, offset)?;
                let target = (value & JUMP_FIELD).wrapping_add(base >> 2) & JUMP_FIELD;
                store(image, offset, (value & !JUMP_FIELD) | target)?;
            }
            R_MIPS_HI16 => {
                let lo = relocs[i + 1..]
                    .iter()
                    .find(|r| r.kind == R_MIPS_LO16)
                    .ok_or(RelocError::UnpairedHi16(offset))?;
                let hi_word = word(image, offset)?;
                let lo_word = word(image, lo.offset)?;
                let ahl = (hi_word << 16).wrapping_add(sign_extend16(lo_word));
                let high = (ahl.wrapping_add(base).wrapping_add(0x8000) >> 16) & 0xFFFF;
                store(image, offset, (hi_word & 0xFFFF_0000) | high)?;
            }
            R_MIPS_LO16 => {
                let value = word(image, offset)?;
                let low = value.wrapping_add(base) & 0xFFFF;
                store(image, offset, (value & 0xFFFF_0000) | low)?;
            }
            other => return Err(RelocError::UnknownType(other)),
        }
    }
    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Little-endian word helpers shared by the wire encoders.

/// Reads a little-endian `u32` at `offset`, or `None` if out of bounds.
#[inline]
#[must_use]
pub fn get_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let bytes = buf.get(offset..end)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian `u16` at `offset`, or `None` if out of bounds.
#[inline]
#[must_use]
pub fn get_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let bytes = buf.get(offset..end)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Writes a little-endian `u32` at `offset`.
///
/// Returns `false` (and writes nothing) if the word does not fit.
#[inline]
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) -> bool {
    let Some(end) = offset.checked_add(4) else {
        return false;
    };
    match buf.get_mut(offset..end) {
        Some(dst) => {
            dst.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

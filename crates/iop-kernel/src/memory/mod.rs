// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Physical memory as seen by the kernel and the SIF DMA engine.
//!
//! All accesses are bounds checked and report a [`MemoryFault`] instead of
//! panicking. Words are little-endian and may be unaligned.


use alloc::boxed::Box;
use alloc::vec;

use iop_abi::Addr;

use crate::error::MemoryFault;

/// Flat physical memory starting at address zero.
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Memory {
    /// Creates zero-filled memory of `size` bytes.
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0u8; size as usize].into_boxed_slice(),
        }
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u32 {
        u32::try_from(self.bytes.len()).unwrap_or(u32::MAX)
    }

    /// Checks if `[addr, addr + len)` lies inside memory.
    #[must_use]
    pub fn contains(&self, addr: Addr, len: u32) -> bool {
        self.range(addr, len).is_ok()
    }

    fn range(&self, addr: Addr, len: u32) -> Result<core::ops::Range<usize>, MemoryFault> {
        let fault = MemoryFault { addr, len };
        let start = addr.as_usize();
        let end = start.checked_add(len as usize).ok_or(fault)?;
        if end > self.bytes.len() {
            return Err(fault);
        }
        Ok(start..end)
    }

    /// Borrows `len` bytes at `addr`.
    pub fn slice(&self, addr: Addr, len: u32) -> Result<&[u8], MemoryFault> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Borrows `len` bytes at `addr` mutably.
    pub fn slice_mut(&mut self, addr: Addr, len: u32) -> Result<&mut [u8], MemoryFault> {
        let range = self.range(addr, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copies `data` to `addr`.
    pub fn write(&mut self, addr: Addr, data: &[u8]) -> Result<(), MemoryFault> {
        let len = u32::try_from(data.len()).map_err(|_| MemoryFault {
            addr,
            len: u32::MAX,
        })?;
        self.slice_mut(addr, len)?.copy_from_slice(data);
        Ok(())
    }

    /// Fills `len` bytes at `addr` with `byte`.
    pub fn fill(&mut self, addr: Addr, len: u32, byte: u8) -> Result<(), MemoryFault> {
        self.slice_mut(addr, len)?.fill(byte);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dest` (regions may overlap).
    pub fn copy_within(&mut self, src: Addr, dest: Addr, len: u32) -> Result<(), MemoryFault> {
        let from = self.range(src, len)?;
        let to = self.range(dest, len)?;
        self.bytes.copy_within(from, to.start);
        Ok(())
    }

    /// Reads a word.
    pub fn read_u32(&self, addr: Addr) -> Result<u32, MemoryFault> {
        let b = self.slice(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Writes a word.
    pub fn write_u32(&mut self, addr: Addr, value: u32) -> Result<(), MemoryFault> {
        self.slice_mut(addr, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a half word.
    pub fn read_u16(&self, addr: Addr) -> Result<u16, MemoryFault> {
        let b = self.slice(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Raw view of all memory.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Block allocator for the IOP memory pool.
//!
//! The pool is tiled by blocks that are multiples of 256 bytes. Every block
//! is either free or allocated; blocks are kept in address order and always
//! cover the whole pool, so adjacent free blocks can be merged eagerly.
//!
//! # Strategies
//!
//! - **First**: lowest free block that fits; the allocation takes its low end.
//! - **Last**: highest free block that fits; the allocation takes its high
//!   end, so the returned region ends where the free block ended.
//! - **Fixed**: a caller-chosen address; succeeds only if one free block
//!   covers the whole requested interval.
//!
//! # Descriptor pages
//!
//! Block descriptors are stored in 512-byte pages (127 slots each) that the
//! allocator takes from its own pool with the Last strategy. After every
//! allocation or free a maintenance pass adds a page when fewer than
//! [`DESC_LOW_WATER`] slots are free and gives the newest one back once a
//! whole page of slots beyond the low-water reserve is unused.


mod exports;

pub(crate) use exports::library as export_library;

use alloc::vec::Vec;
use core::fmt;

use iop_abi::Addr;
use iop_abi::errno::{KE_ILLEGAL_MEMBLOCK, KE_ILLEGAL_SIZE, KE_MEMINUSE, KE_NO_MEMORY};
use iop_abi::layout::{
    BLOCK_SHIFT, BLOCK_UNIT, DESC_LOW_WATER, DESC_PAGE_SIZE, DESC_SLOTS_PER_PAGE, MAX_BLOCK_UNITS,
};
use tracing::debug;

use crate::error::ErrorKind;
use crate::kernel::KernelState;

// =============================================================================
// Public Types
// =============================================================================

/// Placement strategy for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStrategy {
    /// Lowest fitting free block.
    First,
    /// Highest fitting free block, allocated from its top.
    Last,
    /// Exactly at the given address.
    Fixed(Addr),
}

impl AllocStrategy {
    /// Decodes the `AllocSysMemory` mode argument (0 first, 1 last, 2 fixed).
    #[must_use]
    pub const fn from_abi(mode: u32, addr: u32) -> Option<Self> {
        match mode {
            0 => Some(Self::First),
            1 => Some(Self::Last),
            2 => Some(Self::Fixed(Addr::new(addr))),
            _ => None,
        }
    }
}

/// Allocator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysmemError {
    /// Zero-byte request.
    ZeroSize,
    /// Request larger than a block descriptor can express.
    TooLarge(u32),
    /// No free block fits.
    NoSpace(u32),
    /// Fixed address not on a block boundary.
    Misaligned(Addr),
    /// Address outside the pool.
    OutOfPool(Addr),
    /// Fixed request overlaps an allocated block.
    Overlap(Addr),
    /// Address does not lie in an allocated block.
    NotAllocated(Addr),
    /// Address belongs to a descriptor page owned by the allocator.
    DescriptorPage(Addr),
    /// Pool too small to hold the first descriptor page.
    PoolTooSmall(u32),
}

impl SysmemError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ZeroSize
            | Self::TooLarge(_)
            | Self::Misaligned(_)
            | Self::OutOfPool(_)
            | Self::DescriptorPage(_) => ErrorKind::Argument,
            Self::NoSpace(_) | Self::PoolTooSmall(_) => ErrorKind::ResourceExhausted,
            Self::Overlap(_) => ErrorKind::AlreadyExists,
            Self::NotAllocated(_) => ErrorKind::NotFound,
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::ZeroSize | Self::TooLarge(_) => KE_ILLEGAL_SIZE,
            Self::NoSpace(_) | Self::PoolTooSmall(_) => KE_NO_MEMORY,
            Self::Overlap(_) => KE_MEMINUSE,
            Self::Misaligned(_)
            | Self::OutOfPool(_)
            | Self::NotAllocated(_)
            | Self::DescriptorPage(_) => KE_ILLEGAL_MEMBLOCK,
        }
    }
}

impl fmt::Display for SysmemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "zero-sized allocation"),
            Self::TooLarge(size) => write!(f, "allocation of {size} bytes too large"),
            Self::NoSpace(size) => write!(f, "no free block for {size} bytes"),
            Self::Misaligned(addr) => write!(f, "address {addr} not block aligned"),
            Self::OutOfPool(addr) => write!(f, "address {addr} outside pool"),
            Self::Overlap(addr) => write!(f, "range at {addr} overlaps allocated block"),
            Self::NotAllocated(addr) => write!(f, "no allocated block at {addr}"),
            Self::DescriptorPage(addr) => write!(f, "{addr} is a descriptor page"),
            Self::PoolTooSmall(size) => write!(f, "pool of {size} bytes too small"),
        }
    }
}

/// One block descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// First byte of the block.
    pub addr: Addr,
    /// Size in bytes (multiple of 256).
    pub size: u32,
    /// Whether the block is in use.
    pub allocated: bool,
}

impl Block {
    const fn end(&self) -> u32 {
        self.addr.as_u32() + self.size
    }

    const fn contains(&self, addr: Addr) -> bool {
        addr.as_u32() >= self.addr.as_u32() && addr.as_u32() < self.end()
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// The block allocator.
pub struct SysMem {
    base: Addr,
    size: u32,
    blocks: Vec<Block>,
    desc_pages: Vec<Addr>,
}

impl SysMem {
    /// Creates an allocator managing `[base, base + size)`.
    ///
    /// `base` is rounded up and `size` down to the block unit. The first
    /// descriptor page is allocated from the top of the pool.
    pub fn new(base: Addr, size: u32) -> Result<Self, SysmemError> {
        let aligned = base
            .align_up(BLOCK_UNIT)
            .ok_or(SysmemError::OutOfPool(base))?;
        let lost = aligned.diff(base);
        let size = size.saturating_sub(lost) & !(BLOCK_UNIT - 1);
        if size < DESC_PAGE_SIZE || (size >> BLOCK_SHIFT) > MAX_BLOCK_UNITS + 1 {
            return Err(SysmemError::PoolTooSmall(size));
        }

        let mut sysmem = Self {
            base: aligned,
            size,
            blocks: alloc::vec![Block {
                addr: aligned,
                size,
                allocated: false,
            }],
            desc_pages: Vec::new(),
        };
        let page = sysmem.place(AllocStrategy::Last, DESC_PAGE_SIZE)?;
        sysmem.desc_pages.push(page);
        debug!(base = %aligned, size, page = %page, "sysmem initialised");
        Ok(sysmem)
    }

    /// Allocates `size` bytes.
    ///
    /// Returns `None` when no block fits, the size is zero or too large, or a
    /// fixed address is unusable. See [`Self::try_alloc`] for the reason.
    pub fn alloc(&mut self, strategy: AllocStrategy, size: u32) -> Option<Addr> {
        self.try_alloc(strategy, size).ok()
    }

    /// Allocates `size` bytes, reporting why a request failed.
    pub fn try_alloc(&mut self, strategy: AllocStrategy, size: u32) -> Result<Addr, SysmemError> {
        let addr = self.place(strategy, size)?;
        self.maintain();
        Ok(addr)
    }

    /// Frees the allocated block containing `addr`.
    pub fn free(&mut self, addr: Addr) -> Result<(), SysmemError> {
        if self
            .desc_pages
            .iter()
            .any(|&page| addr >= page && addr.diff(page) < DESC_PAGE_SIZE)
        {
            return Err(SysmemError::DescriptorPage(addr));
        }
        self.release(addr)?;
        self.maintain();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// First byte of the pool.
    #[must_use]
    pub const fn base(&self) -> Addr {
        self.base
    }

    /// Size of the pool in bytes.
    #[must_use]
    pub const fn pool_size(&self) -> u32 {
        self.size
    }

    /// Top of managed memory (the RAM size on a real boot).
    #[must_use]
    pub const fn query_mem_size(&self) -> u32 {
        self.base.as_u32() + self.size
    }

    /// Size of the largest free block.
    #[must_use]
    pub fn query_max_free(&self) -> u32 {
        self.free_blocks().map(|b| b.size).max().unwrap_or(0)
    }

    /// Sum of all free blocks.
    #[must_use]
    pub fn query_total_free(&self) -> u32 {
        self.free_blocks().map(|b| b.size).sum()
    }

    /// Size of the allocated block containing `addr`.
    #[must_use]
    pub fn query_block_size(&self, addr: Addr) -> Option<u32> {
        self.allocated_block(addr).map(|b| b.size)
    }

    /// Start of the allocated block containing `addr`.
    #[must_use]
    pub fn query_block_top(&self, addr: Addr) -> Option<Addr> {
        self.allocated_block(addr).map(|b| b.addr)
    }

    /// All blocks in address order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Addresses of the descriptor pages, oldest first.
    #[must_use]
    pub fn descriptor_pages(&self) -> &[Addr] {
        &self.desc_pages
    }

    /// Bytes held by descriptor pages.
    #[must_use]
    pub fn descriptor_overhead(&self) -> u32 {
        self.desc_pages.len() as u32 * DESC_PAGE_SIZE
    }

    /// Unused descriptor slots.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        (self.desc_pages.len() * DESC_SLOTS_PER_PAGE).saturating_sub(self.blocks.len())
    }

    fn free_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| !b.allocated)
    }

    fn allocated_block(&self, addr: Addr) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.allocated && b.contains(addr))
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    fn round(size: u32) -> Result<u32, SysmemError> {
        if size == 0 {
            return Err(SysmemError::ZeroSize);
        }
        let rounded = size
            .checked_add(BLOCK_UNIT - 1)
            .ok_or(SysmemError::TooLarge(size))?
            & !(BLOCK_UNIT - 1);
        if (rounded >> BLOCK_SHIFT) > MAX_BLOCK_UNITS {
            return Err(SysmemError::TooLarge(size));
        }
        Ok(rounded)
    }

    fn place(&mut self, strategy: AllocStrategy, size: u32) -> Result<Addr, SysmemError> {
        let need = Self::round(size)?;
        match strategy {
            AllocStrategy::First => {
                let index = self
                    .blocks
                    .iter()
                    .position(|b| !b.allocated && b.size >= need)
                    .ok_or(SysmemError::NoSpace(size))?;
                Ok(self.carve(index, self.blocks[index].addr, need))
            }
            AllocStrategy::Last => {
                let index = self
                    .blocks
                    .iter()
                    .rposition(|b| !b.allocated && b.size >= need)
                    .ok_or(SysmemError::NoSpace(size))?;
                let block = self.blocks[index];
                Ok(self.carve(index, Addr::new(block.end() - need), need))
            }
            AllocStrategy::Fixed(addr) => {
                if addr.is_aligned(BLOCK_UNIT) != Some(true) {
                    return Err(SysmemError::Misaligned(addr));
                }
                let end = addr
                    .as_u32()
                    .checked_add(need)
                    .ok_or(SysmemError::OutOfPool(addr))?;
                if addr < self.base || end > self.query_mem_size() {
                    return Err(SysmemError::OutOfPool(addr));
                }
                let index = self
                    .blocks
                    .iter()
                    .position(|b| b.contains(addr))
                    .ok_or(SysmemError::OutOfPool(addr))?;
                let block = self.blocks[index];
                if block.allocated || end > block.end() {
                    return Err(SysmemError::Overlap(addr));
                }
                Ok(self.carve(index, addr, need))
            }
        }
    }

    /// Marks `[addr, addr + size)` inside free block `index` as allocated,
    /// splitting off free head and tail blocks as needed.
    fn carve(&mut self, index: usize, addr: Addr, size: u32) -> Addr {
        let block = self.blocks[index];
        let head = addr.diff(block.addr);
        let tail = block.end() - addr.as_u32() - size;

        let mut replacement = Vec::with_capacity(3);
        if head > 0 {
            replacement.push(Block {
                addr: block.addr,
                size: head,
                allocated: false,
            });
        }
        replacement.push(Block {
            addr,
            size,
            allocated: true,
        });
        if tail > 0 {
            replacement.push(Block {
                addr: addr + size,
                size: tail,
                allocated: false,
            });
        }
        debug!(%addr, size, head, tail, "sysmem split");
        self.blocks.splice(index..=index, replacement);
        addr
    }

    fn release(&mut self, addr: Addr) -> Result<(), SysmemError> {
        let index = self
            .blocks
            .iter()
            .position(|b| b.contains(addr))
            .ok_or(SysmemError::NotAllocated(addr))?;
        if !self.blocks[index].allocated {
            return Err(SysmemError::NotAllocated(addr));
        }
        self.blocks[index].allocated = false;
        let mut index = index;

        if index + 1 < self.blocks.len() && !self.blocks[index + 1].allocated {
            let next = self.blocks.remove(index + 1);
            self.blocks[index].size += next.size;
        }
        if index > 0 && !self.blocks[index - 1].allocated {
            let current = self.blocks.remove(index);
            index -= 1;
            self.blocks[index].size += current.size;
        }
        let merged = self.blocks[index];
        debug!(addr = %merged.addr, size = merged.size, "sysmem merge");
        Ok(())
    }

    /// Grows or shrinks the descriptor page chain.
    fn maintain(&mut self) {
        while self.free_slots() < DESC_LOW_WATER {
            match self.place(AllocStrategy::Last, DESC_PAGE_SIZE) {
                Ok(page) => {
                    debug!(%page, pages = self.desc_pages.len() + 1, "sysmem descriptor page added");
                    self.desc_pages.push(page);
                }
                // Out of memory; the existing slots keep working until then.
                Err(_) => break,
            }
        }
        while self.desc_pages.len() > 1
            && self.free_slots() >= DESC_SLOTS_PER_PAGE + DESC_LOW_WATER
        {
            let Some(page) = self.desc_pages.pop() else {
                break;
            };
            if self.release(page).is_err() {
                self.desc_pages.push(page);
                break;
            }
            debug!(%page, pages = self.desc_pages.len(), "sysmem descriptor page released");
        }
    }
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Allocates from the system pool with interrupts suspended.
    pub fn alloc_sys_memory(
        &mut self,
        strategy: AllocStrategy,
        size: u32,
    ) -> Result<Addr, SysmemError> {
        self.critical(|k| k.sysmem.try_alloc(strategy, size))
    }

    /// Frees a block of the system pool with interrupts suspended.
    pub fn free_sys_memory(&mut self, addr: Addr) -> Result<(), SysmemError> {
        self.critical(|k| k.sysmem.free(addr))
    }
}

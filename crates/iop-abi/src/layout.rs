// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Memory layout and hardware numbering constants.
//!
//! # IOP Physical Memory
//!
//! ```text
//! 0x0000_0000  Exception vectors, kernel image (not managed)
//! 0x0001_0000  Managed pool (sysmem), up to end of RAM
//! 0x0020_0000  End of RAM (2 MB)
//! ```
//!
//! The managed pool is carved into 256-byte blocks. Block descriptors live in
//! 512-byte pages taken from the pool itself.

/// One kilobyte in bytes.
const KB: u32 = 1024;

/// One megabyte in bytes.
const MB: u32 = 1024 * KB;

// =============================================================================
// Physical Memory
// =============================================================================

/// Size of IOP main RAM.
pub const IOP_RAM_SIZE: u32 = 2 * MB;

/// First byte of the pool handed to the allocator on a real boot.
pub const DEFAULT_HEAP_BASE: u32 = 64 * KB;

// =============================================================================
// Allocator Geometry
// =============================================================================

/// Allocation granularity in bytes.
pub const BLOCK_UNIT: u32 = 256;

/// log2 of [`BLOCK_UNIT`].
pub const BLOCK_SHIFT: u32 = 8;

/// Largest block size expressible in a descriptor, in units.
///
/// The hardware descriptor word reserves 15 bits for the size.
pub const MAX_BLOCK_UNITS: u32 = 0x7FFF;

/// Size of one descriptor page.
pub const DESC_PAGE_SIZE: u32 = 512;

/// Descriptor slots per page (the last word links to the next page).
pub const DESC_SLOTS_PER_PAGE: usize = 127;

/// A new descriptor page is added when fewer than this many slots are free.
pub const DESC_LOW_WATER: usize = 3;

// =============================================================================
// Interrupt Lines
// =============================================================================

/// Number of entries in the interrupt vector table.
pub const IRQ_TABLE_SIZE: usize = 64;

/// Number of direct hardware interrupt lines.
pub const IRQ_HW_LINES: u8 = 32;

/// Vertical blank start.
pub const IRQ_VBLANK: u8 = 0;
/// Graphics synthesizer / system bus.
pub const IRQ_SBUS: u8 = 1;
/// CD/DVD drive.
pub const IRQ_CDROM: u8 = 2;
/// Composite DMA completion line (sub-sources in DICR/DICR2).
pub const IRQ_DMA: u8 = 3;
/// Root counter 0.
pub const IRQ_RTC0: u8 = 4;
/// Root counter 1.
pub const IRQ_RTC1: u8 = 5;
/// Root counter 2.
pub const IRQ_RTC2: u8 = 6;
/// Serial I/O 0 (controllers, memory cards).
pub const IRQ_SIO0: u8 = 7;
/// Serial I/O 1.
pub const IRQ_SIO1: u8 = 8;
/// Sound processor.
pub const IRQ_SPU: u8 = 9;
/// Vertical blank end.
pub const IRQ_EVBLANK: u8 = 11;
/// Serial I/O 2.
pub const IRQ_SIO2: u8 = 17;

/// First virtual line for DMA channels 0..=6 (reported through DICR).
pub const IRQ_DMA_BASE: u8 = 32;

/// First virtual line for DMA channels 7..=13 (reported through DICR2).
pub const IRQ_DMA2_BASE: u8 = 40;

/// Number of DMA channels with completion sub-sources in each DICR register.
pub const DMA_CHANNELS_PER_DICR: u8 = 7;

/// Highest DMA channel number.
pub const DMA_CHANNEL_MAX: u8 = 13;

// =============================================================================
// DMA Channels
// =============================================================================

/// SIF0: IOP to EE.
pub const DMA_CH_SIF0: u8 = 9;

/// SIF1: EE to IOP.
pub const DMA_CH_SIF1: u8 = 10;

/// SIF2: bidirectional debug channel.
pub const DMA_CH_SIF2: u8 = 11;

// =============================================================================
// Exceptions
// =============================================================================

/// Number of CPU exception codes.
pub const EXCEPTION_CODES: usize = 16;

/// Highest exception handler priority (dispatched last).
pub const EXCEPTION_PRIORITY_MAX: u8 = 3;

// =============================================================================
// SIF
// =============================================================================

/// Default capacity of one SIF DMA descriptor ring.
pub const SIF_RING_CAPACITY: usize = 32;

/// Maximum size of one SIF command packet.
pub const SIF_CMD_PACKET_MAX: u32 = 128;

/// Size of the command receive buffer each side exposes to its peer.
pub const SIF_CMD_BUFFER_SIZE: u32 = 128;

/// Number of system command slots (ids with the top bit set).
pub const SIF_SYS_CMDS: usize = 32;

/// Number of software registers set through `SET_SREG`.
pub const SIF_SREGS: usize = 32;

/// Size of one RPC packet slot.
pub const RPC_PACKET_SIZE: u32 = 64;

/// Default number of RPC packet slots per pool.
pub const RPC_PACKET_POOL: usize = 32;

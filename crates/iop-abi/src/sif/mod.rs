// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! SIF wire formats shared by the IOP and the EE.
//!
//! # Command Packet
//!
//! Every command packet starts with a 16-byte header followed by
//! `packet_size - 16` bytes of command specific payload:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | `packet_size` (u8) and `data_size` (u24) |
//! | 4 | `data_addr` (peer address the extra data was sent to) |
//! | 8 | `command` (function code) |
//! | 12 | `option` (free for the sender) |
//!
//! Command ids with the top bit set address the system command table; all
//! others index the user command table.

use crate::Addr;
use crate::bytes::{get_u32, put_u32};
use core::fmt;

#[cfg(test)]
mod sif_test;

// =============================================================================
// Command Ids
// =============================================================================

/// Top bit marking a system command id.
pub const SYSTEM_CMD: u32 = 0x8000_0000;

/// Peer changed its command receive buffer address.
pub const CMD_CHANGE_SADDR: u32 = 0x8000_0000;
/// Set one of the peer's software registers.
pub const CMD_SET_SREG: u32 = 0x8000_0001;
/// Command layer initialised on the sender.
pub const CMD_INIT_CMD: u32 = 0x8000_0002;
/// Sender is resetting.
pub const CMD_RESET_CMD: u32 = 0x8000_0003;
/// RPC: call or bind finished.
pub const CMD_RPC_END: u32 = 0x8000_0008;
/// RPC: bind to a server id.
pub const CMD_RPC_BIND: u32 = 0x8000_0009;
/// RPC: call a bound server.
pub const CMD_RPC_CALL: u32 = 0x8000_000A;
/// RPC: fetch data from the peer's memory.
pub const CMD_RPC_RDATA: u32 = 0x8000_000C;

/// Returns the index of a system command id, or `None` for user commands.
#[inline]
#[must_use]
pub const fn system_index(command: u32) -> Option<usize> {
    if command & SYSTEM_CMD != 0 {
        Some((command & !SYSTEM_CMD) as usize)
    } else {
        None
    }
}

// =============================================================================
// Command Header
// =============================================================================

/// Size of the command header in bytes.
pub const CMD_HEADER_SIZE: u32 = 16;

/// Decoded command packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdHeader {
    /// Total packet size including this header.
    pub packet_size: u8,
    /// Size of the extra data sent ahead of the packet (24 bits).
    pub data_size: u32,
    /// Where the extra data landed in the receiver's memory.
    pub data_addr: Addr,
    /// Command id.
    pub command: u32,
    /// Sender defined option word.
    pub option: u32,
}

impl CmdHeader {
    /// Creates a header for a packet without extra data.
    #[must_use]
    pub const fn new(command: u32, packet_size: u8) -> Self {
        Self {
            packet_size,
            data_size: 0,
            data_addr: Addr::null(),
            command,
            option: 0,
        }
    }

    /// Decodes a header from the start of `buf`.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let word0 = get_u32(buf, 0)?;
        Some(Self {
            packet_size: (word0 & 0xFF) as u8,
            data_size: word0 >> 8,
            data_addr: Addr::new(get_u32(buf, 4)?),
            command: get_u32(buf, 8)?,
            option: get_u32(buf, 12)?,
        })
    }

    /// Encodes the header to the start of `buf`.
    ///
    /// `data_size` is truncated to 24 bits. Returns `false` if `buf` is shorter
    /// than the header.
    pub fn encode(&self, buf: &mut [u8]) -> bool {
        let word0 = u32::from(self.packet_size) | ((self.data_size & 0x00FF_FFFF) << 8);
        put_u32(buf, 0, word0)
            && put_u32(buf, 4, self.data_addr.as_u32())
            && put_u32(buf, 8, self.command)
            && put_u32(buf, 12, self.option)
    }
}

/// Size of a `CHANGE_SADDR` packet.
pub const CHANGE_SADDR_SIZE: u8 = 20;

/// Size of a `SET_SREG` packet.
pub const SET_SREG_SIZE: u8 = 24;

/// Offset of the new buffer address in a `CHANGE_SADDR` packet.
pub const CHANGE_SADDR_BUFF: usize = 16;

/// Offset of the register index in a `SET_SREG` packet.
pub const SET_SREG_INDEX: usize = 16;

/// Offset of the register value in a `SET_SREG` packet.
pub const SET_SREG_VALUE: usize = 20;

// =============================================================================
// DMA Transfers
// =============================================================================

/// Attribute bits of a SIF DMA transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct DmaAttr(u32);

impl DmaAttr {
    /// No attributes.
    pub const NONE: Self = Self(0);
    /// Interrupt the sender when this transfer completes.
    pub const INT_I: Self = Self(0x02);
    /// Interrupt the receiver when this transfer lands.
    pub const INT_O: Self = Self(0x04);
    /// End of a DMA chain.
    pub const ERT: Self = Self(0x40);

    /// Creates attributes from raw bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks if all bits of `other` are set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both attribute sets.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `self` without the bits of `other`.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for DmaAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for DmaAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DmaAttr({:#x})", self.0)
    }
}

/// One SIF DMA transfer request.
///
/// `src` is in the sender's memory, `dest` in the receiver's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    /// Source address on the sending side.
    pub src: Addr,
    /// Destination address on the receiving side.
    pub dest: Addr,
    /// Number of bytes.
    pub size: u32,
    /// Attribute bits.
    pub attr: DmaAttr,
}

impl DmaTransfer {
    /// Creates a transfer.
    #[must_use]
    pub const fn new(src: Addr, dest: Addr, size: u32, attr: DmaAttr) -> Self {
        Self {
            src,
            dest,
            size,
            attr,
        }
    }
}

/// Progress of a queued DMA burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStatus {
    /// Waiting in a ring.
    Queued,
    /// Handed to the DMA engine.
    InFlight,
    /// Completed.
    Done,
    /// No burst with this id was issued.
    Unknown,
}

impl DmaStatus {
    /// Returns the value reported by the module-level `SetDmaStat` call.
    #[must_use]
    pub const fn as_abi(self) -> i32 {
        match self {
            Self::Queued => 1,
            Self::InFlight => 0,
            Self::Done => -1,
            Self::Unknown => -2,
        }
    }
}

// =============================================================================
// Mailbox Registers
// =============================================================================

/// SIF mailbox registers visible to both processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SifReg {
    /// EE command buffer address (written by the EE).
    MainAddr = 1,
    /// IOP command buffer address (written by the IOP).
    SubAddr = 2,
    /// EE to IOP status flags.
    MainFlag = 3,
    /// IOP to EE status flags.
    SubFlag = 4,
}

impl SifReg {
    /// Decodes a register number.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::MainAddr),
            2 => Some(Self::SubAddr),
            3 => Some(Self::MainFlag),
            4 => Some(Self::SubFlag),
            _ => None,
        }
    }

    /// Index into a four-entry register file.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

/// Flag bit: the SIF transport of the sender is up.
pub const SIF_STAT_SIFINIT: u32 = 0x1_0000;

/// Flag bit: the command layer of the sender is up.
pub const SIF_STAT_CMDINIT: u32 = 0x2_0000;

/// Flag bit: the sender finished booting.
pub const SIF_STAT_BOOTEND: u32 = 0x4_0000;

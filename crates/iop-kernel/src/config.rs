// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel configuration.

use iop_abi::layout::{
    DEFAULT_HEAP_BASE, DMA_CH_SIF0, DMA_CH_SIF1, IOP_RAM_SIZE, RPC_PACKET_POOL,
    SIF_CMD_BUFFER_SIZE, SIF_RING_CAPACITY,
};
use iop_abi::{Addr, SifReg};

/// Which end of the SIF link a kernel instance drives.
///
/// The IOP sends on SIF0 and receives on SIF1; the EE does the opposite. The
/// side also selects which mailbox registers are ours and which are the
/// peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The I/O processor.
    Iop,
    /// The main CPU.
    Ee,
}

impl Side {
    /// The other side of the link.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Iop => Self::Ee,
            Self::Ee => Self::Iop,
        }
    }

    /// DMA channel this side sends on.
    #[must_use]
    pub const fn tx_channel(self) -> u8 {
        match self {
            Self::Iop => DMA_CH_SIF0,
            Self::Ee => DMA_CH_SIF1,
        }
    }

    /// DMA channel this side receives on.
    #[must_use]
    pub const fn rx_channel(self) -> u8 {
        self.peer().tx_channel()
    }

    /// Mailbox register holding this side's command buffer address.
    #[must_use]
    pub const fn addr_reg(self) -> SifReg {
        match self {
            Self::Iop => SifReg::SubAddr,
            Self::Ee => SifReg::MainAddr,
        }
    }

    /// Mailbox register this side publishes its status flags in.
    #[must_use]
    pub const fn flag_reg(self) -> SifReg {
        match self {
            Self::Iop => SifReg::SubFlag,
            Self::Ee => SifReg::MainFlag,
        }
    }

    /// Array index, IOP first.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Iop => 0,
            Self::Ee => 1,
        }
    }
}

/// Tunables for one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Which end of the SIF link this kernel drives.
    pub side: Side,
    /// Size of physical memory in bytes.
    pub mem_size: u32,
    /// First byte of the allocator pool.
    pub heap_base: Addr,
    /// Capacity of each SIF DMA ring.
    pub dma_ring_capacity: usize,
    /// Size of the command receive buffer.
    pub cmd_buffer_size: u32,
    /// Number of user command slots.
    pub user_cmds: usize,
    /// Number of RPC request packet slots.
    pub rpc_packets: usize,
    /// Number of slots in the cyclic reply packet ring.
    pub rpc_free_packets: usize,
    /// Maximum pending requests per RPC queue.
    pub rpc_queue_depth: usize,
    /// Size of the exception handler record pool.
    pub exception_records: usize,
    /// Echo boot failures on the debug console.
    pub debug_console: bool,
}

impl KernelConfig {
    /// Configuration for real hardware on the given side.
    #[must_use]
    pub const fn new(side: Side) -> Self {
        Self {
            side,
            mem_size: IOP_RAM_SIZE,
            heap_base: Addr::new(DEFAULT_HEAP_BASE),
            dma_ring_capacity: SIF_RING_CAPACITY,
            cmd_buffer_size: SIF_CMD_BUFFER_SIZE,
            user_cmds: 32,
            rpc_packets: RPC_PACKET_POOL,
            rpc_free_packets: RPC_PACKET_POOL,
            rpc_queue_depth: 8,
            exception_records: 32,
            debug_console: true,
        }
    }

    /// Same configuration with a different memory size and pool base.
    #[must_use]
    pub const fn with_memory(mut self, mem_size: u32, heap_base: Addr) -> Self {
        self.mem_size = mem_size;
        self.heap_base = heap_base;
        self
    }

    /// Same configuration with a different DMA ring capacity.
    #[must_use]
    pub const fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.dma_ring_capacity = capacity;
        self
    }

    /// Size of the allocator pool.
    #[must_use]
    pub const fn heap_size(&self) -> u32 {
        self.mem_size.saturating_sub(self.heap_base.as_u32())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new(Side::Iop)
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! SIF command layer.
//!
//! A command is one packet of at most 128 bytes: the 16-byte
//! [`CmdHeader`] followed by command specific payload. The sender DMAs it into
//! the peer's receive buffer with [`DmaAttr::INT_O`], optionally preceded by
//! a block of extra data sent to an arbitrary peer address.
//!
//! The receive interrupt copies the packet out of the receive buffer into a
//! bounce buffer, re-arms the engine, and only then dispatches: command ids
//! with the top bit set go to the system table, all others to the user
//! table.
//!
//! Each side publishes its receive buffer address in its mailbox address
//! register. The peer's address is picked up lazily from the peer's register
//! or from a `CHANGE_SADDR` command, whichever comes first.


mod exports;

pub(crate) use exports::library as export_library;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use iop_abi::bytes::get_u32;
use iop_abi::errno::{KE_ERROR, KE_ILLEGAL_SIZE, KE_NO_MEMORY};
use iop_abi::layout::{SIF_CMD_PACKET_MAX, SIF_SREGS, SIF_SYS_CMDS};
use iop_abi::sif::{
    CHANGE_SADDR_BUFF, CHANGE_SADDR_SIZE, CMD_CHANGE_SADDR, CMD_HEADER_SIZE, CMD_SET_SREG,
    SET_SREG_INDEX, SET_SREG_SIZE, SET_SREG_VALUE, SIF_STAT_CMDINIT, system_index,
};
use iop_abi::{Addr, BurstId, CmdHeader, DmaAttr, DmaTransfer};
use tracing::{debug, trace, warn};

use crate::error::{ErrorKind, MemoryFault};
use crate::intrman::{IntrError, IrqLine};
use crate::kernel::KernelState;
use crate::sysmem::AllocStrategy;

/// Command handler.
///
/// Receives the whole packet (header included) and the argument given at
/// registration. Runs in interrupt context.
pub type CmdHandler = fn(&mut KernelState, &[u8], u32);

/// SIF command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SifError {
    /// The send ring cannot take the packet right now.
    RingFull,
    /// The command layer is not up or the peer's buffer is unknown.
    NotInitialized,
    /// Packet size outside 16..=128 bytes.
    PacketSize(u32),
    /// Command id has no slot in the handler tables.
    HandlerIndex(u32),
    /// No memory for the command buffers.
    NoMemory(u32),
    /// Packet or extra data outside physical memory.
    Memory(MemoryFault),
    /// Interrupt line setup failed.
    Intr(IntrError),
}

impl SifError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RingFull | Self::NoMemory(_) => ErrorKind::ResourceExhausted,
            Self::NotInitialized | Self::PacketSize(_) | Self::HandlerIndex(_) => {
                ErrorKind::Argument
            }
            Self::Memory(e) => e.kind(),
            Self::Intr(e) => e.kind(),
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::RingFull | Self::NotInitialized | Self::HandlerIndex(_) => KE_ERROR,
            Self::PacketSize(_) => KE_ILLEGAL_SIZE,
            Self::NoMemory(_) => KE_NO_MEMORY,
            Self::Memory(e) => e.code(),
            Self::Intr(e) => e.code(),
        }
    }
}

impl fmt::Display for SifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingFull => write!(f, "send ring full"),
            Self::NotInitialized => write!(f, "command layer not initialised"),
            Self::PacketSize(size) => write!(f, "bad packet size {size}"),
            Self::HandlerIndex(cmd) => write!(f, "no handler slot for command {cmd:#x}"),
            Self::NoMemory(size) => write!(f, "no memory for {size} bytes of buffers"),
            Self::Memory(e) => write!(f, "{e}"),
            Self::Intr(e) => write!(f, "{e}"),
        }
    }
}

impl From<MemoryFault> for SifError {
    fn from(e: MemoryFault) -> Self {
        Self::Memory(e)
    }
}

impl From<IntrError> for SifError {
    fn from(e: IntrError) -> Self {
        Self::Intr(e)
    }
}

/// Extra data sent ahead of a command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraData {
    /// Source in local memory.
    pub src: Addr,
    /// Destination in the peer's memory.
    pub dest: Addr,
    /// Number of bytes.
    pub size: u32,
}

#[derive(Debug, Clone, Copy)]
struct CmdEntry {
    handler: CmdHandler,
    arg: u32,
}

/// Command layer state.
pub struct CmdState {
    initialized: bool,
    recv_buffer: Option<Addr>,
    /// Slots `send_cmd_bytes` copies packets into until the DMA picks them up.
    staging: Option<Addr>,
    staging_slots: u32,
    staging_next: u32,
    peer_buffer: Option<Addr>,
    system: [Option<CmdEntry>; SIF_SYS_CMDS],
    user: Vec<Option<CmdEntry>>,
    sregs: [u32; SIF_SREGS],
}

impl CmdState {
    /// Creates the handler tables; buffers are allocated by
    /// [`KernelState::sif_cmd_init`].
    #[must_use]
    pub fn new(user_cmds: usize, staging_slots: usize) -> Self {
        Self {
            initialized: false,
            recv_buffer: None,
            staging: None,
            staging_slots: u32::try_from(staging_slots).unwrap_or(u32::MAX).max(1),
            staging_next: 0,
            peer_buffer: None,
            system: [None; SIF_SYS_CMDS],
            user: vec![None; user_cmds],
            sregs: [0; SIF_SREGS],
        }
    }

    fn slot_mut(&mut self, command: u32) -> Option<&mut Option<CmdEntry>> {
        match system_index(command) {
            Some(index) => self.system.get_mut(index),
            None => self.user.get_mut(command as usize),
        }
    }

    fn entry(&self, command: u32) -> Option<CmdEntry> {
        match system_index(command) {
            Some(index) => self.system.get(index).copied().flatten(),
            None => self.user.get(command as usize).copied().flatten(),
        }
    }
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Allocates the command buffers, hooks the receive interrupt and
    /// publishes the receive buffer to the peer.
    pub fn sif_cmd_init(&mut self) -> Result<(), SifError> {
        if self.cmd.initialized {
            return Ok(());
        }
        self.sif_init()?;
        let side = self.config().side;
        let buffer_size = self.config().cmd_buffer_size.max(SIF_CMD_PACKET_MAX);
        let staging_size = self.cmd.staging_slots * SIF_CMD_PACKET_MAX;
        let recv = self
            .alloc_sys_memory(AllocStrategy::First, buffer_size)
            .map_err(|_| SifError::NoMemory(buffer_size))?;
        let staging = match self.alloc_sys_memory(AllocStrategy::First, staging_size) {
            Ok(addr) => addr,
            Err(_) => {
                // Just allocated, so the free cannot fail.
                let _ = self.free_sys_memory(recv);
                return Err(SifError::NoMemory(staging_size));
            }
        };
        self.cmd.recv_buffer = Some(recv);
        self.cmd.staging = Some(staging);
        self.cmd.system[0] = Some(CmdEntry {
            handler: change_saddr,
            arg: 0,
        });
        self.cmd.system[1] = Some(CmdEntry {
            handler: set_sreg,
            arg: 0,
        });

        let line = IrqLine::dma(side.rx_channel())
            .ok_or(IntrError::IllegalLine(side.rx_channel()))?
            .as_u8();
        self.register_intr_handler(line, 0, rx_complete, 0)?;
        self.enable_intr(line)?;
        self.sif_port_mut().arm_receive();

        self.sif_set_reg(side.addr_reg(), recv.as_u32());
        let flags = self.sif_get_reg(side.flag_reg());
        self.sif_set_reg(side.flag_reg(), flags | SIF_STAT_CMDINIT);
        self.cmd.initialized = true;
        debug!(?side, buffer = %recv, "sif command layer initialised");

        if self.sif_check_init() {
            let mut payload = [0u8; 4];
            payload.copy_from_slice(&recv.as_u32().to_le_bytes());
            self.send_cmd_bytes(CMD_CHANGE_SADDR, &payload, None)?;
        }
        Ok(())
    }

    /// Resolves the peer's receive buffer; returns whether it is known.
    pub fn sif_check_init(&mut self) -> bool {
        if self.cmd.peer_buffer.is_none() {
            let peer = self.config().side.peer();
            let addr = self.sif_get_reg(peer.addr_reg());
            if addr != 0 {
                debug!(buffer = %Addr::new(addr), "peer command buffer found");
                self.cmd.peer_buffer = Some(Addr::new(addr));
            }
        }
        self.cmd.peer_buffer.is_some()
    }

    /// Receive buffer of this side.
    #[must_use]
    pub const fn cmd_buffer(&self) -> Option<Addr> {
        self.cmd.recv_buffer
    }

    /// Sends the packet of `size` bytes at `packet`.
    ///
    /// The header is filled in place: size, command and the extra data
    /// fields are written, the option word is kept. The packet memory must
    /// stay untouched until the returned burst is done.
    pub fn send_cmd(
        &mut self,
        command: u32,
        packet: Addr,
        size: u32,
        extra: Option<ExtraData>,
    ) -> Result<BurstId, SifError> {
        if !(CMD_HEADER_SIZE..=SIF_CMD_PACKET_MAX).contains(&size) {
            return Err(SifError::PacketSize(size));
        }
        if !self.cmd.initialized || !self.sif_check_init() {
            return Err(SifError::NotInitialized);
        }
        let peer = self.cmd.peer_buffer.ok_or(SifError::NotInitialized)?;
        let extra = extra.filter(|e| e.size > 0);

        let option = self.memory().read_u32(packet + 12)?;
        let header = CmdHeader {
            packet_size: size as u8,
            data_size: extra.map_or(0, |e| e.size),
            data_addr: extra.map_or(Addr::null(), |e| e.dest),
            command,
            option,
        };
        header.encode(self.memory_mut().slice_mut(packet, CMD_HEADER_SIZE)?);

        let mut transfers = Vec::with_capacity(2);
        if let Some(e) = extra {
            self.memory().slice(e.src, e.size)?;
            transfers.push(DmaTransfer::new(e.src, e.dest, e.size, DmaAttr::NONE));
        }
        transfers.push(DmaTransfer::new(packet, peer, size, DmaAttr::INT_O));
        let id = self.set_dma(&transfers).ok_or(SifError::RingFull)?;
        trace!(command, size, %id, "sif command queued");
        Ok(id)
    }

    /// Sends a packet built from `payload`, which follows the header.
    ///
    /// The packet is copied into a staging slot; slots are reused round
    /// robin.
    pub fn send_cmd_bytes(
        &mut self,
        command: u32,
        payload: &[u8],
        extra: Option<ExtraData>,
    ) -> Result<BurstId, SifError> {
        let size = CMD_HEADER_SIZE as usize + payload.len();
        let Ok(size) = u32::try_from(size) else {
            return Err(SifError::PacketSize(u32::MAX));
        };
        if size > SIF_CMD_PACKET_MAX {
            return Err(SifError::PacketSize(size));
        }
        let staging = self.cmd.staging.ok_or(SifError::NotInitialized)?;
        let slot = staging + self.cmd.staging_next * SIF_CMD_PACKET_MAX;
        self.cmd.staging_next = (self.cmd.staging_next + 1) % self.cmd.staging_slots;
        let memory = self.memory_mut();
        memory.fill(slot, CMD_HEADER_SIZE, 0)?;
        memory.write(slot + CMD_HEADER_SIZE, payload)?;
        self.send_cmd(command, slot, size, extra)
    }

    /// Binds `handler` to `command`.
    ///
    /// Replaces any previous handler.
    pub fn add_cmd_handler(
        &mut self,
        command: u32,
        handler: CmdHandler,
        arg: u32,
    ) -> Result<(), SifError> {
        self.critical(|k| {
            let slot = k
                .cmd
                .slot_mut(command)
                .ok_or(SifError::HandlerIndex(command))?;
            *slot = Some(CmdEntry { handler, arg });
            Ok(())
        })
    }

    /// Unbinds the handler of `command`.
    pub fn remove_cmd_handler(&mut self, command: u32) -> Result<(), SifError> {
        self.critical(|k| {
            let slot = k
                .cmd
                .slot_mut(command)
                .ok_or(SifError::HandlerIndex(command))?;
            *slot = None;
            Ok(())
        })
    }

    /// Software register `index`, as last set by the peer.
    #[must_use]
    pub fn get_sreg(&self, index: usize) -> Option<u32> {
        self.cmd.sregs.get(index).copied()
    }

    /// Sets software register `index` on the peer.
    pub fn set_peer_sreg(&mut self, index: u32, value: u32) -> Result<BurstId, SifError> {
        if index as usize >= SIF_SREGS {
            return Err(SifError::HandlerIndex(index));
        }
        let mut payload = [0u8; (SET_SREG_SIZE as usize) - CMD_HEADER_SIZE as usize];
        payload[..4].copy_from_slice(&index.to_le_bytes());
        payload[4..].copy_from_slice(&value.to_le_bytes());
        self.send_cmd_bytes(CMD_SET_SREG, &payload, None)
    }

    fn dispatch_cmd(&mut self, packet: &[u8]) {
        let Some(header) = CmdHeader::decode(packet) else {
            return;
        };
        match self.cmd.entry(header.command) {
            Some(entry) => (entry.handler)(self, packet, entry.arg),
            None => warn!(command = header.command, "no handler for sif command"),
        }
    }
}

/// Interrupt handler for the receive channel.
fn rx_complete(k: &mut KernelState, _arg: u32) -> bool {
    let Some(buffer) = k.cmd.recv_buffer else {
        return true;
    };
    let mut bounce = [0u8; SIF_CMD_PACKET_MAX as usize];
    let copied = k
        .memory()
        .slice(buffer, SIF_CMD_PACKET_MAX)
        .map(|live| {
            let size = usize::from(live[0]).clamp(CMD_HEADER_SIZE as usize, live.len());
            bounce[..size].copy_from_slice(&live[..size]);
            size
        });
    k.sif_port_mut().arm_receive();
    match copied {
        Ok(size) => k.dispatch_cmd(&bounce[..size]),
        Err(e) => warn!(error = %e, "sif receive buffer unreadable"),
    }
    true
}

/// `CHANGE_SADDR`: the peer moved its receive buffer.
fn change_saddr(k: &mut KernelState, packet: &[u8], _arg: u32) {
    if usize::from(packet[0]) < usize::from(CHANGE_SADDR_SIZE) {
        return;
    }
    if let Some(addr) = get_u32(packet, CHANGE_SADDR_BUFF) {
        debug!(buffer = %Addr::new(addr), "peer command buffer changed");
        k.cmd.peer_buffer = (addr != 0).then_some(Addr::new(addr));
    }
}

/// `SET_SREG`: the peer set one of our software registers.
fn set_sreg(k: &mut KernelState, packet: &[u8], _arg: u32) {
    let (Some(index), Some(value)) = (
        get_u32(packet, SET_SREG_INDEX),
        get_u32(packet, SET_SREG_VALUE),
    ) else {
        return;
    };
    if let Some(reg) = k.cmd.sregs.get_mut(index as usize) {
        *reg = value;
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Hardware traits.

use alloc::boxed::Box;

use iop_abi::{DmaTransfer, SifReg};

use crate::console::Console;

/// Interrupt controller registers.
///
/// # Register semantics
///
/// | Register | Read | Write |
/// |----------|------|-------|
/// | `Stat` | pending lines 0..=31 | set bits acknowledge (clear) those lines |
/// | `Mask` | enabled lines | replaces the mask |
/// | `Ctrl` | global enable (1/0) | replaces the global enable |
/// | `Dicr` | bits 16..=22 enable DMA channels 0..=6, bits 24..=30 their flags | enable bits replaced, set flag bits acknowledge |
/// | `Dicr2` | same layout for DMA channels 7..=13 | same |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntcReg {
    /// Pending interrupt lines.
    Stat,
    /// Per-line enable mask.
    Mask,
    /// Global enable.
    Ctrl,
    /// DMA interrupt control, channels 0..=6.
    Dicr,
    /// DMA interrupt control, channels 7..=13.
    Dicr2,
}

/// Interrupt controller register file.
pub trait InterruptController {
    /// Reads a register.
    fn read(&self, reg: IntcReg) -> u32;

    /// Writes a register.
    fn write(&mut self, reg: IntcReg, value: u32);

    /// Replaces the global enable and returns the previous value in one step.
    ///
    /// The returned value is the save/restore token for nested critical
    /// sections; it must be written back unchanged.
    fn swap_ctrl(&mut self, value: u32) -> u32;
}

/// SIF DMA engine and mailbox registers of one side.
pub trait SifPort {
    /// Checks if the send channel is still transferring a burst.
    fn busy(&self) -> bool;

    /// Starts sending a burst of transfers.
    ///
    /// The engine raises the send channel's completion interrupt after the
    /// transfer carrying [`iop_abi::DmaAttr::INT_I`].
    fn start(&mut self, burst: &[DmaTransfer]);

    /// Re-arms the receive channel after an incoming packet was consumed.
    fn arm_receive(&mut self);

    /// Reads a mailbox register.
    fn read_reg(&self, reg: SifReg) -> u32;

    /// Writes a mailbox register.
    fn write_reg(&mut self, reg: SifReg, value: u32);
}

/// The hardware one kernel instance drives.
pub struct Hardware {
    /// Interrupt controller.
    pub intc: Box<dyn InterruptController>,
    /// SIF DMA engine and mailbox.
    pub sif: Box<dyn SifPort>,
    /// Debug console.
    pub console: Box<dyn Console>,
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Interrupt manager.
//!
//! Owns the hardware vector table: at most one handler per interrupt line.
//! Lines 0..=31 are the controller's own sources. Line 3 is the composite DMA
//! completion line whose sub-sources live in DICR (channels 0..=6) and DICR2
//! (channels 7..=13); they are addressed as lines 32..=38 and 40..=46.
//!
//! Dispatch is an exception handler on
//! [`EXC_INTERRUPT`](crate::excepman::EXC_INTERRUPT) installed by
//! [`KernelState::intr_init`] at the lowest priority. It services pending,
//! unmasked lines until the status register reads clear, and loops over the
//! DMA flags the same way because a completion can land mid-service.

#[cfg(test)]
mod intrman_test;

mod exports;

pub(crate) use exports::library as export_library;

use alloc::vec::Vec;
use core::fmt;

use iop_abi::errno::{KE_FOUND_HANDLER, KE_ILLEGAL_CONTEXT, KE_ILLEGAL_INTRCODE, KE_NOTFOUND_HANDLER};
use iop_abi::layout::{
    DMA_CHANNEL_MAX, DMA_CHANNELS_PER_DICR, IRQ_DMA, IRQ_DMA_BASE, IRQ_DMA2_BASE, IRQ_HW_LINES,
    IRQ_TABLE_SIZE,
};
use tracing::{debug, trace};

use crate::error::ErrorKind;
use crate::excepman::{Disposition, ExcepError, ExceptionFrame};
use crate::kernel::KernelState;
use crate::platform::IntcReg;

/// DICR bits enabling channel interrupts, plus the master enable.
const DICR_ENABLE_MASK: u32 = 0x00FF_0000;

/// DICR master enable.
const DICR_MASTER: u32 = 1 << 23;

// =============================================================================
// Public Types
// =============================================================================

/// Interrupt handler.
///
/// Receives the argument given at registration. Returning `false` disables
/// the line.
pub type IntrHandler = fn(&mut KernelState, u32) -> bool;

/// Validated interrupt line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqLine(u8);

impl IrqLine {
    /// Validates a raw line number.
    #[must_use]
    pub const fn new(line: u8) -> Option<Self> {
        let valid = line < IRQ_HW_LINES
            || (line >= IRQ_DMA_BASE && line < IRQ_DMA_BASE + DMA_CHANNELS_PER_DICR)
            || (line >= IRQ_DMA2_BASE && line < IRQ_DMA2_BASE + DMA_CHANNELS_PER_DICR);
        if valid { Some(Self(line)) } else { None }
    }

    /// Line carrying the completion interrupt of DMA channel `channel`.
    #[must_use]
    pub const fn dma(channel: u8) -> Option<Self> {
        if channel > DMA_CHANNEL_MAX {
            None
        } else if channel < DMA_CHANNELS_PER_DICR {
            Some(Self(IRQ_DMA_BASE + channel))
        } else {
            Some(Self(IRQ_DMA2_BASE + channel - DMA_CHANNELS_PER_DICR))
        }
    }

    /// Raw line number.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// DMA channel this line reports, if it is a DMA sub-source.
    #[must_use]
    pub const fn dma_channel(self) -> Option<u8> {
        if self.0 >= IRQ_DMA2_BASE {
            Some(self.0 - IRQ_DMA2_BASE + DMA_CHANNELS_PER_DICR)
        } else if self.0 >= IRQ_DMA_BASE {
            Some(self.0 - IRQ_DMA_BASE)
        } else {
            None
        }
    }

    /// DICR register and bit position for a DMA sub-source.
    const fn dicr_slot(self) -> Option<(IntcReg, u8)> {
        match self.dma_channel() {
            Some(ch) if ch < DMA_CHANNELS_PER_DICR => Some((IntcReg::Dicr, ch)),
            Some(ch) => Some((IntcReg::Dicr2, ch - DMA_CHANNELS_PER_DICR)),
            None => None,
        }
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dma_channel() {
            Some(ch) => write!(f, "irq:{}(dma{ch})", self.0),
            None => write!(f, "irq:{}", self.0),
        }
    }
}

/// Token returned by [`KernelState::cpu_suspend_intr`].
///
/// Holds the global enable as it was before suspension and must be handed
/// back to [`KernelState::cpu_resume_intr`] exactly once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "interrupts stay suspended until the token is resumed"]
pub struct SuspendToken {
    saved: u32,
}

impl SuspendToken {
    /// Checks if interrupts were enabled when the token was taken.
    #[must_use]
    pub const fn was_enabled(&self) -> bool {
        self.saved != 0
    }
}

/// Interrupt manager failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrError {
    /// Line number out of range.
    IllegalLine(u8),
    /// A handler is already bound to the line.
    HandlerFound(u8),
    /// No handler is bound to the line.
    HandlerNotFound(u8),
    /// Operation not allowed from interrupt context.
    IllegalContext,
}

impl IntrError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalLine(_) | Self::IllegalContext => ErrorKind::Argument,
            Self::HandlerFound(_) => ErrorKind::AlreadyExists,
            Self::HandlerNotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::IllegalLine(_) => KE_ILLEGAL_INTRCODE,
            Self::HandlerFound(_) => KE_FOUND_HANDLER,
            Self::HandlerNotFound(_) => KE_NOTFOUND_HANDLER,
            Self::IllegalContext => KE_ILLEGAL_CONTEXT,
        }
    }
}

impl fmt::Display for IntrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalLine(line) => write!(f, "illegal interrupt line {line}"),
            Self::HandlerFound(line) => write!(f, "line {line} already has a handler"),
            Self::HandlerNotFound(line) => write!(f, "line {line} has no handler"),
            Self::IllegalContext => write!(f, "not allowed in interrupt context"),
        }
    }
}

// =============================================================================
// Vector Table
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct IntrEntry {
    handler: IntrHandler,
    arg: u32,
    mode: u32,
}

/// Hardware vector table and dispatch state.
pub struct IntrTable {
    entries: [Option<IntrEntry>; IRQ_TABLE_SIZE],
    in_context: bool,
    /// Tokens taken through the export library, innermost last.
    abi_tokens: Vec<SuspendToken>,
}

impl IntrTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [None; IRQ_TABLE_SIZE],
            in_context: false,
            abi_tokens: Vec::new(),
        }
    }

    fn entry(&self, line: IrqLine) -> Option<IntrEntry> {
        self.entries[usize::from(line.as_u8())]
    }
}

impl Default for IntrTable {
    fn default() -> Self {
        Self::new()
    }
}

fn check_line(line: u8) -> Result<IrqLine, IntrError> {
    IrqLine::new(line).ok_or(IntrError::IllegalLine(line))
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Installs the dispatcher and enables interrupts globally.
    pub(crate) fn intr_init(&mut self) -> Result<(), ExcepError> {
        self.install_interrupt_dispatcher(dispatch)?;
        self.intc_mut().write(IntcReg::Mask, 0);
        self.intc_mut().write(IntcReg::Ctrl, 1);
        debug!("intrman initialised");
        Ok(())
    }

    /// Binds `handler` to `line`.
    ///
    /// `mode` is recorded for the module ABI and has no effect on dispatch.
    /// The line stays masked until [`Self::enable_intr`].
    pub fn register_intr_handler(
        &mut self,
        line: u8,
        mode: u32,
        handler: IntrHandler,
        arg: u32,
    ) -> Result<(), IntrError> {
        let line = check_line(line)?;
        if self.intr.in_context {
            return Err(IntrError::IllegalContext);
        }
        self.critical(|k| {
            let slot = &mut k.intr.entries[usize::from(line.as_u8())];
            if slot.is_some() {
                return Err(IntrError::HandlerFound(line.as_u8()));
            }
            *slot = Some(IntrEntry { handler, arg, mode });
            Ok(())
        })?;
        debug!(%line, mode, arg, "interrupt handler registered");
        Ok(())
    }

    /// Unbinds the handler of `line` and masks the line.
    pub fn release_intr_handler(&mut self, line: u8) -> Result<(), IntrError> {
        let irq = check_line(line)?;
        if self.intr.in_context {
            return Err(IntrError::IllegalContext);
        }
        self.critical(|k| {
            if k.intr.entries[usize::from(line)].take().is_none() {
                return Err(IntrError::HandlerNotFound(line));
            }
            k.set_line_enabled(irq, false);
            Ok(())
        })?;
        debug!(line = %irq, "interrupt handler released");
        Ok(())
    }

    /// Unmasks `line`.
    pub fn enable_intr(&mut self, line: u8) -> Result<(), IntrError> {
        let irq = check_line(line)?;
        self.critical(|k| k.set_line_enabled(irq, true));
        trace!(line = %irq, "interrupt enabled");
        Ok(())
    }

    /// Masks `line`, returning whether it was enabled.
    pub fn disable_intr(&mut self, line: u8) -> Result<bool, IntrError> {
        let irq = check_line(line)?;
        let was = self.critical(|k| k.set_line_enabled(irq, false));
        trace!(line = %irq, was, "interrupt disabled");
        Ok(was)
    }

    /// Checks if the line is unmasked.
    #[must_use]
    pub fn intr_enabled(&self, line: u8) -> bool {
        let Some(irq) = IrqLine::new(line) else {
            return false;
        };
        match irq.dicr_slot() {
            Some((reg, bit)) => self.intc().read(reg) & (1 << (16 + bit)) != 0,
            None => self.intc().read(IntcReg::Mask) & (1 << line) != 0,
        }
    }

    /// Argument and mode the handler of `line` was registered with.
    #[must_use]
    pub fn intr_handler_info(&self, line: u8) -> Option<(u32, u32)> {
        let irq = IrqLine::new(line)?;
        self.intr.entry(irq).map(|e| (e.arg, e.mode))
    }

    /// Checks if an interrupt is being dispatched.
    #[must_use]
    pub const fn query_intr_context(&self) -> bool {
        self.intr.in_context
    }

    /// Disables interrupts globally and returns the restore token.
    pub fn cpu_suspend_intr(&mut self) -> SuspendToken {
        SuspendToken {
            saved: self.intc_mut().swap_ctrl(0),
        }
    }

    /// Restores the global enable captured in `token`.
    pub fn cpu_resume_intr(&mut self, token: SuspendToken) {
        self.intc_mut().write(IntcReg::Ctrl, token.saved);
    }

    /// Applies a mask change and returns the previous state of the line.
    fn set_line_enabled(&mut self, line: IrqLine, enable: bool) -> bool {
        let intc = self.intc_mut();
        if let Some((reg, bit)) = line.dicr_slot() {
            let current = intc.read(reg) & DICR_ENABLE_MASK;
            let flag = 1 << (16 + bit);
            let was = current & flag != 0;
            let next = if enable { current | flag } else { current & !flag };
            intc.write(reg, next);
            if enable {
                let dicr = intc.read(IntcReg::Dicr) & DICR_ENABLE_MASK;
                intc.write(IntcReg::Dicr, dicr | DICR_MASTER);
                let mask = intc.read(IntcReg::Mask);
                intc.write(IntcReg::Mask, mask | (1 << IRQ_DMA));
            }
            was
        } else {
            let bit = 1 << line.as_u8();
            let mask = intc.read(IntcReg::Mask);
            intc.write(IntcReg::Mask, if enable { mask | bit } else { mask & !bit });
            mask & bit != 0
        }
    }

    fn run_intr(&mut self, line: IrqLine) {
        let Some(entry) = self.intr.entry(line) else {
            debug!(%line, "spurious interrupt");
            return;
        };
        if !(entry.handler)(self, entry.arg) {
            debug!(%line, "handler declined, line disabled");
            self.set_line_enabled(line, false);
        }
    }

    /// Services DMA completion flags until both DICR registers read clear.
    fn service_dma(&mut self) {
        loop {
            let mut serviced = false;
            for (reg, base) in [(IntcReg::Dicr, IRQ_DMA_BASE), (IntcReg::Dicr2, IRQ_DMA2_BASE)] {
                let value = self.intc().read(reg);
                let flags = (value >> 24) & 0x7F;
                if flags == 0 {
                    continue;
                }
                let bit = flags.trailing_zeros() as u8;
                let enables = value & DICR_ENABLE_MASK;
                self.intc_mut().write(reg, enables | (1 << (24 + bit)));
                if let Some(line) = IrqLine::new(base + bit) {
                    self.run_intr(line);
                }
                serviced = true;
            }
            if !serviced {
                break;
            }
        }
    }
}

/// Exception handler for the interrupt exception.
fn dispatch(k: &mut KernelState, _frame: &mut ExceptionFrame) -> Disposition {
    let outer = core::mem::replace(&mut k.intr.in_context, true);
    loop {
        let pending = k.intc().read(IntcReg::Stat) & k.intc().read(IntcReg::Mask);
        if pending == 0 {
            break;
        }
        let line = pending.trailing_zeros() as u8;
        k.intc_mut().write(IntcReg::Stat, 1 << line);
        if line == IRQ_DMA {
            k.service_dma();
        } else if let Some(irq) = IrqLine::new(line) {
            k.run_intr(irq);
        }
    }
    k.intr.in_context = outer;
    Disposition::Handled
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Mock hardware for testing.
//!
//! Mocks are cheap handles around shared state: the kernel owns one clone
//! inside its [`super::Hardware`], the test (or the [`super::SifBus`]) keeps
//! another to raise interrupts and inspect DMA traffic.

use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use iop_abi::layout::{DMA_CHANNEL_MAX, DMA_CHANNELS_PER_DICR, IRQ_DMA};
use iop_abi::{DmaTransfer, SifReg};

use super::traits::{Hardware, IntcReg, InterruptController, SifPort};
use crate::console::MockConsole;

/// DICR enable bits (channels plus master enable).
const DICR_ENABLE_MASK: u32 = 0x00FF_0000;

/// DICR flag bits.
const DICR_FLAG_MASK: u32 = 0x7F00_0000;

// =============================================================================
// Interrupt Controller
// =============================================================================

#[derive(Debug, Default)]
struct IntcRegs {
    stat: u32,
    mask: u32,
    ctrl: u32,
    dicr: u32,
    dicr2: u32,
}

/// Mock interrupt controller with write-to-acknowledge status registers.
#[derive(Debug, Clone, Default)]
pub struct MockIntc {
    regs: Rc<RefCell<IntcRegs>>,
}

impl MockIntc {
    /// Creates a controller with everything masked and disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises a hardware line (0..=31).
    pub fn raise(&self, line: u8) {
        if line < 32 {
            self.regs.borrow_mut().stat |= 1 << line;
        }
    }

    /// Signals completion on a DMA channel.
    ///
    /// Like the hardware, the channel flag is only latched when the channel's
    /// interrupt is enabled in DICR/DICR2.
    pub fn raise_dma(&self, channel: u8) {
        if channel > DMA_CHANNEL_MAX {
            return;
        }
        let mut regs = self.regs.borrow_mut();
        let (reg, bit) = if channel < DMA_CHANNELS_PER_DICR {
            (&mut regs.dicr, channel)
        } else {
            (&mut regs.dicr2, channel - DMA_CHANNELS_PER_DICR)
        };
        if *reg & (1 << (16 + bit)) == 0 {
            return;
        }
        *reg |= 1 << (24 + bit);
        regs.stat |= 1 << IRQ_DMA;
    }

    /// Pending lines (unmasked view of `Stat`).
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.regs.borrow().stat
    }

    /// Current mask register.
    #[must_use]
    pub fn mask(&self) -> u32 {
        self.regs.borrow().mask
    }

    /// Current global enable.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.regs.borrow().ctrl != 0
    }
}

impl InterruptController for MockIntc {
    fn read(&self, reg: IntcReg) -> u32 {
        let regs = self.regs.borrow();
        match reg {
            IntcReg::Stat => regs.stat,
            IntcReg::Mask => regs.mask,
            IntcReg::Ctrl => regs.ctrl,
            IntcReg::Dicr => regs.dicr,
            IntcReg::Dicr2 => regs.dicr2,
        }
    }

    fn write(&mut self, reg: IntcReg, value: u32) {
        let mut regs = self.regs.borrow_mut();
        match reg {
            IntcReg::Stat => regs.stat &= !value,
            IntcReg::Mask => regs.mask = value,
            IntcReg::Ctrl => regs.ctrl = value & 1,
            IntcReg::Dicr => regs.dicr = write_dicr(regs.dicr, value),
            IntcReg::Dicr2 => regs.dicr2 = write_dicr(regs.dicr2, value),
        }
    }

    fn swap_ctrl(&mut self, value: u32) -> u32 {
        let mut regs = self.regs.borrow_mut();
        core::mem::replace(&mut regs.ctrl, value & 1)
    }
}

const fn write_dicr(old: u32, value: u32) -> u32 {
    let flags = old & DICR_FLAG_MASK & !(value & DICR_FLAG_MASK);
    (value & DICR_ENABLE_MASK) | flags
}

// =============================================================================
// SIF Port
// =============================================================================

#[derive(Debug)]
pub(super) struct InFlight {
    pub(super) transfers: Vec<DmaTransfer>,
    pub(super) cursor: usize,
}

#[derive(Debug, Default)]
pub(super) struct PortState {
    pub(super) in_flight: Option<InFlight>,
    pub(super) rx_armed: bool,
    pub(super) history: Vec<Vec<DmaTransfer>>,
}

/// Mock SIF DMA engine for one side of the link.
///
/// Bursts handed to [`SifPort::start`] stay in flight until the
/// [`super::SifBus`] delivers them (or a test takes them with
/// [`Self::take_in_flight`]).
#[derive(Debug, Clone)]
pub struct MockSifPort {
    pub(super) state: Rc<RefCell<PortState>>,
    pub(super) mailbox: Rc<RefCell<[u32; 4]>>,
}

impl MockSifPort {
    /// Creates a port with its own private mailbox.
    #[must_use]
    pub fn standalone() -> Self {
        Self::with_mailbox(Rc::new(RefCell::new([0; 4])))
    }

    pub(super) fn with_mailbox(mailbox: Rc<RefCell<[u32; 4]>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PortState::default())),
            mailbox,
        }
    }

    /// Every burst started so far, oldest first.
    #[must_use]
    pub fn bursts(&self) -> Vec<Vec<DmaTransfer>> {
        self.state.borrow().history.clone()
    }

    /// Removes the burst currently in flight, as if the engine finished it.
    pub fn take_in_flight(&self) -> Option<Vec<DmaTransfer>> {
        self.state
            .borrow_mut()
            .in_flight
            .take()
            .map(|f| f.transfers)
    }

    /// Checks if the receive channel is armed.
    #[must_use]
    pub fn rx_armed(&self) -> bool {
        self.state.borrow().rx_armed
    }
}

impl SifPort for MockSifPort {
    fn busy(&self) -> bool {
        self.state.borrow().in_flight.is_some()
    }

    fn start(&mut self, burst: &[DmaTransfer]) {
        let mut state = self.state.borrow_mut();
        state.history.push(burst.to_vec());
        state.in_flight = Some(InFlight {
            transfers: burst.to_vec(),
            cursor: 0,
        });
    }

    fn arm_receive(&mut self) {
        self.state.borrow_mut().rx_armed = true;
    }

    fn read_reg(&self, reg: SifReg) -> u32 {
        self.mailbox.borrow()[reg.index()]
    }

    fn write_reg(&mut self, reg: SifReg, value: u32) {
        self.mailbox.borrow_mut()[reg.index()] = value;
    }
}

// =============================================================================
// Hardware Bundle
// =============================================================================

/// Mock hardware for one standalone kernel.
///
/// The send channel never completes on its own; tests finish bursts with
/// [`MockSifPort::take_in_flight`] and raise the completion themselves.
#[derive(Debug, Clone)]
pub struct MockHardware {
    /// Interrupt controller handle.
    pub intc: MockIntc,
    /// SIF port handle.
    pub sif: MockSifPort,
    /// Console handle.
    pub console: MockConsole,
}

impl MockHardware {
    /// Creates fresh mocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            intc: MockIntc::new(),
            sif: MockSifPort::standalone(),
            console: MockConsole::new(),
        }
    }

    /// Hardware bundle sharing state with these handles.
    #[must_use]
    pub fn hardware(&self) -> Hardware {
        Hardware {
            intc: Box::new(self.intc.clone()),
            sif: Box::new(self.sif.clone()),
            console: Box::new(self.console.clone()),
        }
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Host-side SIF link between two kernels.
//!
//! The bus owns the mock hardware of both sides. Both ports share one
//! mailbox register file. [`SifBus::pump`] plays the DMA engine: it copies
//! the transfers of in-flight bursts from the sender's memory into the
//! receiver's, raises the channel interrupts and lets each kernel take them.

use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;

use iop_abi::{DmaAttr, DmaTransfer};
use tracing::{trace, warn};

use super::mock::{MockIntc, MockSifPort};
use super::traits::Hardware;
use crate::config::Side;
use crate::console::MockConsole;
use crate::kernel::KernelState;

/// Mock hardware of one end of the link.
#[derive(Debug, Clone)]
struct End {
    intc: MockIntc,
    port: MockSifPort,
    console: MockConsole,
}

/// Two mock SIF ports wired back to back.
#[derive(Debug, Clone)]
pub struct SifBus {
    ends: [End; 2],
}

impl SifBus {
    /// Creates the link with both ends idle and a zeroed mailbox.
    #[must_use]
    pub fn new() -> Self {
        let mailbox = Rc::new(RefCell::new([0; 4]));
        let end = || End {
            intc: MockIntc::new(),
            port: MockSifPort::with_mailbox(Rc::clone(&mailbox)),
            console: MockConsole::new(),
        };
        Self {
            ends: [end(), end()],
        }
    }

    /// Hardware bundle for the kernel on `side`.
    #[must_use]
    pub fn hardware(&self, side: Side) -> Hardware {
        let end = &self.ends[side.index()];
        Hardware {
            intc: Box::new(end.intc.clone()),
            sif: Box::new(end.port.clone()),
            console: Box::new(end.console.clone()),
        }
    }

    /// Console output of `side`.
    #[must_use]
    pub fn console(&self, side: Side) -> &MockConsole {
        &self.ends[side.index()].console
    }

    /// Port of `side`.
    #[must_use]
    pub fn port(&self, side: Side) -> &MockSifPort {
        &self.ends[side.index()].port
    }

    /// Delivers queued traffic in both directions until the link is quiet.
    ///
    /// A transfer that raises the receive interrupt waits until the
    /// receiver has re-armed its channel. Returns the number of transfers
    /// delivered.
    pub fn pump(&self, a: &mut KernelState, b: &mut KernelState) -> usize {
        let mut delivered = 0;
        loop {
            let moved = self.drain(a, b) + self.drain(b, a);
            if moved == 0 {
                return delivered;
            }
            delivered += moved;
        }
    }

    /// Moves transfers of the burst `from` has in flight.
    fn drain(&self, from: &mut KernelState, to: &mut KernelState) -> usize {
        let tx = &self.ends[from.config().side.index()];
        let rx = &self.ends[to.config().side.index()];
        let mut moved = 0;
        loop {
            let Some((transfer, last)) = next_transfer(&tx.port) else {
                return moved;
            };
            let raises = transfer.attr.contains(DmaAttr::INT_O);
            if raises && !rx.port.state.borrow().rx_armed {
                return moved;
            }

            copy(from, to, &transfer);
            moved += 1;
            advance(&tx.port, last);
            if raises {
                rx.port.state.borrow_mut().rx_armed = false;
                rx.intc.raise_dma(to.config().side.rx_channel());
                to.poll_interrupts();
            }
            if last {
                tx.intc.raise_dma(from.config().side.tx_channel());
                from.poll_interrupts();
            }
        }
    }
}

impl Default for SifBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Next undelivered transfer of the burst in flight and whether it ends the
/// burst.
fn next_transfer(port: &MockSifPort) -> Option<(DmaTransfer, bool)> {
    let state = port.state.borrow();
    let flight = state.in_flight.as_ref()?;
    let transfer = *flight.transfers.get(flight.cursor)?;
    Some((transfer, flight.cursor + 1 == flight.transfers.len()))
}

fn advance(port: &MockSifPort, last: bool) {
    let mut state = port.state.borrow_mut();
    if last {
        state.in_flight = None;
    } else if let Some(flight) = state.in_flight.as_mut() {
        flight.cursor += 1;
    }
}

fn copy(from: &KernelState, to: &mut KernelState, transfer: &DmaTransfer) {
    let data = match from.memory().slice(transfer.src, transfer.size) {
        Ok(data) => data.to_vec(),
        Err(e) => {
            warn!(error = %e, "sif transfer source out of range");
            return;
        }
    };
    if let Err(e) = to.memory_mut().write(transfer.dest, &data) {
        warn!(error = %e, "sif transfer destination out of range");
        return;
    }
    trace!(src = %transfer.src, dest = %transfer.dest, size = transfer.size, "sif transfer");
}

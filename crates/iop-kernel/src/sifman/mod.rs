// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! SIF DMA transport.
//!
//! Outgoing transfers are collected in two fixed-capacity rings. One ring is
//! handed to the DMA engine as a burst while the other fills up; when the
//! burst completes the rings swap and the next burst starts from the
//! completion interrupt, so queued transfers go out without a gap.
//!
//! Every burst gets the next [`BurstId`]. Transfers queued together share the
//! id of the burst they ride in, and [`KernelState::dma_stat`] reports its
//! progress without blocking.
//!
//! # Handshake
//!
//! Each side announces itself by setting [`SIF_STAT_SIFINIT`] in its own
//! mailbox flag register. The peer side is considered alive once its flag
//! register carries the same bit.

#[cfg(test)]
mod sifman_test;

mod exports;

pub(crate) use exports::library as export_library;

use alloc::vec::Vec;

use iop_abi::sif::{DmaStatus, SIF_STAT_SIFINIT};
use iop_abi::{BurstId, DmaAttr, DmaTransfer, SifReg};
use tracing::{debug, trace};

use crate::intrman::{IntrError, IrqLine};
use crate::kernel::KernelState;

/// Callback run from the send completion interrupt before the next burst
/// starts.
pub type DmaCallback = fn(&mut KernelState, u32);

/// Send-side transport state.
pub struct SifTransport {
    capacity: usize,
    rings: [Vec<DmaTransfer>; 2],
    /// Ring currently accepting transfers.
    active: usize,
    /// Id the burst in the active ring will get.
    next_id: BurstId,
    in_flight: Option<BurstId>,
    /// Bursts handed to the engine so far, saturating.
    started: u32,
    callback: Option<(DmaCallback, u32)>,
    initialized: bool,
}

impl SifTransport {
    /// Creates an idle transport with rings of `capacity` transfers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: [Vec::with_capacity(capacity), Vec::with_capacity(capacity)],
            active: 0,
            next_id: BurstId::FIRST,
            in_flight: None,
            started: 0,
            callback: None,
            initialized: false,
        }
    }

    /// Free slots in the ring accepting transfers.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.capacity - self.rings[self.active].len()
    }

    /// Burst currently handed to the engine.
    #[must_use]
    pub const fn in_flight(&self) -> Option<BurstId> {
        self.in_flight
    }

    /// Progress of burst `id`.
    #[must_use]
    pub fn status(&self, id: BurstId) -> DmaStatus {
        if self.in_flight == Some(id) {
            DmaStatus::InFlight
        } else if id == self.next_id {
            if self.rings[self.active].is_empty() {
                DmaStatus::Unknown
            } else {
                DmaStatus::Queued
            }
        } else if self.issued(id) {
            DmaStatus::Done
        } else {
            DmaStatus::Unknown
        }
    }

    /// Checks if `id` belongs to a burst already handed to the engine.
    fn issued(&self, id: BurstId) -> bool {
        let behind = self.next_id.as_u32().wrapping_sub(id.as_u32());
        behind != 0 && behind <= self.started
    }
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Hooks the send completion interrupt and announces this side.
    pub fn sif_init(&mut self) -> Result<(), IntrError> {
        if self.sif.initialized {
            return Ok(());
        }
        let side = self.config().side;
        let line = IrqLine::dma(side.tx_channel())
            .ok_or(IntrError::IllegalLine(side.tx_channel()))?
            .as_u8();
        self.register_intr_handler(line, 0, tx_complete, 0)?;
        self.enable_intr(line)?;
        let flags = self.sif_port().read_reg(side.flag_reg());
        self.sif_port_mut()
            .write_reg(side.flag_reg(), flags | SIF_STAT_SIFINIT);
        self.sif.initialized = true;
        debug!(?side, "sif transport initialised");
        Ok(())
    }

    /// Queues transfers for sending.
    ///
    /// All transfers are queued or none is. Returns `None` if the ring
    /// accepting transfers cannot take them all. The completion interrupt is
    /// requested only for the last transfer of each burst, so any `INT_I`
    /// given here is ignored.
    pub fn set_dma(&mut self, transfers: &[DmaTransfer]) -> Option<BurstId> {
        if transfers.is_empty() {
            return None;
        }
        self.critical(|k| {
            if transfers.len() > k.sif.free_slots() {
                trace!(count = transfers.len(), "sif ring full");
                return None;
            }
            let ring = &mut k.sif.rings[k.sif.active];
            ring.extend(transfers.iter().map(|t| DmaTransfer {
                attr: t.attr.without(DmaAttr::INT_I),
                ..*t
            }));
            let id = k.sif.next_id;
            if k.sif.in_flight.is_none() && !k.sif_port().busy() {
                k.start_burst();
            }
            Some(id)
        })
    }

    /// Progress of a burst returned by [`Self::set_dma`].
    #[must_use]
    pub fn dma_stat(&self, id: BurstId) -> DmaStatus {
        self.sif.status(id)
    }

    /// Installs the callback run on every send completion.
    pub fn set_dma_callback(&mut self, callback: Option<(DmaCallback, u32)>) {
        self.sif.callback = callback;
    }

    /// Reads a mailbox register.
    #[must_use]
    pub fn sif_get_reg(&self, reg: SifReg) -> u32 {
        self.sif_port().read_reg(reg)
    }

    /// Writes a mailbox register and returns the previous value.
    pub fn sif_set_reg(&mut self, reg: SifReg, value: u32) -> u32 {
        let old = self.sif_port().read_reg(reg);
        self.sif_port_mut().write_reg(reg, value);
        old
    }

    /// Checks if the peer announced its transport.
    #[must_use]
    pub fn sif_peer_alive(&self) -> bool {
        let peer = self.config().side.peer();
        self.sif_get_reg(peer.flag_reg()) & SIF_STAT_SIFINIT != 0
    }

    /// Hands the active ring to the engine and swaps rings.
    fn start_burst(&mut self) {
        let active = self.sif.active;
        let Some(last) = self.sif.rings[active].last_mut() else {
            return;
        };
        last.attr = last.attr | DmaAttr::INT_I;
        let id = self.sif.next_id;
        self.sif.in_flight = Some(id);
        self.sif.next_id = id.next();
        self.sif.started = self.sif.started.saturating_add(1);
        self.sif.active ^= 1;
        let burst = core::mem::take(&mut self.sif.rings[active]);
        debug!(%id, transfers = burst.len(), "sif burst started");
        self.sif_port_mut().start(&burst);
        self.sif.rings[active] = burst;
    }
}

/// Interrupt handler for the send channel.
fn tx_complete(k: &mut KernelState, _arg: u32) -> bool {
    if let Some(id) = k.sif.in_flight.take() {
        trace!(%id, "sif burst done");
    }
    let done = k.sif.active ^ 1;
    k.sif.rings[done].clear();
    if let Some((callback, arg)) = k.sif.callback {
        callback(k, arg);
    }
    if k.sif.in_flight.is_none() && !k.sif.rings[k.sif.active].is_empty() {
        k.start_burst();
    }
    k.flush_deferred_replies();
    true
}

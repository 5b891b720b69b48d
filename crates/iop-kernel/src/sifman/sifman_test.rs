// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the SIF DMA transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use iop_abi::Addr;
use iop_abi::sif::SIF_STAT_SIFINIT;

use super::*;
use crate::kernel::test_kernel;
use crate::loadcore::{ExportTarget, status};
use crate::platform::MockHardware;

const MARKER: u32 = 0x200;

fn transfer(n: u32) -> DmaTransfer {
    DmaTransfer::new(
        Addr::new(0x1000 + n * 16),
        Addr::new(0x8000 + n * 16),
        16,
        DmaAttr::NONE,
    )
}

/// Finishes the burst in flight the way the engine would.
fn complete(k: &mut KernelState, hw: &MockHardware) -> Vec<DmaTransfer> {
    let burst = hw.sif.take_in_flight().expect("burst in flight");
    hw.intc.raise_dma(k.config().side.tx_channel());
    assert!(k.poll_interrupts());
    burst
}

fn mark(k: &mut KernelState, arg: u32) {
    let addr = Addr::new(MARKER);
    let n = k.memory().read_u32(addr).unwrap();
    k.memory_mut().write_u32(addr, n + arg).unwrap();
}

fn call(k: &mut KernelState, ordinal: usize, args: &[u32]) -> u32 {
    let f = match export_library().entries[ordinal] {
        ExportTarget::Native(f) => Some(f),
        _ => None,
    };
    f.expect("native export")(k, args)
}

#[test]
fn first_transfer_starts_immediately() {
    let (mut k, hw) = test_kernel();
    let id = k.set_dma(&[transfer(0)]).unwrap();
    assert_eq!(id, BurstId::FIRST);
    assert_eq!(k.dma_stat(id), DmaStatus::InFlight);
    assert_eq!(hw.sif.bursts().len(), 1);
}

#[test]
fn full_ring_rejects_and_only_last_transfer_interrupts() {
    let (mut k, hw) = test_kernel();
    let capacity = k.config().dma_ring_capacity;
    let first = k.set_dma(&[transfer(0)]).unwrap();

    // The engine is busy, so everything lands in the other ring.
    let mut queued = None;
    for n in 0..capacity {
        let id = k.set_dma(&[transfer(n as u32)]).unwrap();
        assert_ne!(id, first);
        assert_eq!(*queued.get_or_insert(id), id);
    }
    assert_eq!(k.sif.free_slots(), 0);
    assert_eq!(k.set_dma(&[transfer(99)]), None);

    let queued = queued.unwrap();
    assert_eq!(k.dma_stat(queued), DmaStatus::Queued);
    complete(&mut k, &hw);
    assert_eq!(k.dma_stat(first), DmaStatus::Done);
    assert_eq!(k.dma_stat(queued), DmaStatus::InFlight);

    let burst = &hw.sif.bursts()[1];
    assert_eq!(burst.len(), capacity);
    let (last, rest) = burst.split_last().unwrap();
    assert!(last.attr.contains(DmaAttr::INT_I));
    assert!(rest.iter().all(|t| !t.attr.contains(DmaAttr::INT_I)));
}

#[test]
fn batches_are_all_or_nothing() {
    let (mut k, _hw) = test_kernel();
    let capacity = k.config().dma_ring_capacity;
    k.set_dma(&[transfer(0)]).unwrap();
    let batch: Vec<_> = (0..capacity as u32 - 1).map(transfer).collect();
    k.set_dma(&batch).unwrap();
    assert_eq!(k.sif.free_slots(), 1);

    assert_eq!(k.set_dma(&[transfer(1), transfer(2)]), None);
    assert_eq!(k.sif.free_slots(), 1);
    assert!(k.set_dma(&[]).is_none());
}

#[test]
fn caller_interrupt_requests_are_ignored() {
    let (mut k, hw) = test_kernel();
    let mut noisy = transfer(0);
    noisy.attr = DmaAttr::INT_I | DmaAttr::ERT;
    k.set_dma(&[noisy, transfer(1)]).unwrap();
    let burst = &hw.sif.bursts()[0];
    assert_eq!(burst[0].attr, DmaAttr::ERT);
    assert!(burst[1].attr.contains(DmaAttr::INT_I));
}

#[test]
fn completion_runs_callback_then_chains() {
    let (mut k, hw) = test_kernel();
    k.set_dma_callback(Some((mark, 3)));
    k.set_dma(&[transfer(0)]).unwrap();
    let second = k.set_dma(&[transfer(1)]).unwrap();

    complete(&mut k, &hw);
    assert_eq!(k.memory().read_u32(Addr::new(MARKER)).unwrap(), 3);
    assert_eq!(k.sif.in_flight(), Some(second));

    complete(&mut k, &hw);
    assert_eq!(k.memory().read_u32(Addr::new(MARKER)).unwrap(), 6);
    assert_eq!(k.sif.in_flight(), None);
    assert_eq!(k.dma_stat(second), DmaStatus::Done);
}

#[test]
fn ids_never_issued_are_unknown() {
    let (mut k, hw) = test_kernel();
    assert_eq!(k.dma_stat(BurstId::FIRST), DmaStatus::Unknown);

    let first = k.set_dma(&[transfer(0)]).unwrap();
    complete(&mut k, &hw);
    assert_eq!(k.dma_stat(first), DmaStatus::Done);
    assert_eq!(k.dma_stat(first.next()), DmaStatus::Unknown);
    assert_eq!(k.dma_stat(BurstId::new(77).unwrap()), DmaStatus::Unknown);
    assert_eq!(call(&mut k, 5, &[77]), status(DmaStatus::Unknown.as_abi()));
}

#[test]
fn mailbox_handshake() {
    let (mut k, _hw) = test_kernel();
    assert_ne!(k.sif_get_reg(SifReg::SubFlag) & SIF_STAT_SIFINIT, 0);
    assert!(!k.sif_peer_alive());

    assert_eq!(k.sif_set_reg(SifReg::MainFlag, SIF_STAT_SIFINIT), 0);
    assert!(k.sif_peer_alive());
    assert_eq!(k.sif_set_reg(SifReg::MainFlag, 0), SIF_STAT_SIFINIT);
}

#[test]
fn set_dma_export_reads_descriptors() {
    let (mut k, hw) = test_kernel();
    let table = Addr::new(0x400);
    for (i, t) in [transfer(0), transfer(1)].iter().enumerate() {
        let at = table + i as u32 * 16;
        k.memory_mut().write_u32(at, t.src.as_u32()).unwrap();
        k.memory_mut().write_u32(at + 4, t.dest.as_u32()).unwrap();
        k.memory_mut().write_u32(at + 8, t.size).unwrap();
        k.memory_mut().write_u32(at + 12, 0).unwrap();
    }
    let id = call(&mut k, 4, &[table.as_u32(), 2]);
    assert_eq!(id, BurstId::FIRST.as_u32());
    assert_eq!(hw.sif.bursts()[0].len(), 2);

    assert_eq!(call(&mut k, 5, &[id]), 0);
    complete(&mut k, &hw);
    assert_eq!(call(&mut k, 5, &[id]) as i32, -1);

    assert_eq!(call(&mut k, 7, &[SifReg::MainFlag as u32, SIF_STAT_SIFINIT]), 0);
    assert_eq!(call(&mut k, 6, &[SifReg::MainFlag as u32]), SIF_STAT_SIFINIT);
    assert_eq!(call(&mut k, 8, &[]), 1);
}

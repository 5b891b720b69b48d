// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Integration tests for exception and interrupt dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use iop_abi::Addr;
use iop_abi::layout::{IRQ_SIO2, IRQ_VBLANK};
use iop_kernel::excepman::{Disposition, EXC_BREAK, EXC_INTERRUPT, ExceptionFrame};
use iop_kernel::intrman::IrqLine;
use iop_kernel::platform::MockHardware;
use iop_kernel::{KernelConfig, KernelState};

/// Dispatch log: a count followed by one tag per handler run.
const LOG: Addr = Addr::new(0x100);

fn kernel() -> (KernelState, MockHardware) {
    let mock = MockHardware::new();
    let k = KernelState::start(KernelConfig::default(), mock.hardware()).unwrap();
    (k, mock)
}

fn log(k: &mut KernelState, tag: u32) {
    let n = k.memory().read_u32(LOG).unwrap();
    k.memory_mut().write_u32(LOG + 4 + n * 4, tag).unwrap();
    k.memory_mut().write_u32(LOG, n + 1).unwrap();
}

fn logged(k: &KernelState) -> Vec<u32> {
    let n = k.memory().read_u32(LOG).unwrap();
    (0..n)
        .map(|i| k.memory().read_u32(LOG + 4 + i * 4).unwrap())
        .collect()
}

fn tag_prio0(k: &mut KernelState, _f: &mut ExceptionFrame) -> Disposition {
    log(k, 0);
    Disposition::Pass
}

fn tag_prio1(k: &mut KernelState, _f: &mut ExceptionFrame) -> Disposition {
    log(k, 1);
    Disposition::Pass
}

fn tag_prio2(k: &mut KernelState, _f: &mut ExceptionFrame) -> Disposition {
    log(k, 2);
    Disposition::Pass
}

fn tag_default(k: &mut KernelState, _f: &mut ExceptionFrame) -> Disposition {
    log(k, 99);
    Disposition::Handled
}

fn vblank(k: &mut KernelState, arg: u32) -> bool {
    log(k, arg);
    true
}

#[test]
fn priorities_dispatch_low_first_and_end_at_default() {
    let (mut k, _hw) = kernel();
    k.register_default_exception_handler(tag_default).unwrap();
    k.register_priority_exception_handler(EXC_BREAK, 2, tag_prio2).unwrap();
    k.register_priority_exception_handler(EXC_BREAK, 0, tag_prio0).unwrap();
    k.register_priority_exception_handler(EXC_BREAK, 1, tag_prio1).unwrap();

    let mut frame = ExceptionFrame::new(EXC_BREAK);
    let disposition = k.raise_exception(EXC_BREAK, &mut frame).unwrap();

    assert_eq!(disposition, Disposition::Handled);
    assert_eq!(logged(&k), [0, 1, 2, 99]);
}

#[test]
fn interrupt_dispatch_shares_the_exception_chain() {
    let (mut k, hw) = kernel();
    k.register_priority_exception_handler(EXC_INTERRUPT, 0, tag_prio0)
        .unwrap();
    k.register_intr_handler(IRQ_VBLANK, 0, vblank, 7).unwrap();
    k.enable_intr(IRQ_VBLANK).unwrap();

    hw.intc.raise(IRQ_VBLANK);
    assert!(k.poll_interrupts());
    assert_eq!(logged(&k), [0, 7]);
}

#[test]
fn dma_completions_are_serviced_per_channel() {
    let (mut k, hw) = kernel();
    for channel in [2u8, 11] {
        let line = IrqLine::dma(channel).unwrap().as_u8();
        k.register_intr_handler(line, 0, vblank, u32::from(channel))
            .unwrap();
        k.enable_intr(line).unwrap();
    }
    hw.intc.raise_dma(11);
    hw.intc.raise_dma(2);
    assert!(k.poll_interrupts());

    let mut seen = logged(&k);
    seen.sort_unstable();
    assert_eq!(seen, [2, 11]);
    assert_eq!(hw.intc.pending(), 0);
}

#[test]
fn suspended_kernel_defers_interrupts() {
    let (mut k, hw) = kernel();
    k.register_intr_handler(IRQ_SIO2, 0, vblank, 3).unwrap();
    k.enable_intr(IRQ_SIO2).unwrap();

    let token = k.cpu_suspend_intr();
    hw.intc.raise(IRQ_SIO2);
    assert!(!k.poll_interrupts());
    k.cpu_resume_intr(token);

    assert!(k.poll_interrupts());
    assert_eq!(logged(&k), [3]);
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the interrupt manager.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use iop_abi::layout::{EXCEPTION_PRIORITY_MAX, IRQ_CDROM, IRQ_DMA, IRQ_VBLANK};

use super::*;
use crate::excepman::EXC_INTERRUPT;
use crate::kernel::test_kernel;

/// Counts invocations in the word at address `arg`.
fn count(k: &mut KernelState, arg: u32) -> bool {
    let addr = iop_abi::Addr::new(arg);
    let n = k.memory().read_u32(addr).unwrap();
    k.memory_mut().write_u32(addr, n + 1).unwrap();
    true
}

fn decline(_k: &mut KernelState, _arg: u32) -> bool {
    false
}

/// Records whether the handler saw interrupt context.
fn context_probe(k: &mut KernelState, arg: u32) -> bool {
    let seen = u32::from(k.query_intr_context());
    k.memory_mut().write_u32(iop_abi::Addr::new(arg), seen).unwrap();
    true
}

const COUNTER: u32 = 0x100;

fn counter(k: &KernelState) -> u32 {
    k.memory().read_u32(iop_abi::Addr::new(COUNTER)).unwrap()
}

#[test]
fn irq_line_validation() {
    assert!(IrqLine::new(0).is_some());
    assert!(IrqLine::new(31).is_some());
    assert!(IrqLine::new(38).is_some());
    assert!(IrqLine::new(39).is_none());
    assert!(IrqLine::new(46).is_some());
    assert!(IrqLine::new(47).is_none());
    assert_eq!(IrqLine::dma(0).unwrap().as_u8(), 32);
    assert_eq!(IrqLine::dma(9).unwrap().as_u8(), 42);
    assert_eq!(IrqLine::dma(10).unwrap().dma_channel(), Some(10));
    assert!(IrqLine::dma(14).is_none());
    assert_eq!(IrqLine::new(IRQ_CDROM).unwrap().dma_channel(), None);
}

#[test]
fn dispatcher_is_registered_last_on_interrupt_code() {
    let (k, _hw) = test_kernel();
    let chain = k.exception_chain(EXC_INTERRUPT);
    assert_eq!(chain.last().map(|e| e.1), Some(EXCEPTION_PRIORITY_MAX));
}

#[test]
fn hardware_line_dispatch() {
    let (mut k, hw) = test_kernel();
    k.register_intr_handler(IRQ_VBLANK, 0, count, COUNTER).unwrap();

    // Masked lines stay pending.
    hw.intc.raise(IRQ_VBLANK);
    assert!(!k.poll_interrupts());
    assert_eq!(counter(&k), 0);

    k.enable_intr(IRQ_VBLANK).unwrap();
    assert!(k.poll_interrupts());
    assert_eq!(counter(&k), 1);
    assert_eq!(hw.intc.pending(), 0);
    assert!(!k.query_intr_context());
}

#[test]
fn duplicate_and_missing_handlers() {
    let (mut k, _hw) = test_kernel();
    k.register_intr_handler(IRQ_CDROM, 0, count, COUNTER).unwrap();
    assert_eq!(
        k.register_intr_handler(IRQ_CDROM, 0, decline, 0),
        Err(IntrError::HandlerFound(IRQ_CDROM))
    );
    assert_eq!(k.register_intr_handler(39, 0, count, 0), Err(IntrError::IllegalLine(39)));
    k.release_intr_handler(IRQ_CDROM).unwrap();
    assert_eq!(
        k.release_intr_handler(IRQ_CDROM),
        Err(IntrError::HandlerNotFound(IRQ_CDROM))
    );
    assert_eq!(IntrError::HandlerFound(0).code(), KE_FOUND_HANDLER);
}

#[test]
fn dma_sub_source_dispatch() {
    let (mut k, hw) = test_kernel();
    let line = IrqLine::dma(4).unwrap().as_u8();
    k.register_intr_handler(line, 0, count, COUNTER).unwrap();

    // Disabled channels do not latch.
    hw.intc.raise_dma(4);
    assert!(!k.poll_interrupts());

    k.enable_intr(line).unwrap();
    assert!(k.intr_enabled(line));
    assert_ne!(hw.intc.mask() & (1 << IRQ_DMA), 0);
    hw.intc.raise_dma(4);
    assert!(k.poll_interrupts());
    assert_eq!(counter(&k), 1);
    assert_eq!(k.intc().read(IntcReg::Dicr) & 0x7F00_0000, 0);
}

#[test]
fn dicr2_channels_are_serviced() {
    let (mut k, hw) = test_kernel();
    let a = IrqLine::dma(2).unwrap().as_u8();
    let b = IrqLine::dma(11).unwrap().as_u8();
    k.register_intr_handler(a, 0, count, COUNTER).unwrap();
    k.register_intr_handler(b, 0, count, COUNTER).unwrap();
    k.enable_intr(a).unwrap();
    k.enable_intr(b).unwrap();
    hw.intc.raise_dma(2);
    hw.intc.raise_dma(11);
    assert!(k.poll_interrupts());
    assert_eq!(counter(&k), 2);
}

#[test]
fn declining_handler_disables_line() {
    let (mut k, hw) = test_kernel();
    k.register_intr_handler(IRQ_CDROM, 0, decline, 0).unwrap();
    k.enable_intr(IRQ_CDROM).unwrap();
    hw.intc.raise(IRQ_CDROM);
    assert!(k.poll_interrupts());
    assert!(!k.intr_enabled(IRQ_CDROM));
}

#[test]
fn disable_reports_previous_state() {
    let (mut k, _hw) = test_kernel();
    assert!(!k.disable_intr(IRQ_VBLANK).unwrap());
    k.enable_intr(IRQ_VBLANK).unwrap();
    assert!(k.disable_intr(IRQ_VBLANK).unwrap());
    let dma = IrqLine::dma(9).unwrap().as_u8();
    k.enable_intr(dma).unwrap();
    assert!(k.disable_intr(dma).unwrap());
    assert!(!k.intr_enabled(dma));
}

#[test]
fn handlers_run_in_interrupt_context() {
    let (mut k, hw) = test_kernel();
    k.register_intr_handler(IRQ_VBLANK, 0, context_probe, COUNTER).unwrap();
    k.enable_intr(IRQ_VBLANK).unwrap();
    hw.intc.raise(IRQ_VBLANK);
    k.poll_interrupts();
    assert_eq!(counter(&k), 1);
    assert!(!k.query_intr_context());
}

#[test]
fn suspend_resume_nests_by_value() {
    let (mut k, hw) = test_kernel();
    assert!(hw.intc.enabled());
    let outer = k.cpu_suspend_intr();
    assert!(outer.was_enabled());
    let inner = k.cpu_suspend_intr();
    assert!(!inner.was_enabled());
    k.cpu_resume_intr(inner);
    assert!(!hw.intc.enabled());
    k.cpu_resume_intr(outer);
    assert!(hw.intc.enabled());
}

#[test]
fn suspended_interrupts_are_not_delivered() {
    let (mut k, hw) = test_kernel();
    k.register_intr_handler(IRQ_VBLANK, 0, count, COUNTER).unwrap();
    k.enable_intr(IRQ_VBLANK).unwrap();
    let token = k.cpu_suspend_intr();
    hw.intc.raise(IRQ_VBLANK);
    assert!(!k.poll_interrupts());
    k.cpu_resume_intr(token);
    assert!(k.poll_interrupts());
    assert_eq!(counter(&k), 1);
}

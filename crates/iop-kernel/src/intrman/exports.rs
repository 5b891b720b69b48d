// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `intrman` export library.
//!
//! Suspend tokens taken through the library are kept on a stack inside the
//! kernel, so module code only ever sees status codes.

use iop_abi::LibVersion;
use iop_abi::errno::{KE_CPUDI, KE_ERROR, KE_OK};

use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, status};

fn line(args: &[u32]) -> u8 {
    args.first()
        .and_then(|&v| u8::try_from(v).ok())
        .unwrap_or(u8::MAX)
}

fn release_intr_handler(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.release_intr_handler(line(args)) {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

fn enable_intr(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.enable_intr(line(args)) {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

/// `DisableIntr(line)`: returns 1 if the line was enabled.
fn disable_intr(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.disable_intr(line(args)) {
        Ok(was) => u32::from(was),
        Err(e) => status(e.code()),
    }
}

/// `CpuSuspendIntr()`: `KE_CPUDI` if interrupts were already off.
fn cpu_suspend_intr(k: &mut KernelState, _args: &[u32]) -> u32 {
    let token = k.cpu_suspend_intr();
    let was = token.was_enabled();
    k.intr.abi_tokens.push(token);
    status(if was { KE_OK } else { KE_CPUDI })
}

fn cpu_resume_intr(k: &mut KernelState, _args: &[u32]) -> u32 {
    match k.intr.abi_tokens.pop() {
        Some(token) => {
            k.cpu_resume_intr(token);
            status(KE_OK)
        }
        None => status(KE_ERROR),
    }
}

fn query_intr_context(k: &mut KernelState, _args: &[u32]) -> u32 {
    u32::from(k.query_intr_context())
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("intrman", LibVersion::new(1, 2))
        .export(4, release_intr_handler)
        .export(5, enable_intr)
        .export(6, disable_intr)
        .export(7, cpu_suspend_intr)
        .export(8, cpu_resume_intr)
        .export(9, query_intr_context)
}

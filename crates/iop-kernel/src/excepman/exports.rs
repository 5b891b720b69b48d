// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `excepman` export library.
//!
//! Registration takes Rust handlers and is only reachable through the kernel
//! API; the library exposes the calls whose arguments are plain words.

use iop_abi::LibVersion;
use iop_abi::errno::KE_OK;

use super::{Disposition, ExcepError, ExceptionFrame, HandlerId};
use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, status};

/// `ReleaseExceptionHandler(code, id)`.
fn release_exception_handler(k: &mut KernelState, args: &[u32]) -> u32 {
    let code = arg_code(args, 0);
    let Some(id) = args.get(1).copied().and_then(HandlerId::from_u32) else {
        return status(ExcepError::HandlerNotFound(code).code());
    };
    match k.release_exception_handler(code, id) {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

/// `ReleaseDefaultExceptionHandler()`.
fn release_default_exception_handler(k: &mut KernelState, _args: &[u32]) -> u32 {
    match k.release_default_exception_handler() {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

/// `RaiseException(code, epc)`: returns 1 if a handler claimed it.
fn raise_exception(k: &mut KernelState, args: &[u32]) -> u32 {
    let code = arg_code(args, 0);
    let mut frame = ExceptionFrame::new(code);
    frame.epc = iop_abi::Addr::new(args.get(1).copied().unwrap_or(0));
    match k.raise_exception(code, &mut frame) {
        Ok(Disposition::Handled) => 1,
        Ok(Disposition::Pass) => 0,
        Err(e) => status(e.code()),
    }
}

fn arg_code(args: &[u32], index: usize) -> u8 {
    args.get(index)
        .and_then(|&v| u8::try_from(v).ok())
        .unwrap_or(u8::MAX)
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("excepman", LibVersion::new(1, 1))
        .export(4, release_exception_handler)
        .export(5, release_default_exception_handler)
        .export(6, raise_exception)
}

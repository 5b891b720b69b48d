// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `loadcore` export library.

use iop_abi::errno::KE_OK;
use iop_abi::{Addr, LibVersion, ModuleId};

use super::{NativeLibrary, arg, status};
use crate::kernel::KernelState;

/// `RegisterLibraryEntries(table)`.
fn register_library_entries(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.register_image_library(Addr::new(arg(args, 0))) {
        Ok(_) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

/// `ReleaseLibraryEntries(table)`.
fn release_library_entries(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.release_image_library(Addr::new(arg(args, 0))) {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

/// Id of the module containing `addr`, or 0.
fn search_module_by_address(k: &mut KernelState, args: &[u32]) -> u32 {
    k.find_module_by_addr(Addr::new(arg(args, 0)))
        .map_or(ModuleId::NULL, |m| m.id)
        .as_u32()
}

fn module_count(k: &mut KernelState, _args: &[u32]) -> u32 {
    k.modules().len() as u32
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("loadcore", LibVersion::new(1, 1))
        .export(4, register_library_entries)
        .export(5, release_library_entries)
        .export(6, search_module_by_address)
        .export(7, module_count)
}

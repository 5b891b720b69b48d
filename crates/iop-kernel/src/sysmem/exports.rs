// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `sysmem` export library.

use iop_abi::errno::KE_OK;
use iop_abi::{Addr, LibVersion};

use super::AllocStrategy;
use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, arg, status};

/// `AllocSysMemory(mode, size, addr)`: returns the block or 0.
fn alloc_sys_memory(k: &mut KernelState, args: &[u32]) -> u32 {
    let Some(strategy) = AllocStrategy::from_abi(arg(args, 0), arg(args, 2)) else {
        return 0;
    };
    k.alloc_sys_memory(strategy, arg(args, 1))
        .map_or(0, Addr::as_u32)
}

/// `FreeSysMemory(addr)`.
fn free_sys_memory(k: &mut KernelState, args: &[u32]) -> u32 {
    match k.free_sys_memory(Addr::new(arg(args, 0))) {
        Ok(()) => status(KE_OK),
        Err(e) => status(e.code()),
    }
}

fn query_mem_size(k: &mut KernelState, _args: &[u32]) -> u32 {
    k.sysmem().query_mem_size()
}

fn query_max_free_mem_size(k: &mut KernelState, _args: &[u32]) -> u32 {
    k.sysmem().query_max_free()
}

fn query_total_free_mem_size(k: &mut KernelState, _args: &[u32]) -> u32 {
    k.sysmem().query_total_free()
}

fn query_block_top_address(k: &mut KernelState, args: &[u32]) -> u32 {
    k.sysmem()
        .query_block_top(Addr::new(arg(args, 0)))
        .map_or(0, Addr::as_u32)
}

fn query_block_size(k: &mut KernelState, args: &[u32]) -> u32 {
    k.sysmem()
        .query_block_size(Addr::new(arg(args, 0)))
        .unwrap_or(0)
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("sysmem", LibVersion::new(1, 1))
        .export(4, alloc_sys_memory)
        .export(5, free_sys_memory)
        .export(6, query_mem_size)
        .export(7, query_max_free_mem_size)
        .export(8, query_total_free_mem_size)
        .export(9, query_block_top_address)
        .export(10, query_block_size)
}

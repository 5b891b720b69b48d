// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `sifman` export library.

use alloc::vec::Vec;

use iop_abi::sif::DmaStatus;
use iop_abi::{Addr, BurstId, DmaAttr, DmaTransfer, LibVersion, SifReg};

use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, arg, status};

/// Size of one transfer descriptor in module memory: src, dest, size, attr.
const DESCRIPTOR_SIZE: u32 = 16;

/// `SetDma(descriptors, count)`: returns the burst id or 0.
fn set_dma(k: &mut KernelState, args: &[u32]) -> u32 {
    let base = Addr::new(arg(args, 0));
    let count = arg(args, 1);
    let mut transfers = Vec::new();
    for i in 0..count {
        let at = base + i * DESCRIPTOR_SIZE;
        let word = |n: u32| k.memory().read_u32(at + n * 4);
        let (Ok(src), Ok(dest), Ok(size), Ok(attr)) = (word(0), word(1), word(2), word(3)) else {
            return 0;
        };
        transfers.push(DmaTransfer::new(
            Addr::new(src),
            Addr::new(dest),
            size,
            DmaAttr::from_bits(attr),
        ));
    }
    k.set_dma(&transfers).map_or(0, BurstId::as_u32)
}

/// `DmaStat(id)`: 1 queued, 0 in flight, -1 done, -2 unknown id.
fn dma_stat(k: &mut KernelState, args: &[u32]) -> u32 {
    match BurstId::new(arg(args, 0)) {
        Some(id) => status(k.dma_stat(id).as_abi()),
        None => status(DmaStatus::Unknown.as_abi()),
    }
}

/// `GetReg(reg)`.
fn get_reg(k: &mut KernelState, args: &[u32]) -> u32 {
    SifReg::from_u32(arg(args, 0)).map_or(0, |reg| k.sif_get_reg(reg))
}

/// `SetReg(reg, value)`: returns the previous value.
fn set_reg(k: &mut KernelState, args: &[u32]) -> u32 {
    SifReg::from_u32(arg(args, 0)).map_or(0, |reg| k.sif_set_reg(reg, arg(args, 1)))
}

fn check_init(k: &mut KernelState, _args: &[u32]) -> u32 {
    u32::from(k.sif_peer_alive())
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("sifman", LibVersion::new(1, 1))
        .export(4, set_dma)
        .export(5, dma_stat)
        .export(6, get_reg)
        .export(7, set_reg)
        .export(8, check_init)
}

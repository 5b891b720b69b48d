// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `sifcmd` export library.

use iop_abi::{Addr, BurstId, LibVersion};

use super::ExtraData;
use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, arg};

/// `SendCmd(command, packet, size, src_extra, dest_extra, size_extra)`:
/// returns the burst id or 0.
fn send_cmd(k: &mut KernelState, args: &[u32]) -> u32 {
    let extra = ExtraData {
        src: Addr::new(arg(args, 3)),
        dest: Addr::new(arg(args, 4)),
        size: arg(args, 5),
    };
    k.send_cmd(arg(args, 0), Addr::new(arg(args, 1)), arg(args, 2), Some(extra))
        .map_or(0, BurstId::as_u32)
}

/// `GetSreg(index)`.
fn get_sreg(k: &mut KernelState, args: &[u32]) -> u32 {
    k.get_sreg(arg(args, 0) as usize).unwrap_or(0)
}

/// `SetSreg(index, value)` on the peer: returns the burst id or 0.
fn set_peer_sreg(k: &mut KernelState, args: &[u32]) -> u32 {
    k.set_peer_sreg(arg(args, 0), arg(args, 1))
        .map_or(0, BurstId::as_u32)
}

fn check_init(k: &mut KernelState, _args: &[u32]) -> u32 {
    u32::from(k.sif_check_init())
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("sifcmd", LibVersion::new(1, 1))
        .export(4, send_cmd)
        .export(5, get_sreg)
        .export(6, set_peer_sreg)
        .export(7, check_init)
}

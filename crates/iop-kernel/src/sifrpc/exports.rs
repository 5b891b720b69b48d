// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `sifrpc` export library.
//!
//! Only the non-blocking entries are exported; blocking binds and calls
//! need the idle hook of the thread that waits.

use iop_abi::LibVersion;

use super::{ClientId, QueueId, ServerId};
use crate::kernel::KernelState;
use crate::loadcore::{NativeLibrary, arg, status};

/// `CheckStat(client)`: 1 while a request is outstanding.
fn check_stat(k: &mut KernelState, args: &[u32]) -> u32 {
    ClientId::from_u32(arg(args, 0)).map_or(0, |c| u32::from(k.check_stat(c)))
}

/// `RemoveRpc(server)`.
fn remove_rpc(k: &mut KernelState, args: &[u32]) -> u32 {
    let result = ServerId::from_u32(arg(args, 0))
        .ok_or(super::RpcError::UnknownServer)
        .and_then(|s| k.remove_rpc(s));
    status(result.map_or_else(|e| e.code(), |()| 0))
}

/// `RemoveRpcQueue(queue)`.
fn remove_rpc_queue(k: &mut KernelState, args: &[u32]) -> u32 {
    let result = QueueId::from_u32(arg(args, 0))
        .ok_or(super::RpcError::UnknownQueue)
        .and_then(|q| k.remove_rpc_queue(q));
    status(result.map_or_else(|e| e.code(), |()| 0))
}

/// `NewClient()`: returns the client handle or 0.
fn new_client(k: &mut KernelState, _args: &[u32]) -> u32 {
    k.new_client().map_or(0, ClientId::as_u32)
}

/// Builds the library.
pub(crate) fn library() -> NativeLibrary {
    NativeLibrary::new("sifrpc", LibVersion::new(1, 1))
        .export(4, check_stat)
        .export(5, remove_rpc)
        .export(6, remove_rpc_queue)
        .export(7, new_client)
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Core type definitions for addresses and kernel identifiers.
//!
//! These newtypes prevent accidentally mixing a module id with a DMA burst id
//! or an address with a size at compile time.

mod addr;
mod id;

#[cfg(test)]
mod id_test;

pub use addr::Addr;
pub use id::{BurstId, ModuleId, PacketId, ThreadId};

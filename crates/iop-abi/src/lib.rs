// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared ABI definitions between the IOP kernel and its peer processor.
//!
//! This crate defines the contract everything else builds on:
//! - Address and identifier newtypes
//! - Memory layout constants (allocation unit, descriptor pages, IRQ lines)
//! - The module table ABI (export/import table layout, stub words, versions)
//! - SIF command packet and RPC packet wire formats
//! - Kernel status codes returned across the module ABI
//!
//! # Design Principles
//!
//! - **No dependencies**: Pure data types, 100% host-testable
//! - **Explicit encodings**: Wire structures encode to little-endian bytes
//!   instead of relying on `#[repr(C)]` transmutes
//! - **32-bit**: The IOP is a 32-bit MIPS core, all addresses are `u32`
//!
//! # Modules
//!
//! - [`types`]: Core newtypes (`Addr`, `ModuleId`, `BurstId`, `PacketId`, `ThreadId`)
//! - [`layout`]: Allocation granularity, pool sizes and interrupt line numbers
//! - [`module`]: Export/import table ABI
//! - [`sif`]: SIF command header, DMA transfer descriptors, mailbox registers
//! - [`rpc`]: RPC packet formats layered on SIF commands
//! - [`errno`]: `KE_*` kernel status codes
//! - [`bytes`]: Little-endian word helpers

#![cfg_attr(not(test), no_std)]

pub mod bytes;
pub mod errno;
pub mod layout;
pub mod module;
pub mod rpc;
pub mod sif;
pub mod types;

#[cfg(test)]
mod module_test;

// Re-export commonly used types at crate root
pub use module::{LibName, LibVersion, StartCode};
pub use sif::{CmdHeader, DmaAttr, DmaTransfer, SifReg};
pub use types::{Addr, BurstId, ModuleId, PacketId, ThreadId};

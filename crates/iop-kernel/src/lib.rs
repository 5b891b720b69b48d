// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # IOP Kernel
//!
//! Kernel substrate of the I/O processor. One [`KernelState`] owns:
//! - The block allocator over physical memory ([`sysmem`])
//! - Exception and interrupt dispatch ([`excepman`], [`intrman`])
//! - The module loader and library linker ([`loadcore`]), reading ELF/IRX
//!   and COFF images ([`elf`], [`coff`], [`reloc`])
//! - The SIF link to the main CPU: DMA transport ([`sifman`]), commands
//!   ([`sifcmd`]) and remote procedure calls ([`sifrpc`])
//!
//! Hardware is reached only through the traits in [`platform`]. With the
//! `std` feature the crate also carries mocks and [`platform::SifBus`],
//! which wires two kernels back to back on the host.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arena;
pub mod coff;
pub mod config;
pub mod console;
pub mod elf;
pub mod error;
pub mod excepman;
pub mod intrman;
pub mod kernel;
pub mod loadcore;
pub mod memory;
pub mod platform;
pub mod reloc;
pub mod sifcmd;
pub mod sifman;
pub mod sifrpc;
pub mod sysmem;

pub use config::{KernelConfig, Side};
pub use error::{ErrorKind, KernelError};
pub use kernel::{BootFailure, BootModule, BootReport, KernelState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

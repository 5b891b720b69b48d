// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel-wide error classification.
//!
//! Every component has its own error enum. They all map onto the same
//! [`ErrorKind`] classes and onto the `KE_*` status codes native exports hand
//! back to module code. [`KernelError`] wraps them for callers that drive
//! several components at once (boot, tests, the host binary).

use core::fmt;

use iop_abi::Addr;
use iop_abi::errno::KE_ERROR;

use crate::coff::CoffError;
use crate::elf::ElfError;
use crate::excepman::ExcepError;
use crate::intrman::IntrError;
use crate::loadcore::{LinkError, LoadError};
use crate::reloc::RelocError;
use crate::sifcmd::SifError;
use crate::sifrpc::RpcError;
use crate::sysmem::SysmemError;

/// Coarse error class shared by all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad alignment, size or code range.
    Argument,
    /// No free descriptor, packet, record or memory.
    ResourceExhausted,
    /// Duplicate registration.
    AlreadyExists,
    /// Missing registration.
    NotFound,
    /// Unresolved import or version mismatch.
    LinkFailure,
    /// Malformed image or relocation.
    DataError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Argument => "argument error",
            Self::ResourceExhausted => "resource exhausted",
            Self::AlreadyExists => "already exists",
            Self::NotFound => "not found",
            Self::LinkFailure => "link failure",
            Self::DataError => "data error",
        };
        f.write_str(s)
    }
}

/// Out-of-range access to physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault {
    /// First byte of the access.
    pub addr: Addr,
    /// Length of the access in bytes.
    pub len: u32,
}

impl MemoryFault {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Argument
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        KE_ERROR
    }
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory fault: {} bytes at {}", self.len, self.addr)
    }
}

/// Any kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Physical memory access out of range.
    Memory(MemoryFault),
    /// Allocator failure.
    Sysmem(SysmemError),
    /// Interrupt manager failure.
    Intr(IntrError),
    /// Exception manager failure.
    Excep(ExcepError),
    /// ELF image rejected.
    Elf(ElfError),
    /// COFF image rejected.
    Coff(CoffError),
    /// Relocation failed.
    Reloc(RelocError),
    /// Linker failure.
    Link(LinkError),
    /// Module load failure.
    Load(LoadError),
    /// SIF transport or command failure.
    Sif(SifError),
    /// RPC failure.
    Rpc(RpcError),
}

impl KernelError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Memory(e) => e.kind(),
            Self::Sysmem(e) => e.kind(),
            Self::Intr(e) => e.kind(),
            Self::Excep(e) => e.kind(),
            Self::Elf(_) | Self::Coff(_) | Self::Reloc(_) => ErrorKind::DataError,
            Self::Link(e) => e.kind(),
            Self::Load(e) => e.kind(),
            Self::Sif(e) => e.kind(),
            Self::Rpc(e) => e.kind(),
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Memory(e) => e.code(),
            Self::Sysmem(e) => e.code(),
            Self::Intr(e) => e.code(),
            Self::Excep(e) => e.code(),
            Self::Elf(_) | Self::Coff(_) | Self::Reloc(_) => iop_abi::errno::KE_ILLEGAL_OBJECT,
            Self::Link(e) => e.code(),
            Self::Load(e) => e.code(),
            Self::Sif(e) => e.code(),
            Self::Rpc(e) => e.code(),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(e) => write!(f, "{e}"),
            Self::Sysmem(e) => write!(f, "sysmem: {e}"),
            Self::Intr(e) => write!(f, "intrman: {e}"),
            Self::Excep(e) => write!(f, "excepman: {e}"),
            Self::Elf(e) => write!(f, "elf: {e}"),
            Self::Coff(e) => write!(f, "coff: {e}"),
            Self::Reloc(e) => write!(f, "reloc: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Load(e) => write!(f, "loadcore: {e}"),
            Self::Sif(e) => write!(f, "sif: {e}"),
            Self::Rpc(e) => write!(f, "sifrpc: {e}"),
        }
    }
}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for KernelError {
                fn from(e: $ty) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from!(
    Memory(MemoryFault),
    Sysmem(SysmemError),
    Intr(IntrError),
    Excep(ExcepError),
    Elf(ElfError),
    Coff(CoffError),
    Reloc(RelocError),
    Link(LinkError),
    Load(LoadError),
    Sif(SifError),
    Rpc(RpcError),
);

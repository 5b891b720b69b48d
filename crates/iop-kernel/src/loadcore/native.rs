// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Native (Rust) modules and export libraries.
//!
//! Kernel services and host-side drivers are Rust code, not MIPS images.
//! They publish [`NativeLibrary`] tables whose slots are plain function
//! pointers and take part in linking exactly like image libraries: importers
//! match them by name and major version and call through resolved stubs.

use alloc::boxed::Box;
use alloc::vec::Vec;

use iop_abi::module::RESERVED_EXPORTS;
use iop_abi::{Addr, LibName, LibVersion, ModuleId};

use crate::arena::Key;
use crate::kernel::KernelState;
use crate::loadcore::ModuleInfo;

/// Function stored in a native export slot.
///
/// Receives the call's argument words and returns the `v0` word.
pub type NativeFn = fn(&mut KernelState, &[u32]) -> u32;

/// Converts a kernel status code to the word a native export returns.
#[inline]
#[must_use]
pub(crate) const fn status(code: i32) -> u32 {
    code as u32
}

/// Argument word `index`, zero if the caller passed fewer.
#[inline]
pub(crate) fn arg(args: &[u32], index: usize) -> u32 {
    args.get(index).copied().unwrap_or(0)
}

/// What one export slot refers to.
#[derive(Debug, Clone, Copy)]
pub enum ExportTarget {
    /// Reserved or empty slot.
    Unused,
    /// Rust function.
    Native(NativeFn),
    /// Function inside a loaded image.
    Image(Addr),
}

/// Export table built in Rust.
#[derive(Debug, Clone)]
pub struct NativeLibrary {
    /// Library name.
    pub name: LibName,
    /// Library version.
    pub version: LibVersion,
    /// Slots by ordinal.
    pub entries: Vec<ExportTarget>,
}

impl NativeLibrary {
    /// Creates a library with only the reserved lifecycle slots.
    #[must_use]
    pub fn new(name: &str, version: LibVersion) -> Self {
        Self {
            name: LibName::new(name),
            version,
            entries: alloc::vec![ExportTarget::Unused; usize::from(RESERVED_EXPORTS)],
        }
    }

    /// Places `f` at `ordinal`, growing the table as needed.
    #[must_use]
    pub fn export(mut self, ordinal: u16, f: NativeFn) -> Self {
        let index = usize::from(ordinal);
        if self.entries.len() <= index {
            self.entries.resize(index + 1, ExportTarget::Unused);
        }
        self.entries[index] = ExportTarget::Native(f);
        self
    }
}

/// Where a linked import stub leads.
#[derive(Debug, Clone, Copy)]
pub enum StubTarget {
    /// Not linked; calling it is an error.
    Trap,
    /// Ordinal beyond the export table or an empty slot; returns zero.
    NoOp,
    /// Rust function.
    Native(NativeFn),
    /// Function inside a loaded image.
    Address(Addr),
}

impl StubTarget {
    pub(crate) const fn from_export(entries: &[ExportTarget], ordinal: u16) -> Self {
        let index = ordinal as usize;
        if index >= entries.len() {
            return Self::NoOp;
        }
        match entries[index] {
            ExportTarget::Unused => Self::NoOp,
            ExportTarget::Native(f) => Self::Native(f),
            ExportTarget::Image(addr) => Self::Address(addr),
        }
    }
}

/// Outcome of calling through a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubCall {
    /// The call completed in the kernel with this return word.
    Returned(u32),
    /// The caller must continue at this image address.
    Jump(Addr),
}

/// Handle to one import table of a native module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImportHandle(pub(crate) Key);

/// An import a native module declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// Library name.
    pub name: LibName,
    /// Requested version; only the major part must match.
    pub version: LibVersion,
    /// Ordinals the module calls.
    pub ordinals: Vec<u16>,
}

impl ImportDecl {
    /// Declares an import.
    #[must_use]
    pub fn new(name: &str, version: LibVersion, ordinals: &[u16]) -> Self {
        Self {
            name: LibName::new(name),
            version,
            ordinals: ordinals.to_vec(),
        }
    }
}

/// What a module's entry point reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    /// Stay resident; cannot be unloaded.
    ResidentEnd,
    /// Stay resident; may be unloaded.
    RemovableEnd,
    /// Done; unload again. The load still counts as successful.
    NoResidentEnd,
    /// Initialization failed with this status code.
    Failed(i32),
}

impl StartResult {
    /// Decodes an image entry point's return word.
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        if (word as i32) < 0 {
            return Self::Failed(word as i32);
        }
        match iop_abi::StartCode::from_raw(word) {
            Some(iop_abi::StartCode::ResidentEnd) => Self::ResidentEnd,
            Some(iop_abi::StartCode::RemovableEnd) => Self::RemovableEnd,
            Some(iop_abi::StartCode::NoResidentEnd) => Self::NoResidentEnd,
            None => Self::Failed(word as i32),
        }
    }
}

/// What a native module sees while starting.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Id of the module being started.
    pub id: ModuleId,
    /// Import handles in declaration order.
    pub imports: Vec<ImportHandle>,
}

/// A module implemented in Rust.
pub trait IopModule {
    /// Module name.
    fn name(&self) -> &str;

    /// Module version.
    fn version(&self) -> LibVersion;

    /// Libraries the module links against before starting.
    fn imports(&self) -> Vec<ImportDecl> {
        Vec::new()
    }

    /// Entry point.
    fn start(&mut self, k: &mut KernelState, ctx: &ModuleContext) -> StartResult;

    /// Called before a removable module is unloaded; `false` refuses.
    fn stop(&mut self, _k: &mut KernelState) -> bool {
        true
    }
}

/// Runs image entry points (the CPU, for the kernel's purposes).
///
/// Called after the image is loaded, relocated and linked, and its descriptor
/// is visible to [`KernelState::find_module_by_addr`].
pub trait ModuleRunner {
    /// Runs the entry point of `module`.
    fn run_entry(&mut self, k: &mut KernelState, module: &ModuleInfo) -> StartResult;

    /// Asks a removable module to stop before it is unloaded; `false`
    /// refuses.
    fn stop_module(&mut self, _k: &mut KernelState, _module: &ModuleInfo) -> bool {
        true
    }
}

/// Runner for images whose entry points cannot be executed.
///
/// Publishes every export table found in the image, then reports
/// `ResidentEnd`. Useful for host dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportScanRunner;

impl ModuleRunner for ExportScanRunner {
    fn run_entry(&mut self, k: &mut KernelState, module: &ModuleInfo) -> StartResult {
        for addr in k.scan_export_tables(module) {
            if let Err(e) = k.register_image_library(addr) {
                return StartResult::Failed(e.code());
            }
        }
        StartResult::ResidentEnd
    }
}

pub(crate) type BoxedModule = Box<dyn IopModule>;

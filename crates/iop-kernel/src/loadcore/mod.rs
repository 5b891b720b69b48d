// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Module loader and linker.
//!
//! Loading an image runs these steps, undoing all of them if a later one
//! fails:
//!
//! 1. probe the format and normalize the headers ([`ImageLayout`]),
//! 2. allocate memory (first fit for relocatable images, the link address
//!    for fixed ones), copy text and data, zero bss,
//! 3. apply relocations,
//! 4. find the import tables in the text and link each one,
//! 5. publish the module descriptor,
//! 6. run the entry point through a [`ModuleRunner`].
//!
//! Native modules skip the copy and relocation steps and declare their
//! imports instead of embedding tables.
//!
//! Module descriptors are kept in ascending address order; native and
//! built-in modules have no address and sort first.

#[cfg(test)]
mod loadcore_test;

mod exports;
mod image;
mod linker;
mod native;

pub(crate) use exports::library as export_library;
pub use image::{ImageFormat, ImageLayout, Segment};
pub use linker::{LibraryId, LibraryInfo, Linker};
pub(crate) use native::{arg, status};
pub use native::{
    ExportScanRunner, ExportTarget, ImportDecl, ImportHandle, IopModule, ModuleContext,
    ModuleRunner, NativeFn, NativeLibrary, StartResult, StubCall, StubTarget,
};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use iop_abi::errno::{
    KE_ERROR, KE_ILLEGAL_LIBRARY, KE_ILLEGAL_OBJECT, KE_LIBRARY_FOUND, KE_LIBRARY_INUSE,
    KE_LIBRARY_NOTFOUND, KE_LINKERR, KE_MEMINUSE, KE_NO_MEMORY, KE_NOT_REMOVABLE,
    KE_UNKNOWN_MODULE,
};
use iop_abi::module::IMPORT_MAGIC;
use iop_abi::{Addr, LibName, LibVersion, ModuleId};
use tracing::{debug, info, warn};

use crate::coff::CoffError;
use crate::elf::ElfError;
use crate::error::{ErrorKind, MemoryFault};
use crate::kernel::KernelState;
use crate::reloc::{self, RelocError};
use crate::sysmem::{AllocStrategy, SysmemError};
use linker::{ExportLib, ImportLib, Stub};
use native::BoxedModule;

// =============================================================================
// Errors
// =============================================================================

/// Linker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No library matches an import's name and major version.
    LibraryNotFound(LibName),
    /// A library with the same name and version is already registered.
    VersionConflict(LibName),
    /// A newer minor version is already registered.
    LibraryFound(LibName),
    /// Library still has linked importers.
    LibraryInUse(LibName),
    /// Library or import table capacity exhausted.
    TableFull(LibName),
    /// No such library.
    UnknownLibrary,
    /// No such import table.
    UnknownImport,
    /// Address is not a known import stub.
    UnknownStub(Addr),
    /// Ordinal not declared by the import table.
    UnknownOrdinal(u16),
    /// Stub is not linked.
    UnlinkedStub,
}

impl LinkError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::LibraryNotFound(_)
            | Self::VersionConflict(_)
            | Self::LibraryInUse(_)
            | Self::UnlinkedStub => ErrorKind::LinkFailure,
            Self::LibraryFound(_) => ErrorKind::AlreadyExists,
            Self::TableFull(_) => ErrorKind::ResourceExhausted,
            Self::UnknownLibrary
            | Self::UnknownImport
            | Self::UnknownStub(_)
            | Self::UnknownOrdinal(_) => ErrorKind::NotFound,
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::LibraryNotFound(_) | Self::UnknownLibrary => KE_LIBRARY_NOTFOUND,
            Self::VersionConflict(_) | Self::UnlinkedStub => KE_LINKERR,
            Self::LibraryFound(_) => KE_LIBRARY_FOUND,
            Self::LibraryInUse(_) => KE_LIBRARY_INUSE,
            Self::TableFull(_) => KE_NO_MEMORY,
            Self::UnknownImport | Self::UnknownStub(_) | Self::UnknownOrdinal(_) => KE_ERROR,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LibraryNotFound(name) => write!(f, "library {name} not found"),
            Self::VersionConflict(name) => write!(f, "library {name} already registered"),
            Self::LibraryFound(name) => write!(f, "newer {name} already registered"),
            Self::LibraryInUse(name) => write!(f, "library {name} still imported"),
            Self::TableFull(name) => write!(f, "no room for table {name}"),
            Self::UnknownLibrary => write!(f, "unknown library"),
            Self::UnknownImport => write!(f, "unknown import table"),
            Self::UnknownStub(addr) => write!(f, "no import stub at {addr}"),
            Self::UnknownOrdinal(ordinal) => write!(f, "ordinal {ordinal} not imported"),
            Self::UnlinkedStub => write!(f, "call through unlinked stub"),
        }
    }
}

/// Module load or unload failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Neither an ELF nor a COFF image.
    UnknownFormat,
    /// Malformed ELF image.
    Elf(ElfError),
    /// Malformed COFF image.
    Coff(CoffError),
    /// Relocation failed.
    Reloc(RelocError),
    /// Import or export table could not be linked.
    Link(LinkError),
    /// Malformed import or export table at this address.
    BadTable(Addr),
    /// Not enough memory for an image of this size.
    NoMemory(u32),
    /// A fixed-address image overlaps memory in use.
    AddressInUse(Addr),
    /// Image does not fit physical memory.
    Memory(MemoryFault),
    /// Entry point reported failure.
    StartFailed(i32),
    /// Module is resident or refused to stop.
    NotRemovable(ModuleId),
    /// No module with this id.
    UnknownModule(ModuleId),
}

impl LoadError {
    /// Error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFormat
            | Self::Elf(_)
            | Self::Coff(_)
            | Self::Reloc(_)
            | Self::BadTable(_) => ErrorKind::DataError,
            Self::Link(e) => e.kind(),
            Self::NoMemory(_) => ErrorKind::ResourceExhausted,
            Self::AddressInUse(_) => ErrorKind::AlreadyExists,
            Self::Memory(_) | Self::NotRemovable(_) => ErrorKind::Argument,
            Self::StartFailed(_) => ErrorKind::LinkFailure,
            Self::UnknownModule(_) => ErrorKind::NotFound,
        }
    }

    /// Kernel status code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::UnknownFormat | Self::Elf(_) | Self::Coff(_) | Self::Reloc(_) => {
                KE_ILLEGAL_OBJECT
            }
            Self::BadTable(_) => KE_ILLEGAL_LIBRARY,
            Self::Link(e) => e.code(),
            Self::NoMemory(_) => KE_NO_MEMORY,
            Self::AddressInUse(_) => KE_MEMINUSE,
            Self::Memory(_) => KE_ERROR,
            Self::StartFailed(code) => *code,
            Self::NotRemovable(_) => KE_NOT_REMOVABLE,
            Self::UnknownModule(_) => KE_UNKNOWN_MODULE,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFormat => write!(f, "unknown image format"),
            Self::Elf(e) => write!(f, "elf: {e}"),
            Self::Coff(e) => write!(f, "coff: {e}"),
            Self::Reloc(e) => write!(f, "reloc: {e}"),
            Self::Link(e) => write!(f, "{e}"),
            Self::BadTable(addr) => write!(f, "malformed library table at {addr}"),
            Self::NoMemory(size) => write!(f, "no memory for {size} bytes"),
            Self::AddressInUse(addr) => write!(f, "address {addr} in use"),
            Self::Memory(e) => write!(f, "{e}"),
            Self::StartFailed(code) => write!(f, "entry point failed with {code}"),
            Self::NotRemovable(id) => write!(f, "{id} is not removable"),
            Self::UnknownModule(id) => write!(f, "unknown {id}"),
        }
    }
}

macro_rules! load_error_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for LoadError {
                fn from(e: $ty) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

load_error_from!(
    Elf(ElfError),
    Coff(CoffError),
    Reloc(RelocError),
    Link(LinkError),
    Memory(MemoryFault),
);

// =============================================================================
// Module Descriptors
// =============================================================================

/// How a module is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Kernel service registered at boot.
    Builtin,
    /// Rust module.
    Native,
    /// MIPS image in memory.
    Image(ImageFormat),
}

/// Life-cycle state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Entry point is running.
    Starting,
    /// Resident for good.
    Resident,
    /// Resident, may be unloaded.
    Removable,
}

/// Module descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module id.
    pub id: ModuleId,
    /// Module name.
    pub name: String,
    /// Module version.
    pub version: LibVersion,
    /// Implementation kind.
    pub kind: ModuleKind,
    /// Life-cycle state.
    pub state: ModuleState,
    /// Entry point address (images only).
    pub entry: Addr,
    /// gp value (images only).
    pub gp: Addr,
    /// First byte of the image (images only).
    pub text_start: Addr,
    /// Text size.
    pub text_size: u32,
    /// Data size.
    pub data_size: u32,
    /// Bss size.
    pub bss_size: u32,
    /// Allocator block holding the image.
    pub block: Option<Addr>,
    /// Bytes of memory the image occupies.
    pub mem_size: u32,
}

impl ModuleInfo {
    fn native(id: ModuleId, name: &str, version: LibVersion, kind: ModuleKind) -> Self {
        Self {
            id,
            name: String::from(name),
            version,
            kind,
            state: ModuleState::Starting,
            entry: Addr::null(),
            gp: Addr::null(),
            text_start: Addr::null(),
            text_size: 0,
            data_size: 0,
            bss_size: 0,
            block: None,
            mem_size: 0,
        }
    }

    /// Checks if `addr` lies inside the image.
    #[must_use]
    pub fn contains(&self, addr: Addr) -> bool {
        self.block.is_some() && addr >= self.text_start && addr.diff(self.text_start) < self.mem_size
    }
}

/// Loader state.
pub struct LoadCore {
    pub(crate) linker: Linker,
    modules: Vec<ModuleInfo>,
    natives: Vec<(ModuleId, BoxedModule)>,
    next_id: u32,
}

impl LoadCore {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            linker: Linker::new(),
            modules: Vec::new(),
            natives: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> ModuleId {
        let id = ModuleId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn insert(&mut self, info: ModuleInfo) {
        let at = self
            .modules
            .iter()
            .position(|m| m.text_start > info.text_start)
            .unwrap_or(self.modules.len());
        self.modules.insert(at, info);
    }

    fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleInfo> {
        self.modules.iter_mut().find(|m| m.id == id)
    }
}

impl Default for LoadCore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Kernel Operations
// =============================================================================

impl KernelState {
    /// Registers a kernel service library as a resident built-in module.
    pub fn register_builtin(&mut self, lib: NativeLibrary) -> Result<ModuleId, LoadError> {
        let id = self.loadcore.allocate_id();
        let mut info = ModuleInfo::native(id, lib.name.as_str(), lib.version, ModuleKind::Builtin);
        info.state = ModuleState::Resident;
        self.register_library_entries(id, lib)?;
        self.loadcore.insert(info);
        Ok(id)
    }

    /// Publishes a Rust export table owned by `owner`.
    pub fn register_library_entries(
        &mut self,
        owner: ModuleId,
        lib: NativeLibrary,
    ) -> Result<LibraryId, LinkError> {
        let export = ExportLib::new(lib.name, lib.version, lib.entries, owner, None);
        self.critical(|k| k.loadcore.linker.register(export))
    }

    /// Publishes the export table at `addr` in memory (`RegisterLibraryEntries`).
    ///
    /// The library is owned by the module whose image contains `addr`.
    pub fn register_image_library(&mut self, addr: Addr) -> Result<LibraryId, LoadError> {
        let table = image::read_export_table(self.memory().raw(), addr)?;
        let owner = self
            .find_module_by_addr(addr)
            .map_or(ModuleId::NULL, |m| m.id);
        let export = ExportLib::new(
            table.header.name,
            table.header.version,
            table.entries,
            owner,
            Some(addr),
        );
        Ok(self.critical(|k| k.loadcore.linker.register(export))?)
    }

    /// Withdraws the export table registered from `addr` (`ReleaseLibraryEntries`).
    pub fn release_image_library(&mut self, addr: Addr) -> Result<(), LinkError> {
        let id = self
            .loadcore
            .linker
            .find_by_table(addr)
            .ok_or(LinkError::UnknownLibrary)?;
        self.release_library(id)
    }

    /// Withdraws a library that no import table is linked to.
    pub fn release_library(&mut self, id: LibraryId) -> Result<(), LinkError> {
        self.critical(|k| k.loadcore.linker.release(id, false))
    }

    /// Library an importer of `name`/`version` would link to.
    #[must_use]
    pub fn find_library(&self, name: &str, version: LibVersion) -> Option<LibraryId> {
        self.loadcore.linker.find_library(LibName::new(name), version)
    }

    /// All registered libraries in registration order.
    #[must_use]
    pub fn libraries(&self) -> Vec<LibraryInfo> {
        self.loadcore.linker.libraries()
    }

    /// Number of import tables waiting for their library to come back.
    #[must_use]
    pub fn orphan_imports(&self) -> usize {
        self.loadcore.linker.orphan_count()
    }

    /// Where the import stub at `addr` leads.
    pub fn resolve_stub(&self, addr: Addr) -> Result<StubTarget, LinkError> {
        self.loadcore.linker.resolve_stub(addr)
    }

    /// Calls through the import stub at `addr`.
    pub fn call_stub(&mut self, addr: Addr, args: &[u32]) -> Result<StubCall, LinkError> {
        let target = self.resolve_stub(addr)?;
        self.invoke(target, args)
    }

    /// Calls `ordinal` through a native module's import table.
    pub fn call_import(
        &mut self,
        import: ImportHandle,
        ordinal: u16,
        args: &[u32],
    ) -> Result<StubCall, LinkError> {
        let target = self.loadcore.linker.import_target(import.0, ordinal)?;
        self.invoke(target, args)
    }

    /// Checks if a native module's import table is linked.
    #[must_use]
    pub fn import_linked(&self, import: ImportHandle) -> bool {
        self.loadcore.linker.is_linked(import.0)
    }

    fn invoke(&mut self, target: StubTarget, args: &[u32]) -> Result<StubCall, LinkError> {
        match target {
            StubTarget::Trap => Err(LinkError::UnlinkedStub),
            StubTarget::NoOp => Ok(StubCall::Returned(0)),
            StubTarget::Native(f) => Ok(StubCall::Returned(f(self, args))),
            StubTarget::Address(addr) => Ok(StubCall::Jump(addr)),
        }
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Loads, links and starts a module image.
    ///
    /// `name` is used when the image does not record one. A module whose
    /// entry point returns `NoResidentEnd` is unloaded again but the call
    /// still succeeds.
    #[tracing::instrument(skip(self, bytes, runner), fields(size = bytes.len()))]
    pub fn load_image(
        &mut self,
        name: &str,
        bytes: &[u8],
        runner: &mut dyn ModuleRunner,
    ) -> Result<ModuleId, LoadError> {
        let layout = ImageLayout::parse(bytes)?;
        let strategy = if layout.relocatable {
            AllocStrategy::First
        } else {
            AllocStrategy::Fixed(Addr::new(layout.link_addr))
        };
        let block = self
            .alloc_sys_memory(strategy, layout.mem_size)
            .map_err(|e| match e {
                SysmemError::Overlap(addr) | SysmemError::OutOfPool(addr) => {
                    LoadError::AddressInUse(addr)
                }
                _ => LoadError::NoMemory(layout.mem_size),
            })?;
        debug!(module = name, %block, size = layout.mem_size, "image memory allocated");

        let id = self.loadcore.allocate_id();
        let module_name = if layout.name.is_empty() { name } else { layout.name };
        if let Err(e) = self.install_image(id, &layout, block) {
            self.loadcore.linker.release_owner(id);
            // The block was allocated above and is still live.
            let _ = self.free_sys_memory(block);
            return Err(e);
        }

        let info = ModuleInfo {
            id,
            name: String::from(module_name),
            version: layout.version,
            kind: ModuleKind::Image(layout.format),
            state: ModuleState::Starting,
            entry: block + layout.entry,
            gp: block + layout.gp,
            text_start: block,
            text_size: layout.text_size,
            data_size: layout.data_size,
            bss_size: layout.bss_size,
            block: Some(block),
            mem_size: layout.mem_size,
        };
        self.loadcore.insert(info.clone());
        let result = runner.run_entry(self, &info);
        self.finish_start(id, module_name, result)
    }

    /// Copies, relocates and links an image into `block`.
    fn install_image(
        &mut self,
        id: ModuleId,
        layout: &ImageLayout<'_>,
        block: Addr,
    ) -> Result<(), LoadError> {
        let memory = self.memory_mut();
        memory.fill(block, layout.mem_size, 0)?;
        for segment in &layout.segments {
            memory.write(block + segment.offset, segment.bytes)?;
        }
        if layout.relocatable && !layout.relocs.is_empty() {
            let image = memory.slice_mut(block, layout.mem_size)?;
            reloc::apply(image, block.as_u32(), &layout.relocs)?;
            debug!(relocs = layout.relocs.len(), "image relocated");
        }

        let text_len = layout.text_size.min(layout.mem_size);
        let text = self.memory().slice(block, text_len)?.to_vec();
        for offset in image::find_tables(&text, IMPORT_MAGIC) {
            let table = image::read_import_table(&text, block, offset)?;
            let import = ImportLib::new(table.header.name, table.header.version, id, table.stubs);
            self.critical(|k| k.loadcore.linker.add_import(import))?;
        }
        Ok(())
    }

    /// Loads, links and starts a Rust module.
    pub fn load_native(&mut self, mut module: Box<dyn IopModule>) -> Result<ModuleId, LoadError> {
        let id = self.loadcore.allocate_id();
        let name = String::from(module.name());
        let mut imports = Vec::new();
        for decl in module.imports() {
            let stubs = decl.ordinals.iter().map(|&o| Stub::new(None, o)).collect();
            let import = ImportLib::new(decl.name, decl.version, id, stubs);
            match self.critical(|k| k.loadcore.linker.add_import(import)) {
                Ok(key) => imports.push(ImportHandle(key)),
                Err(e) => {
                    self.loadcore.linker.release_owner(id);
                    return Err(e.into());
                }
            }
        }

        let info = ModuleInfo::native(id, &name, module.version(), ModuleKind::Native);
        self.loadcore.insert(info);
        let ctx = ModuleContext { id, imports };
        let result = module.start(self, &ctx);
        let id = self.finish_start(id, &name, result)?;
        if self.module(id).is_some() {
            self.loadcore.natives.push((id, module));
        }
        Ok(id)
    }

    fn finish_start(
        &mut self,
        id: ModuleId,
        name: &str,
        result: StartResult,
    ) -> Result<ModuleId, LoadError> {
        let state = match result {
            StartResult::ResidentEnd => ModuleState::Resident,
            StartResult::RemovableEnd => ModuleState::Removable,
            StartResult::NoResidentEnd => {
                info!(module = name, %id, "module finished without staying resident");
                self.discard_module(id);
                return Ok(id);
            }
            StartResult::Failed(code) => {
                warn!(module = name, %id, code, "module start failed");
                self.discard_module(id);
                return Err(LoadError::StartFailed(code));
            }
        };
        if let Some(info) = self.loadcore.get_mut(id) {
            info.state = state;
        }
        info!(module = name, %id, ?state, "module loaded");
        Ok(id)
    }

    /// Removes every trace of a module.
    fn discard_module(&mut self, id: ModuleId) {
        self.loadcore.linker.release_owner(id);
        self.loadcore.natives.retain(|(m, _)| *m != id);
        let Some(at) = self.loadcore.modules.iter().position(|m| m.id == id) else {
            return;
        };
        let info = self.loadcore.modules.remove(at);
        if let Some(block) = info.block {
            if let Err(e) = self.free_sys_memory(block) {
                warn!(%id, %block, error = %e, "module memory not released");
            }
        }
    }

    /// Stops and unloads a removable module.
    ///
    /// Import tables linked to the module's libraries become orphans whose
    /// stubs trap until a replacement library is registered.
    pub fn unload_module(
        &mut self,
        id: ModuleId,
        runner: &mut dyn ModuleRunner,
    ) -> Result<(), LoadError> {
        let info = self.module(id).cloned().ok_or(LoadError::UnknownModule(id))?;
        if info.state != ModuleState::Removable {
            return Err(LoadError::NotRemovable(id));
        }
        let stopped = match info.kind {
            ModuleKind::Native | ModuleKind::Builtin => {
                match self.loadcore.natives.iter().position(|(m, _)| *m == id) {
                    Some(at) => {
                        let (_, mut module) = self.loadcore.natives.remove(at);
                        let ok = module.stop(self);
                        if !ok {
                            self.loadcore.natives.push((id, module));
                        }
                        ok
                    }
                    None => true,
                }
            }
            ModuleKind::Image(_) => runner.stop_module(self, &info),
        };
        if !stopped {
            return Err(LoadError::NotRemovable(id));
        }
        self.discard_module(id);
        info!(module = %info.name, %id, "module unloaded");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// All modules, native first, then images by ascending address.
    #[must_use]
    pub fn modules(&self) -> &[ModuleInfo] {
        &self.loadcore.modules
    }

    /// Descriptor of module `id`.
    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.loadcore.modules.iter().find(|m| m.id == id)
    }

    /// Image containing `addr`.
    #[must_use]
    pub fn find_module_by_addr(&self, addr: Addr) -> Option<&ModuleInfo> {
        self.loadcore.modules.iter().find(|m| m.contains(addr))
    }

    /// First module named `name`.
    #[must_use]
    pub fn find_module_by_name(&self, name: &str) -> Option<&ModuleInfo> {
        self.loadcore.modules.iter().find(|m| m.name == name)
    }

    /// Export tables embedded in a module's text.
    #[must_use]
    pub fn scan_export_tables(&self, module: &ModuleInfo) -> Vec<Addr> {
        let Ok(text) = self.memory().slice(module.text_start, module.text_size) else {
            return Vec::new();
        };
        image::find_tables(text, iop_abi::module::EXPORT_MAGIC)
            .into_iter()
            .map(|offset| module.text_start + offset as u32)
            .collect()
    }
}
